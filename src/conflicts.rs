//! Static conflict analysis over a rule set.
//!
//! Four checks run in order over the active rules: duplicate names,
//! overlapping `(type, category)` scopes, wide percentage-rate spread
//! within a type, and similar free-text conditions.  The similarity
//! check is a word-overlap heuristic, not a semantic comparison.

use crate::config::{EngineConfig, MIN_TOKEN_LEN};
use crate::models::{
    CommissionRule, ConflictSummary, ConflictType, PartyType, RateType, RuleConflict, Severity,
};
use std::cmp::Reverse;
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::hash::Hash;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConflictAnalyzer {
    pub rate_variance_threshold: f64,
    pub min_shared_tokens: usize,
}

impl Default for ConflictAnalyzer {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl ConflictAnalyzer {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            rate_variance_threshold: config.rate_variance_threshold,
            min_shared_tokens: config.min_shared_tokens,
        }
    }

    /// Analyze the active rules in `rules`.  Conflicts are ordered by
    /// severity, most severe first, then by discovery order.
    pub fn analyze(&self, rules: &[CommissionRule]) -> Vec<RuleConflict> {
        let active: Vec<&CommissionRule> = rules.iter().filter(|r| r.is_active).collect();
        let mut conflicts = Vec::new();

        for group in group_by(&active, |r| r.name.clone()) {
            if group.len() > 1 {
                conflicts.push(RuleConflict {
                    conflict_type: ConflictType::Duplicate,
                    severity: Severity::High,
                    description: format!(
                        "{} active rules share the name '{}'",
                        group.len(),
                        group[0].name
                    ),
                    suggestion: Some(
                        "Rename or merge these rules so each name identifies one policy".into(),
                    ),
                    rules: owned(&group),
                });
            }
        }

        for group in group_by(&active, scope_key) {
            if group.len() > 1 {
                conflicts.push(RuleConflict {
                    conflict_type: ConflictType::Overlap,
                    severity: Severity::Medium,
                    description: format!(
                        "{} rules apply to {} transactions in {}",
                        group.len(),
                        group[0].rule_type.as_str(),
                        category_label(group[0])
                    ),
                    suggestion: Some(
                        "Narrow the category or amount range, or confirm the commissions are meant to stack"
                            .into(),
                    ),
                    rules: owned(&group),
                });
            }
        }

        let percentage: Vec<&CommissionRule> = active
            .iter()
            .copied()
            .filter(|r| r.rate_type == RateType::Percentage)
            .collect();
        for group in group_by(&percentage, |r| r.rule_type) {
            let min = group.iter().map(|r| r.rate).fold(f64::INFINITY, f64::min);
            let max = group.iter().map(|r| r.rate).fold(f64::NEG_INFINITY, f64::max);
            if group.len() > 1 && max - min > self.rate_variance_threshold {
                conflicts.push(RuleConflict {
                    conflict_type: ConflictType::Hierarchy,
                    severity: Severity::Low,
                    description: format!(
                        "Percentage rates for {} rules range from {}% to {}%",
                        group[0].rule_type.as_str(),
                        min,
                        max
                    ),
                    suggestion: Some("Review the rate structure for consistency".into()),
                    rules: owned(&group),
                });
            }
        }

        let tokens: Vec<HashSet<String>> = active.iter().map(|r| tokenize(&r.conditions)).collect();
        for i in 0..active.len() {
            for j in (i + 1)..active.len() {
                let (a, b) = (active[i], active[j]);
                if scope_key(a) != scope_key(b) {
                    continue;
                }
                let shared: BTreeSet<&String> = tokens[i].intersection(&tokens[j]).collect();
                if shared.len() >= self.min_shared_tokens {
                    let words: Vec<&str> = shared.iter().map(|s| s.as_str()).collect();
                    conflicts.push(RuleConflict {
                        conflict_type: ConflictType::Condition,
                        severity: Severity::Medium,
                        description: format!(
                            "Rules '{}' and '{}' have similar conditions (shared terms: {})",
                            a.name,
                            b.name,
                            words.join(", ")
                        ),
                        suggestion: Some(
                            "Make the conditions mutually exclusive or combine the rules".into(),
                        ),
                        rules: vec![a.clone(), b.clone()],
                    });
                }
            }
        }

        // stable, so discovery order survives within a severity
        conflicts.sort_by_key(|c| Reverse(c.severity.rank()));
        log::info!(
            "analyzed {} active rules: {} conflicts",
            active.len(),
            conflicts.len()
        );
        conflicts
    }
}

/// Analyze `rules` with the default thresholds.
pub fn analyze_rule_conflicts(rules: &[CommissionRule]) -> Vec<RuleConflict> {
    ConflictAnalyzer::default().analyze(rules)
}

/// Count conflicts by severity.
pub fn summarize(conflicts: &[RuleConflict]) -> ConflictSummary {
    let mut summary = ConflictSummary {
        total: conflicts.len(),
        ..ConflictSummary::default()
    };
    for conflict in conflicts {
        match conflict.severity {
            Severity::High => summary.high += 1,
            Severity::Medium => summary.medium += 1,
            Severity::Low => summary.low += 1,
        }
    }
    summary
}

/// Wildcard categories share one key, since they match the same
/// transactions.
fn scope_key(rule: &CommissionRule) -> (PartyType, String) {
    let category = if rule.is_general_category() {
        String::new()
    } else {
        rule.category.clone()
    };
    (rule.rule_type, category)
}

fn category_label(rule: &CommissionRule) -> String {
    if rule.is_general_category() {
        "all categories".to_string()
    } else {
        format!("category '{}'", rule.category)
    }
}

fn owned(group: &[&CommissionRule]) -> Vec<CommissionRule> {
    group.iter().map(|r| (*r).clone()).collect()
}

/// Group rules by `key`, keeping groups and members in first-seen order.
fn group_by<'a, K, F>(rules: &[&'a CommissionRule], key: F) -> Vec<Vec<&'a CommissionRule>>
where
    K: Eq + Hash,
    F: Fn(&CommissionRule) -> K,
{
    let mut index: HashMap<K, usize> = HashMap::new();
    let mut groups: Vec<Vec<&'a CommissionRule>> = Vec::new();
    for &rule in rules {
        match index.entry(key(rule)) {
            Entry::Occupied(e) => groups[*e.get()].push(rule),
            Entry::Vacant(e) => {
                e.insert(groups.len());
                groups.push(vec![rule]);
            }
        }
    }
    groups
}

/// Lowercase, drop punctuation, split on whitespace and keep words of at
/// least [`MIN_TOKEN_LEN`] characters.
fn tokenize(text: &str) -> HashSet<String> {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    cleaned
        .split_whitespace()
        .filter(|w| w.chars().count() >= MIN_TOKEN_LEN)
        .map(str::to_string)
        .collect()
}
