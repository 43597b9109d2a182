//! Commission computation engine.
//!
//! The `engine` module turns a [`Transaction`] into a
//! [`CommissionResult`] by applying every active [`CommissionRule`]
//! to it.  Rules are additive: each rule that applies contributes its
//! own calculation and the total is their sum.  Batch calculations use
//! the [`rayon`] crate to spread transactions across CPU cores while
//! keeping results in input order.

use crate::conflicts::ConflictAnalyzer;
use crate::config::EngineConfig;
use crate::models::{
    CommissionCalculation, CommissionResult, CommissionRule, RateType, RuleConflict,
    TimeBasedRate, Transaction,
};
use crate::rate::{matching_time_rates, resolve_rate, LocationMultiplier};
use rayon::prelude::*;
use std::sync::Arc;

/// A rule set together with the multipliers and settings used to
/// apply it.
#[derive(Clone, Default)]
pub struct CommissionEngine {
    rules: Vec<CommissionRule>,
    time_rates: Vec<TimeBasedRate>,
    config: EngineConfig,
    locations: Option<Arc<dyn LocationMultiplier>>,
}

impl std::fmt::Debug for CommissionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommissionEngine")
            .field("rules", &self.rules.len())
            .field("time_rates", &self.time_rates.len())
            .field("config", &self.config)
            .field("locations", &self.locations.is_some())
            .finish()
    }
}

impl CommissionEngine {
    pub fn new(rules: Vec<CommissionRule>) -> Self {
        Self {
            rules,
            ..Self::default()
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_time_rates(mut self, time_rates: Vec<TimeBasedRate>) -> Self {
        self.time_rates = time_rates;
        self
    }

    pub fn with_location_multipliers(mut self, locations: Arc<dyn LocationMultiplier>) -> Self {
        self.locations = Some(locations);
        self
    }

    pub fn rules(&self) -> &[CommissionRule] {
        &self.rules
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn set_rules(&mut self, rules: Vec<CommissionRule>) {
        self.rules = rules;
    }

    /// Apply every active rule to `transaction`.
    pub fn calculate_commission(&self, transaction: &Transaction) -> CommissionResult {
        let time_rates =
            matching_time_rates(&self.time_rates, transaction.date, &self.config.peak_hours);
        let time_multiplier: f64 = time_rates.iter().map(|r| r.rate_multiplier).product();
        let location = transaction.location_id.as_deref().and_then(|id| {
            self.locations
                .as_ref()
                .and_then(|l| l.multiplier(id))
                .filter(|m| m.is_finite() && *m >= 0.0)
                .map(|m| (id, m))
        });

        let mut calculations = Vec::new();
        for rule in self.rules.iter().filter(|r| r.is_active) {
            let Some(resolved) = resolve_rate(rule, transaction, &self.config) else {
                continue;
            };
            let rate = resolved.rate * time_multiplier;
            let mut commission = resolved.amount * time_multiplier;
            let mut details = describe(resolved.rate_type, resolved.rate, transaction, &self.config);
            if let Some(tier) = &resolved.tier {
                details.push_str(&format!(" (tier {})", tier));
            }
            for t in &time_rates {
                details.push_str(&format!(" x{} {}", t.rate_multiplier, t.name));
            }
            if let Some((id, m)) = location {
                commission *= m;
                details.push_str(&format!(" x{} location {}", m, id));
            }
            if !commission.is_finite() {
                log::debug!("rule {} skipped for {}: non-finite commission", rule.id, transaction.id);
                continue;
            }
            log::debug!(
                "rule {} applied to {}: {:.2} ({})",
                rule.id,
                transaction.id,
                commission,
                details
            );
            calculations.push(CommissionCalculation {
                rule_id: rule.id.clone(),
                rule_name: rule.name.clone(),
                rate_type: resolved.rate_type,
                rate,
                commission,
                details,
            });
        }

        let total_commission = calculations.iter().map(|c| c.commission).sum();
        let applicable_rules = calculations.len();
        CommissionResult {
            transaction: transaction.clone(),
            calculations,
            total_commission,
            applicable_rules,
        }
    }

    /// Calculate each transaction independently, preserving order.
    pub fn calculate_batch_commissions(&self, transactions: &[Transaction]) -> Vec<CommissionResult> {
        let results: Vec<CommissionResult> = transactions
            .par_iter()
            .map(|tx| self.calculate_commission(tx))
            .collect();
        log::debug!(
            "batch of {} transactions: total commission {:.2}",
            results.len(),
            results.iter().map(|r| r.total_commission).sum::<f64>()
        );
        results
    }

    /// Conflicts among this engine's rules, using its configured
    /// thresholds.
    pub fn analyze_conflicts(&self) -> Vec<RuleConflict> {
        ConflictAnalyzer::from_config(&self.config).analyze(&self.rules)
    }
}

fn describe(rate_type: RateType, rate: f64, tx: &Transaction, config: &EngineConfig) -> String {
    match rate_type {
        RateType::Fixed if config.fixed_per_unit => format!("Fixed {:.2} x {}", rate, tx.quantity),
        RateType::Fixed => format!("Fixed {:.2}", rate),
        RateType::Percentage | RateType::Tiered => format!("{}% of {:.2}", rate, tx.amount),
    }
}

/// Apply `rules` to one transaction with the default configuration.
pub fn calculate_commission(rules: &[CommissionRule], transaction: &Transaction) -> CommissionResult {
    CommissionEngine::new(rules.to_vec()).calculate_commission(transaction)
}

/// Apply `rules` to each transaction with the default configuration.
pub fn calculate_batch_commissions(
    rules: &[CommissionRule],
    transactions: &[Transaction],
) -> Vec<CommissionResult> {
    CommissionEngine::new(rules.to_vec()).calculate_batch_commissions(transactions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PartyType, TimeConditions};
    use chrono::NaiveDate;
    use std::collections::HashMap;

    fn tx(id: &str, amount: f64) -> Transaction {
        Transaction {
            id: id.into(),
            amount,
            quantity: 2,
            category: "surgery".into(),
            transaction_type: PartyType::Doctor,
            date: NaiveDate::from_ymd_opt(2024, 5, 6)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
            description: Some("Appendectomy".into()),
            location_id: None,
        }
    }

    fn rule(id: &str, rate_type: RateType, rate: f64) -> CommissionRule {
        CommissionRule {
            id: id.into(),
            name: format!("Rule {}", id),
            rule_type: PartyType::Doctor,
            rate_type,
            rate,
            min_amount: None,
            max_amount: None,
            category: "surgery".into(),
            conditions: String::new(),
            is_active: true,
            advanced_conditions: None,
        }
    }

    #[test]
    fn test_percentage_commission() {
        let result = calculate_commission(&[rule("a", RateType::Percentage, 15.0)], &tx("t", 10000.0));
        assert_eq!(result.total_commission, 1500.0);
        assert_eq!(result.applicable_rules, 1);
        assert_eq!(result.calculations[0].details, "15% of 10000.00");
    }

    #[test]
    fn test_rules_are_additive() {
        let rules = vec![
            rule("a", RateType::Percentage, 10.0),
            rule("b", RateType::Fixed, 50.0),
            rule("c", RateType::Percentage, 2.5),
        ];
        let t = tx("t", 2000.0);
        let all = calculate_commission(&rules, &t);
        assert_eq!(all.applicable_rules, 3);
        let parts: f64 = all.calculations.iter().map(|c| c.commission).sum();
        assert_eq!(all.total_commission, parts);
        assert_eq!(all.total_commission, 200.0 + 50.0 + 50.0);

        let without_b = calculate_commission(&[rules[0].clone(), rules[2].clone()], &t);
        assert_eq!(all.total_commission - without_b.total_commission, 50.0);
    }

    #[test]
    fn test_unmatched_and_inactive() {
        let mut inactive = rule("a", RateType::Percentage, 10.0);
        inactive.is_active = false;
        let mut lab = rule("b", RateType::Percentage, 10.0);
        lab.category = "lab".into();
        let result = calculate_commission(&[inactive, lab], &tx("t", 1000.0));
        assert!(result.calculations.is_empty());
        assert_eq!(result.total_commission, 0.0);
        assert_eq!(result.applicable_rules, 0);
    }

    #[test]
    fn test_idempotent() {
        let rules = vec![rule("a", RateType::Percentage, 7.3), rule("b", RateType::Fixed, 12.5)];
        let t = tx("t", 1234.56);
        let first = calculate_commission(&rules, &t);
        let second = calculate_commission(&rules, &t);
        assert_eq!(first, second);
        assert_eq!(first.total_commission.to_bits(), second.total_commission.to_bits());
    }

    #[test]
    fn test_batch_preserves_order() {
        let rules = vec![rule("a", RateType::Percentage, 10.0)];
        let txs: Vec<Transaction> = (1..=50).map(|i| tx(&format!("t{}", i), i as f64 * 100.0)).collect();
        let results = calculate_batch_commissions(&rules, &txs);
        assert_eq!(results.len(), 50);
        for (i, r) in results.iter().enumerate() {
            assert_eq!(r.transaction.id, format!("t{}", i + 1));
            assert_eq!(r.total_commission, (i as f64 + 1.0) * 10.0);
        }
    }

    #[test]
    fn test_fixed_per_unit_config() {
        let engine = CommissionEngine::new(vec![rule("a", RateType::Fixed, 50.0)])
            .with_config(EngineConfig { fixed_per_unit: true, ..EngineConfig::default() });
        let result = engine.calculate_commission(&tx("t", 999.0));
        assert_eq!(result.total_commission, 100.0);
        assert_eq!(result.calculations[0].details, "Fixed 50.00 x 2");
    }

    #[test]
    fn test_time_and_location_multipliers() {
        let peak = TimeBasedRate {
            id: "peak".into(),
            name: "Peak".into(),
            rate_multiplier: 2.0,
            is_active: true,
            conditions: Some(TimeConditions { is_peak_hour: true, ..TimeConditions::default() }),
        };
        let mut locations = HashMap::new();
        locations.insert("north".to_string(), 1.5);
        let engine = CommissionEngine::new(vec![rule("a", RateType::Percentage, 10.0)])
            .with_time_rates(vec![peak])
            .with_location_multipliers(Arc::new(locations));

        let mut t = tx("t", 1000.0);
        let result = engine.calculate_commission(&t);
        assert_eq!(result.calculations[0].rate, 20.0);
        assert_eq!(result.total_commission, 200.0);

        t.location_id = Some("north".into());
        let result = engine.calculate_commission(&t);
        assert_eq!(result.total_commission, 300.0);
        assert_eq!(result.calculations[0].details, "10% of 1000.00 x2 Peak x1.5 location north");

        t.date = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap().and_hms_opt(20, 0, 0).unwrap();
        t.location_id = Some("south".into());
        assert_eq!(engine.calculate_commission(&t).total_commission, 100.0);
    }
}
