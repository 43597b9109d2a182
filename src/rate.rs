//! Rate resolution.
//!
//! Turns a rule and a transaction into the effective rate and the
//! commission amount it produces, after checking the rule's type,
//! category, amount range and advanced conditions.  Time-based and
//! location multipliers are layered on top by the engine.

use crate::config::{parse_clock, EngineConfig, PeakHours};
use crate::models::{CommissionRule, RateType, TimeBasedRate, Transaction};
use chrono::{Datelike, NaiveDateTime, NaiveTime, Weekday};
use std::collections::HashMap;

/// The outcome of applying one rule to one transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRate {
    /// `Percentage` or `Fixed`.
    pub rate_type: RateType,
    pub rate: f64,
    pub amount: f64,
    /// Id of the advanced condition that supplied the rate, if any.
    pub tier: Option<String>,
}

/// Scales commission by the location a transaction was booked at.
///
/// Lookups must be thread-safe (`Send + Sync`) because batch
/// calculation runs across multiple threads.
pub trait LocationMultiplier: Send + Sync {
    /// Multiplier for `location_id`, or `None` to leave the amount as is.
    fn multiplier(&self, location_id: &str) -> Option<f64>;
}

impl LocationMultiplier for HashMap<String, f64> {
    fn multiplier(&self, location_id: &str) -> Option<f64> {
        self.get(location_id).copied()
    }
}

/// Type, category and amount-range gates.
pub fn passes_gates(rule: &CommissionRule, transaction: &Transaction) -> bool {
    if rule.rule_type != transaction.transaction_type {
        return false;
    }
    if !rule.is_general_category() && rule.category != transaction.category {
        return false;
    }
    // negated comparisons so that NaN on either side fails the gate
    if let Some(min) = rule.min_amount {
        if !(transaction.amount >= min) {
            return false;
        }
    }
    if let Some(max) = rule.max_amount {
        if !(transaction.amount <= max) {
            return false;
        }
    }
    true
}

/// Resolve the commission a single rule earns on a transaction, or
/// `None` if the rule does not apply.
///
/// Tiered rules use their advanced conditions only to pick a tier; any
/// other rule with advanced conditions applies only when the group is
/// satisfied.
pub fn resolve_rate(
    rule: &CommissionRule,
    transaction: &Transaction,
    config: &EngineConfig,
) -> Option<ResolvedRate> {
    if !passes_gates(rule, transaction) {
        return None;
    }

    let mut rate_type = rule.rate_type;
    let mut rate = rule.rate;
    let mut tier = None;

    if let Some(group) = &rule.advanced_conditions {
        if rule.rate_type != RateType::Tiered && !group.matches(transaction) {
            return None;
        }
        let chosen = match rule.rate_type {
            RateType::Tiered => group
                .conditions
                .iter()
                .filter(|c| c.rate_override.is_some())
                .find(|c| crate::condition::evaluate(c, transaction)),
            _ => group.first_match(transaction),
        };
        if let Some(condition) = chosen {
            if let Some(over) = condition.rate_override {
                rate_type = over.rate_type;
                rate = over.rate;
                tier = Some(condition.id.clone());
            }
        }
    }

    if rate_type == RateType::Tiered {
        rate_type = RateType::Percentage;
    }
    if !rate.is_finite() || rate < 0.0 {
        return None;
    }

    let amount = commission_amount(rate_type, rate, transaction, config);
    if !amount.is_finite() {
        return None;
    }
    Some(ResolvedRate {
        rate_type,
        rate,
        amount,
        tier,
    })
}

/// Amount earned at `rate` of the given (non-tiered) type.
pub fn commission_amount(
    rate_type: RateType,
    rate: f64,
    transaction: &Transaction,
    config: &EngineConfig,
) -> f64 {
    match rate_type {
        RateType::Fixed if config.fixed_per_unit => rate * f64::from(transaction.quantity),
        RateType::Fixed => rate,
        RateType::Percentage | RateType::Tiered => transaction.amount * rate / 100.0,
    }
}

fn in_window(t: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start <= end {
        start <= t && t <= end
    } else {
        t >= start || t <= end
    }
}

impl TimeBasedRate {
    /// Whether this rate's time conditions hold at `at`.  Inactive
    /// rates and unusable multipliers never match.
    pub fn matches(&self, at: NaiveDateTime, peak: &PeakHours) -> bool {
        if !self.is_active || !self.rate_multiplier.is_finite() || self.rate_multiplier < 0.0 {
            return false;
        }
        let Some(cond) = &self.conditions else {
            return true;
        };
        let time = at.time();
        let weekday = at.weekday();

        let start = cond.start_time.as_deref().map(parse_clock);
        let end = cond.end_time.as_deref().map(parse_clock);
        match (start, end) {
            // an unparsable bound makes the window unusable
            (Some(None), _) | (_, Some(None)) => return false,
            (Some(Some(s)), Some(Some(e))) => {
                if !in_window(time, s, e) {
                    return false;
                }
            }
            (Some(Some(s)), None) => {
                if time < s {
                    return false;
                }
            }
            (None, Some(Some(e))) => {
                if time > e {
                    return false;
                }
            }
            (None, None) => {}
        }

        if !cond.days_of_week.is_empty() {
            let day = weekday.num_days_from_sunday() as u8;
            if !cond.days_of_week.contains(&day) {
                return false;
            }
        }
        if cond.is_weekend && !matches!(weekday, Weekday::Sat | Weekday::Sun) {
            return false;
        }
        if cond.is_peak_hour && !in_window(time, peak.start, peak.end) {
            return false;
        }
        true
    }
}

/// Active time-based rates that apply at `at`, in input order.
pub fn matching_time_rates<'a>(
    rates: &'a [TimeBasedRate],
    at: NaiveDateTime,
    peak: &PeakHours,
) -> Vec<&'a TimeBasedRate> {
    rates.iter().filter(|r| r.matches(at, peak)).collect()
}
