//! Data models for the Commission Engine.
//!
//! The `models` module defines the serialisable rules, conditions,
//! transactions and results that flow through the engine.  Field names
//! follow the camelCase JSON produced by the rule management screens
//! so that rule definitions can be passed in unchanged.

use crate::condition::Predicate;
use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

/// Who a rule (or transaction) pays out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartyType {
    Doctor,
    Agent,
    Department,
}

impl PartyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartyType::Doctor => "doctor",
            PartyType::Agent => "agent",
            PartyType::Department => "department",
        }
    }
}

/// The pricing model of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateType {
    /// `rate` is a percent of the transaction amount.
    Percentage,
    /// `rate` is a currency amount.
    Fixed,
    /// Rate selected by the rule's advanced conditions, falling back to
    /// `rate` as a percentage.
    Tiered,
}

/// A configured commission policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionRule {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub rule_type: PartyType,
    pub rate_type: RateType,
    pub rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_amount: Option<f64>,
    /// Matched exactly against the transaction category.  Empty or
    /// `general` matches every category.
    #[serde(default)]
    pub category: String,
    /// Free-text description of when the rule applies.  Never
    /// evaluated; only inspected by the conflict analyzer.
    #[serde(default)]
    pub conditions: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advanced_conditions: Option<LogicGroup>,
}

impl CommissionRule {
    /// True when the rule's category is a wildcard.
    pub fn is_general_category(&self) -> bool {
        let category = self.category.trim();
        category.is_empty() || category.eq_ignore_ascii_case("general")
    }

    /// Check the invariants the engine relies on.
    ///
    /// The engine never calls this itself (an invalid rule just fails to
    /// apply), but rule loaders and editors should reject rules that do
    /// not validate.
    pub fn validate(&self) -> EngineResult<()> {
        if !self.rate.is_finite() || self.rate < 0.0 {
            return Err(EngineError::InvalidRate {
                rule_id: self.id.clone(),
                rate: self.rate,
            });
        }
        for bound in [self.min_amount, self.max_amount].into_iter().flatten() {
            if !bound.is_finite() {
                return Err(EngineError::InvalidAmountBound {
                    rule_id: self.id.clone(),
                    bound,
                });
            }
        }
        if let (Some(min), Some(max)) = (self.min_amount, self.max_amount) {
            if min > max {
                return Err(EngineError::InvertedRange {
                    rule_id: self.id.clone(),
                    min,
                    max,
                });
            }
        }
        if let Some(group) = &self.advanced_conditions {
            for condition in &group.conditions {
                Predicate::compile(condition).map_err(|reason| EngineError::InvalidCondition {
                    condition_id: condition.id.clone(),
                    reason,
                })?;
                if let Some(over) = &condition.rate_override {
                    if !over.rate.is_finite() || over.rate < 0.0 {
                        return Err(EngineError::InvalidRate {
                            rule_id: self.id.clone(),
                            rate: over.rate,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_quantity() -> u32 {
    1
}

/// Parse a transaction timestamp: RFC 3339 (local wall-clock time is
/// kept, the offset dropped), a plain ISO date-time, or a bare date at
/// midnight.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    if let Ok(dt) = s.parse::<NaiveDateTime>() {
        return Some(dt);
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", raw)))
}

/// How the conditions of a [`LogicGroup`] combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Logic {
    And,
    Or,
}

/// A set of advanced conditions combined with AND or OR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicGroup {
    pub logic: Logic,
    #[serde(default)]
    pub conditions: Vec<ConditionRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionField {
    Amount,
    Quantity,
    Category,
    Type,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionOperator {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Neq,
    Between,
}

/// A comparison operand as entered in the condition builder: either a
/// number or a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    Number(f64),
    Text(String),
}

/// Rate applied when the owning condition is the first to match.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateOverride {
    pub rate_type: RateType,
    pub rate: f64,
}

/// A single predicate over a transaction field, as stored in a rule.
/// See [`Predicate`] for the compiled form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionRule {
    pub id: String,
    pub field: ConditionField,
    pub operator: ConditionOperator,
    pub value: ConditionValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub second_value: Option<ConditionValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_override: Option<RateOverride>,
}

/// A multiplier applied to resolved rates when the transaction time
/// falls inside its window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeBasedRate {
    pub id: String,
    pub name: String,
    pub rate_multiplier: f64,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<TimeConditions>,
}

/// Time window of a [`TimeBasedRate`].  Unset fields impose no
/// constraint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeConditions {
    /// `HH:MM`, inclusive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    /// `HH:MM`, inclusive.  Earlier than `start_time` means the window
    /// wraps past midnight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    /// 0 = Sunday .. 6 = Saturday.  Empty means every day.
    #[serde(default)]
    pub days_of_week: Vec<u8>,
    #[serde(default)]
    pub is_weekend: bool,
    #[serde(default)]
    pub is_peak_hour: bool,
}

/// A billable event that may earn commission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub amount: f64,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    pub category: String,
    #[serde(rename = "type")]
    pub transaction_type: PartyType,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub date: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Hospital location the transaction was booked at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,
}

/// The contribution of one rule to a [`CommissionResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionCalculation {
    pub rule_id: String,
    pub rule_name: String,
    /// Either `percentage` or `fixed`; tiers resolve to one of these.
    pub rate_type: RateType,
    /// Effective rate after time-based multipliers.
    pub rate: f64,
    pub commission: f64,
    pub details: String,
}

/// Commission owed for one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionResult {
    pub transaction: Transaction,
    pub calculations: Vec<CommissionCalculation>,
    pub total_commission: f64,
    pub applicable_rules: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictType {
    Overlap,
    Duplicate,
    Hierarchy,
    Condition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    /// Sort rank; higher is more severe.
    pub fn rank(&self) -> u8 {
        match self {
            Severity::High => 3,
            Severity::Medium => 2,
            Severity::Low => 1,
        }
    }
}

/// An ambiguity or inconsistency among active rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConflict {
    #[serde(rename = "type")]
    pub conflict_type: ConflictType,
    pub severity: Severity,
    pub rules: Vec<CommissionRule>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl RuleConflict {
    /// Ids of the implicated rules, in the order they are listed.
    pub fn rule_ids(&self) -> Vec<String> {
        self.rules.iter().map(|r| r.id.clone()).collect()
    }
}

/// Conflict counts by severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictSummary {
    pub total: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule_json() -> serde_json::Value {
        json!({
            "id": "r1",
            "name": "Standard Consultation",
            "type": "doctor",
            "rateType": "percentage",
            "rate": 15,
            "minAmount": 1000,
            "maxAmount": 5000,
            "category": "consultation",
            "conditions": "Applies to all outpatient consultations",
            "isActive": true,
            "advancedConditions": {
                "logic": "AND",
                "conditions": [
                    { "id": "c1", "field": "amount", "operator": "between", "value": 1000, "secondValue": "5000" }
                ]
            }
        })
    }

    #[test]
    fn test_rule_deserialises_from_ui_json() {
        let rule: CommissionRule = serde_json::from_value(rule_json()).unwrap();
        assert_eq!(rule.rule_type, PartyType::Doctor);
        assert_eq!(rule.rate_type, RateType::Percentage);
        assert_eq!(rule.max_amount, Some(5000.0));
        let group = rule.advanced_conditions.as_ref().unwrap();
        assert_eq!(group.logic, Logic::And);
        assert_eq!(group.conditions[0].second_value, Some(ConditionValue::Text("5000".into())));
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn test_missing_optional_fields_take_defaults() {
        let rule: CommissionRule = serde_json::from_value(json!({
            "id": "r2", "name": "Agent referral", "type": "agent", "rateType": "fixed", "rate": 50
        }))
        .unwrap();
        assert!(rule.is_active);
        assert!(rule.is_general_category());
        assert!(rule.advanced_conditions.is_none());

        let tx: Transaction = serde_json::from_value(json!({
            "id": "t1", "amount": 200.0, "category": "lab", "type": "agent", "date": "2024-03-04T10:15:00"
        }))
        .unwrap();
        assert_eq!(tx.quantity, 1);
        assert!(tx.location_id.is_none());
    }

    fn transaction_at(date: &str) -> Result<Transaction, serde_json::Error> {
        serde_json::from_value(json!({
            "id": "t1", "amount": 200.0, "category": "lab", "type": "agent", "date": date
        }))
    }

    #[test]
    fn test_transaction_date_forms() {
        let ten = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap().and_hms_opt(10, 0, 0).unwrap();
        assert_eq!(transaction_at("2024-05-06T10:00:00").unwrap().date, ten);
        assert_eq!(transaction_at("2024-05-06T10:00:00.000Z").unwrap().date, ten);
        assert_eq!(transaction_at("2024-05-06T10:00:00+05:30").unwrap().date, ten);
        let midnight = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap().and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(transaction_at("2024-05-06").unwrap().date, midnight);
        assert!(transaction_at("next tuesday").is_err());
    }

    #[test]
    fn test_transaction_date_serialises_back() {
        let tx = transaction_at("2024-05-06T10:00:00.000Z").unwrap();
        let again: Transaction = serde_json::from_value(serde_json::to_value(&tx).unwrap()).unwrap();
        assert_eq!(again.date, tx.date);
    }

    #[test]
    fn test_validate_rejects_non_finite_bounds() {
        let mut rule: CommissionRule = serde_json::from_value(rule_json()).unwrap();
        rule.min_amount = Some(f64::NAN);
        assert!(matches!(rule.validate(), Err(EngineError::InvalidAmountBound { .. })));

        let mut rule: CommissionRule = serde_json::from_value(rule_json()).unwrap();
        rule.max_amount = Some(f64::INFINITY);
        assert!(matches!(rule.validate(), Err(EngineError::InvalidAmountBound { .. })));
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let mut rule: CommissionRule = serde_json::from_value(rule_json()).unwrap();
        rule.min_amount = Some(6000.0);
        assert!(matches!(rule.validate(), Err(EngineError::InvertedRange { .. })));
    }

    #[test]
    fn test_validate_rejects_bad_rate_and_condition() {
        let mut rule: CommissionRule = serde_json::from_value(rule_json()).unwrap();
        rule.rate = f64::NAN;
        assert!(matches!(rule.validate(), Err(EngineError::InvalidRate { .. })));

        let mut rule: CommissionRule = serde_json::from_value(rule_json()).unwrap();
        rule.advanced_conditions.as_mut().unwrap().conditions[0].second_value = None;
        assert!(matches!(rule.validate(), Err(EngineError::InvalidCondition { .. })));
    }

    #[test]
    fn test_severity_rank_order() {
        assert!(Severity::High.rank() > Severity::Medium.rank());
        assert!(Severity::Medium.rank() > Severity::Low.rank());
    }
}
