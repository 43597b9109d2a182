//! Error types for the commission engine.
//!
//! Calculation and conflict analysis never fail; these errors surface
//! only when rules are validated, predicates are compiled, or
//! configuration and rule files are loaded.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Rule '{rule_id}' has minAmount {min} greater than maxAmount {max}")]
    InvertedRange { rule_id: String, min: f64, max: f64 },

    #[error("Rule '{rule_id}' has non-finite amount bound {bound}")]
    InvalidAmountBound { rule_id: String, bound: f64 },

    #[error("Rule '{rule_id}' has invalid rate {rate}: rates must be finite and non-negative")]
    InvalidRate { rule_id: String, rate: f64 },

    #[error("Condition '{condition_id}' is malformed: {reason}")]
    InvalidCondition {
        condition_id: String,
        reason: ConditionError,
    },

    #[error("Invalid configuration value for {key}: '{value}'")]
    InvalidConfig { key: String, value: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reasons a [`ConditionRule`](crate::models::ConditionRule) cannot be
/// compiled into a typed predicate.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConditionError {
    #[error("operator 'between' requires a secondValue")]
    MissingSecondValue,

    #[error("operator '{operator}' is not supported on text field '{field}'")]
    UnsupportedTextOperator { field: String, operator: String },

    #[error("value '{0}' is not a number")]
    NotNumeric(String),

    #[error("value must be finite")]
    NonFinite,
}

pub type EngineResult<T> = Result<T, EngineError>;
