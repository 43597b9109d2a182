//! Advanced condition evaluation.
//!
//! A [`ConditionRule`] is loosely typed as it arrives from the
//! condition builder.  [`Predicate::compile`] turns it into a closed
//! set of field/operator combinations, rejecting the ones that make no
//! sense (ordering on text, `between` without an upper bound).  The
//! evaluator treats any rejected condition as not satisfied.

use crate::error::ConditionError;
use crate::models::{
    ConditionField, ConditionOperator, ConditionRule, ConditionValue, LogicGroup, Logic,
    Transaction,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericField {
    Amount,
    Quantity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextField {
    Category,
    Type,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumericOp {
    Gt(f64),
    Gte(f64),
    Lt(f64),
    Lte(f64),
    Eq(f64),
    Neq(f64),
    /// Inclusive at both ends.
    Between(f64, f64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TextOp {
    Eq(String),
    Neq(String),
}

/// A well-formed condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Numeric(NumericField, NumericOp),
    Text(TextField, TextOp),
}

impl Predicate {
    pub fn compile(condition: &ConditionRule) -> Result<Self, ConditionError> {
        match condition.field {
            ConditionField::Amount => compile_numeric(NumericField::Amount, condition),
            ConditionField::Quantity => compile_numeric(NumericField::Quantity, condition),
            ConditionField::Category => compile_text(TextField::Category, condition),
            ConditionField::Type => compile_text(TextField::Type, condition),
        }
    }

    pub fn test(&self, transaction: &Transaction) -> bool {
        match self {
            Predicate::Numeric(field, op) => {
                let x = match field {
                    NumericField::Amount => transaction.amount,
                    NumericField::Quantity => f64::from(transaction.quantity),
                };
                match *op {
                    NumericOp::Gt(v) => x > v,
                    NumericOp::Gte(v) => x >= v,
                    NumericOp::Lt(v) => x < v,
                    NumericOp::Lte(v) => x <= v,
                    NumericOp::Eq(v) => x == v,
                    NumericOp::Neq(v) => x != v,
                    NumericOp::Between(low, high) => low <= x && x <= high,
                }
            }
            Predicate::Text(field, op) => {
                let x = match field {
                    TextField::Category => transaction.category.as_str(),
                    TextField::Type => transaction.transaction_type.as_str(),
                };
                match op {
                    TextOp::Eq(v) => x == v,
                    TextOp::Neq(v) => x != v,
                }
            }
        }
    }
}

fn numeric_operand(value: &ConditionValue) -> Result<f64, ConditionError> {
    let n = match value {
        ConditionValue::Number(n) => *n,
        ConditionValue::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ConditionError::NotNumeric(s.clone()))?,
    };
    if n.is_finite() {
        Ok(n)
    } else {
        Err(ConditionError::NonFinite)
    }
}

fn text_operand(value: &ConditionValue) -> String {
    match value {
        ConditionValue::Number(n) => n.to_string(),
        ConditionValue::Text(s) => s.clone(),
    }
}

fn compile_numeric(field: NumericField, condition: &ConditionRule) -> Result<Predicate, ConditionError> {
    let v = numeric_operand(&condition.value)?;
    let op = match condition.operator {
        ConditionOperator::Gt => NumericOp::Gt(v),
        ConditionOperator::Gte => NumericOp::Gte(v),
        ConditionOperator::Lt => NumericOp::Lt(v),
        ConditionOperator::Lte => NumericOp::Lte(v),
        ConditionOperator::Eq => NumericOp::Eq(v),
        ConditionOperator::Neq => NumericOp::Neq(v),
        ConditionOperator::Between => {
            let high = condition
                .second_value
                .as_ref()
                .ok_or(ConditionError::MissingSecondValue)?;
            NumericOp::Between(v, numeric_operand(high)?)
        }
    };
    Ok(Predicate::Numeric(field, op))
}

fn compile_text(field: TextField, condition: &ConditionRule) -> Result<Predicate, ConditionError> {
    let v = text_operand(&condition.value);
    let op = match condition.operator {
        ConditionOperator::Eq => TextOp::Eq(v),
        ConditionOperator::Neq => TextOp::Neq(v),
        other => {
            return Err(ConditionError::UnsupportedTextOperator {
                field: format!("{:?}", field).to_lowercase(),
                operator: format!("{:?}", other).to_lowercase(),
            })
        }
    };
    Ok(Predicate::Text(field, op))
}

/// Evaluate a single condition against a transaction.  Malformed
/// conditions evaluate to `false`.
pub fn evaluate(condition: &ConditionRule, transaction: &Transaction) -> bool {
    match Predicate::compile(condition) {
        Ok(predicate) => predicate.test(transaction),
        Err(err) => {
            log::trace!("condition {} ignored: {}", condition.id, err);
            false
        }
    }
}

impl LogicGroup {
    /// Whether the group as a whole is satisfied.  An empty group
    /// imposes no constraint.
    pub fn matches(&self, transaction: &Transaction) -> bool {
        if self.conditions.is_empty() {
            return true;
        }
        match self.logic {
            Logic::And => self.conditions.iter().all(|c| evaluate(c, transaction)),
            Logic::Or => self.conditions.iter().any(|c| evaluate(c, transaction)),
        }
    }

    /// The first condition, in order, that the transaction satisfies.
    pub fn first_match(&self, transaction: &Transaction) -> Option<&ConditionRule> {
        self.conditions.iter().find(|c| evaluate(c, transaction))
    }
}
