//! Commission Engine library crate.
//!
//! This crate exposes the commission calculator, the rule conflict
//! analyzer and an HTTP API as reusable modules.  External
//! applications may depend on the `commission_engine` crate and call
//! into [`engine::CommissionEngine`] directly or embed the API via
//! `api::build_router`.

pub mod models;
pub mod error;
pub mod config;
pub mod condition;
pub mod rate;
pub mod engine;
pub mod conflicts;
pub mod api;

pub use conflicts::{analyze_rule_conflicts, ConflictAnalyzer};
pub use engine::{calculate_batch_commissions, calculate_commission, CommissionEngine};
pub use error::{EngineError, EngineResult};
