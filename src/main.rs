//! Entry point for the Commission Engine binary.
//!
//! Running this binary will start an HTTP server that exposes the
//! commission calculator and conflict analyzer.  The directory holding
//! rule JSON files may be specified via the `COMMISSION_RULES_DIR`
//! environment variable; if unset the server looks for a `rules`
//! folder relative to the current working directory.  Time-based rates
//! are read from `COMMISSION_TIME_RATES_FILE` when set.

use commission_engine::config::{load_rules_from_dir, load_time_rates, EngineConfig};
use commission_engine::CommissionEngine;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = EngineConfig::from_env()?;
    let rules_dir =
        PathBuf::from(std::env::var("COMMISSION_RULES_DIR").unwrap_or_else(|_| "rules".to_string()));
    let rules = load_rules_from_dir(&rules_dir)?;
    let time_rates = match std::env::var("COMMISSION_TIME_RATES_FILE") {
        Ok(path) => load_time_rates(&PathBuf::from(path))?,
        Err(_) => Vec::new(),
    };

    let engine = CommissionEngine::new(rules)
        .with_config(config)
        .with_time_rates(time_rates);
    let conflicts = engine.analyze_conflicts();
    if !conflicts.is_empty() {
        log::warn!("loaded rule set has {} conflicts", conflicts.len());
    }

    let addr = std::env::var("COMMISSION_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string());
    commission_engine::api::serve(&addr, engine).await
}
