//! Engine configuration and rule loading.
//!
//! Configuration is plain data with defaults for every field, so it
//! can be built in code, read from JSON, or taken from `COMMISSION_*`
//! environment variables.  Rules are loaded from a directory of JSON
//! files, one rule or an array of rules per file.

use crate::error::{EngineError, EngineResult};
use crate::models::{CommissionRule, TimeBasedRate};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Conflict analysis reports condition similarity at or above this
/// many shared words.
pub const DEFAULT_MIN_SHARED_TOKENS: usize = 2;
/// Words shorter than this are ignored by condition similarity.
pub const MIN_TOKEN_LEN: usize = 4;
/// Percentage-point spread above which rate variance is reported.
pub const DEFAULT_RATE_VARIANCE_THRESHOLD: f64 = 20.0;

/// The daily window considered "peak" by time-based rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeakHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Default for PeakHours {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
            end: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Multiply fixed rates by transaction quantity.  Off by default:
    /// a fixed rate is a flat amount per transaction.
    pub fixed_per_unit: bool,
    pub peak_hours: PeakHours,
    pub rate_variance_threshold: f64,
    pub min_shared_tokens: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fixed_per_unit: false,
            peak_hours: PeakHours::default(),
            rate_variance_threshold: DEFAULT_RATE_VARIANCE_THRESHOLD,
            min_shared_tokens: DEFAULT_MIN_SHARED_TOKENS,
        }
    }
}

impl EngineConfig {
    /// Build a configuration from `COMMISSION_*` environment variables,
    /// keeping defaults for any that are unset.
    pub fn from_env() -> EngineResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`EngineConfig::from_env`] but reads values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> EngineResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = lookup("COMMISSION_FIXED_PER_UNIT") {
            config.fixed_per_unit = match v.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => return Err(invalid("COMMISSION_FIXED_PER_UNIT", &v)),
            };
        }
        if let Some(v) = lookup("COMMISSION_PEAK_START") {
            config.peak_hours.start =
                parse_clock(&v).ok_or_else(|| invalid("COMMISSION_PEAK_START", &v))?;
        }
        if let Some(v) = lookup("COMMISSION_PEAK_END") {
            config.peak_hours.end =
                parse_clock(&v).ok_or_else(|| invalid("COMMISSION_PEAK_END", &v))?;
        }
        if let Some(v) = lookup("COMMISSION_RATE_VARIANCE") {
            config.rate_variance_threshold = v
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|t| t.is_finite() && *t >= 0.0)
                .ok_or_else(|| invalid("COMMISSION_RATE_VARIANCE", &v))?;
        }
        if let Some(v) = lookup("COMMISSION_MIN_SHARED_TOKENS") {
            config.min_shared_tokens = v
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| invalid("COMMISSION_MIN_SHARED_TOKENS", &v))?;
        }
        Ok(config)
    }
}

fn invalid(key: &str, value: &str) -> EngineError {
    EngineError::InvalidConfig {
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// Parse `HH:MM` or `HH:MM:SS`.
pub fn parse_clock(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RuleFile {
    Many(Vec<CommissionRule>),
    One(CommissionRule),
}

/// Load all commission rules from a directory.
///
/// Every `.json` file may hold a single rule or an array of rules.
/// Files that fail to parse and rules that fail
/// [`CommissionRule::validate`] are skipped with a warning.  A missing
/// directory yields no rules.
pub fn load_rules_from_dir(path: &Path) -> EngineResult<Vec<CommissionRule>> {
    let mut rules = Vec::new();
    if !path.is_dir() {
        log::warn!("rules directory {:?} does not exist", path);
        return Ok(rules);
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let file = entry.path();
        if entry.file_type()?.is_file() && file.extension().map_or(false, |ext| ext == "json") {
            files.push(file);
        }
    }
    // read_dir order is platform dependent
    files.sort();
    for file in files {
        let data = std::fs::read_to_string(&file)?;
        let parsed = match serde_json::from_str::<RuleFile>(&data) {
            Ok(RuleFile::Many(many)) => many,
            Ok(RuleFile::One(one)) => vec![one],
            Err(err) => {
                log::warn!("Failed to parse rule file {:?}: {}", file, err);
                continue;
            }
        };
        for rule in parsed {
            match rule.validate() {
                Ok(()) => rules.push(rule),
                Err(err) => log::warn!("Skipping rule from {:?}: {}", file, err),
            }
        }
    }
    log::info!("loaded {} commission rules from {:?}", rules.len(), path);
    Ok(rules)
}

/// Load time-based rates from a JSON array file.
pub fn load_time_rates(path: &Path) -> EngineResult<Vec<TimeBasedRate>> {
    let data = std::fs::read_to_string(path)?;
    let rates: Vec<TimeBasedRate> = serde_json::from_str(&data)?;
    log::info!("loaded {} time-based rates from {:?}", rates.len(), path);
    Ok(rates)
}
