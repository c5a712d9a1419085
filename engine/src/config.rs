//! Engine configuration
//!
//! Defaults mirror the product latency budgets. Hosts may override them from
//! the environment or a TOML file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

impl From<ConfigError> for crate::error::EngineError {
    fn from(err: ConfigError) -> Self {
        crate::error::EngineError::invalid_input(err.to_string())
    }
}

/// Tunables for the crisis engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hard deadline for every crisis-path action
    pub action_deadline_ms: u64,
    /// Fallback read latency above which a warning is logged
    pub fallback_latency_warn_ms: u64,
    /// Entries kept in the timed executor's performance log
    pub perf_log_capacity: usize,
    /// Integration events retained for review
    pub integration_log_capacity: usize,
    /// Crisis events retained in the ledger
    pub ledger_capacity: usize,
    /// Interval between fallback health checks
    pub health_check_interval_secs: u64,
    /// Interval between integration log reviews
    pub log_review_interval_secs: u64,
    /// Where the JSON ledger repository lives
    pub state_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            action_deadline_ms: 200,
            fallback_latency_warn_ms: 300,
            perf_log_capacity: 100,
            integration_log_capacity: 1000,
            ledger_capacity: 200,
            health_check_interval_secs: 60,
            log_review_interval_secs: 300,
            state_path: PathBuf::from(".crisis-ledger.json"),
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with `CRISIS_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ms) = env_parse("CRISIS_ACTION_DEADLINE_MS") {
            config.action_deadline_ms = ms;
        }
        if let Some(ms) = env_parse("CRISIS_FALLBACK_WARN_MS") {
            config.fallback_latency_warn_ms = ms;
        }
        if let Some(n) = env_parse("CRISIS_PERF_LOG_CAPACITY") {
            config.perf_log_capacity = n;
        }
        if let Some(n) = env_parse("CRISIS_INTEGRATION_LOG_CAPACITY") {
            config.integration_log_capacity = n;
        }
        if let Some(n) = env_parse("CRISIS_LEDGER_CAPACITY") {
            config.ledger_capacity = n;
        }
        if let Some(secs) = env_parse("CRISIS_HEALTH_INTERVAL_SECS") {
            config.health_check_interval_secs = secs;
        }
        if let Some(secs) = env_parse("CRISIS_LOG_REVIEW_INTERVAL_SECS") {
            config.log_review_interval_secs = secs;
        }
        if let Ok(path) = std::env::var("CRISIS_STATE_PATH") {
            config.state_path = PathBuf::from(path);
        }

        config
    }

    /// Parse a TOML file; missing keys keep their defaults
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would disable a safety budget
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(&'static str, u64); 7] = [
            ("action_deadline_ms", self.action_deadline_ms),
            ("fallback_latency_warn_ms", self.fallback_latency_warn_ms),
            ("perf_log_capacity", self.perf_log_capacity as u64),
            ("integration_log_capacity", self.integration_log_capacity as u64),
            ("ledger_capacity", self.ledger_capacity as u64),
            ("health_check_interval_secs", self.health_check_interval_secs),
            ("log_review_interval_secs", self.log_review_interval_secs),
        ];
        for (field, value) in checks {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    message: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn action_deadline(&self) -> Duration {
        Duration::from_millis(self.action_deadline_ms)
    }

    pub fn fallback_latency_warn(&self) -> Duration {
        Duration::from_millis(self.fallback_latency_warn_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn log_review_interval(&self) -> Duration {
        Duration::from_secs(self.log_review_interval_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse().ok()
}
