//! Declarative quota and limiter configuration.
//!
//! Quota definitions come from configuration owned by the surrounding system.
//! This module only parses them and runs them through the same validation as
//! [`Quota::new`], so an invalid definition fails at load time rather than on
//! the first request.
//!
//! ```rust
//! use windowquota::config::load_quotas;
//!
//! let quotas = load_quotas(r#"[
//!     {"window_seconds": 60, "granularity_seconds": 1, "limit": 100},
//!     {"window_seconds": 3600, "granularity_seconds": 60, "limit": 1000, "prefix_override": "org:1"}
//! ]"#).unwrap();
//! assert_eq!(quotas.len(), 2);
//! assert_eq!(quotas[1].prefix_override(), Some("org:1"));
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::QuotaError;
use crate::quota::Quota;
use crate::timeout::DEFAULT_STORE_TIMEOUT;

/// Errors raised while loading configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// Input was not valid JSON for the expected shape.
    #[error("malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),
    /// Input parsed but a value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Serialized form of a [`Quota`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuotaConfig {
    pub window_seconds: u64,
    pub granularity_seconds: u64,
    pub limit: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_override: Option<String>,
}

impl TryFrom<QuotaConfig> for Quota {
    type Error = QuotaError;

    fn try_from(config: QuotaConfig) -> Result<Self, Self::Error> {
        let quota = Quota::new(config.window_seconds, config.granularity_seconds, config.limit)?;
        Ok(match config.prefix_override {
            Some(prefix) => quota.with_prefix_override(prefix),
            None => quota,
        })
    }
}

impl From<Quota> for QuotaConfig {
    fn from(quota: Quota) -> Self {
        Self {
            window_seconds: quota.window_seconds(),
            granularity_seconds: quota.granularity_seconds(),
            limit: quota.limit(),
            prefix_override: quota.prefix_override().map(str::to_owned),
        }
    }
}

/// Parse a JSON array of quota definitions.
pub fn load_quotas(json: &str) -> Result<Vec<Quota>, ConfigError> {
    Ok(serde_json::from_str(json)?)
}

/// Limiter settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimiterConfig {
    /// Bound on one store round trip, milliseconds. Must be positive.
    pub store_timeout_ms: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self { store_timeout_ms: DEFAULT_STORE_TIMEOUT.as_millis() as u64 }
    }
}

impl LimiterConfig {
    /// Parse and validate limiter settings; missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store_timeout_ms == 0 {
            return Err(ConfigError::Invalid("store_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}
