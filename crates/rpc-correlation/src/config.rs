//! Engine configuration with validation.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::warn;

/// Default reaper sweep period (30s)
pub const DEFAULT_REAPER_INTERVAL_MS: u64 = 30_000;
/// Default forced expiry age (300s)
pub const DEFAULT_MAX_RECORD_AGE_MS: u64 = 300_000;
/// Default wait when the caller passes no timeout (5s)
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Correlation engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Reaper sweep period in milliseconds
    pub reaper_interval_ms: u64,
    /// Age in milliseconds after which any record is expired
    pub max_record_age_ms: u64,
    /// Wait timeout in milliseconds used when the caller supplies none
    pub default_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reaper_interval_ms: DEFAULT_REAPER_INTERVAL_MS,
            max_record_age_ms: DEFAULT_MAX_RECORD_AGE_MS,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl EngineConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `RPC_REAPER_INTERVAL_MS`: reaper period (default: 30000)
    /// - `RPC_MAX_RECORD_AGE_MS`: forced expiry age (default: 300000)
    /// - `RPC_DEFAULT_TIMEOUT_MS`: default wait timeout (default: 5000)
    ///
    /// Missing or unparseable values fall back to the defaults.
    pub fn from_env() -> Self {
        Self {
            reaper_interval_ms: env_millis("RPC_REAPER_INTERVAL_MS", DEFAULT_REAPER_INTERVAL_MS),
            max_record_age_ms: env_millis("RPC_MAX_RECORD_AGE_MS", DEFAULT_MAX_RECORD_AGE_MS),
            default_timeout_ms: env_millis("RPC_DEFAULT_TIMEOUT_MS", DEFAULT_TIMEOUT_MS),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reaper_interval_ms == 0 {
            return Err(ConfigError::InvalidInterval(
                "reaper_interval_ms must be greater than zero".into(),
            ));
        }
        if self.max_record_age_ms == 0 {
            return Err(ConfigError::InvalidAge(
                "max_record_age_ms must be greater than zero".into(),
            ));
        }
        if self.default_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout(
                "default_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.reaper_interval_ms > self.max_record_age_ms {
            warn!(
                reaper_interval_ms = self.reaper_interval_ms,
                max_record_age_ms = self.max_record_age_ms,
                "Reaper interval exceeds max record age; records may outlive their age bound"
            );
        }
        Ok(())
    }

    /// Reaper sweep period
    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_interval_ms)
    }

    /// Forced expiry age
    pub fn max_record_age(&self) -> Duration {
        Duration::from_millis(self.max_record_age_ms)
    }

    /// Default wait timeout
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

fn env_millis(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Invalid reaper interval
    #[error("invalid interval: {0}")]
    InvalidInterval(String),
    /// Invalid record age bound
    #[error("invalid age: {0}")]
    InvalidAge(String),
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reaper_interval(), Duration::from_secs(30));
        assert_eq!(config.max_record_age(), Duration::from_secs(300));
        assert_eq!(config.default_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_zero_values_rejected() {
        let config = EngineConfig {
            reaper_interval_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidInterval(_))
        ));

        let config = EngineConfig {
            max_record_age_ms: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidAge(_))));

        let config = EngineConfig {
            default_timeout_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTimeout(_))
        ));
    }

    #[test]
    fn test_interval_above_age_is_allowed() {
        let config = EngineConfig {
            reaper_interval_ms: 10_000,
            max_record_age_ms: 1_000,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"reaper_interval_ms": 250}"#).unwrap();
        assert_eq!(config.reaper_interval_ms, 250);
        assert_eq!(config.max_record_age_ms, DEFAULT_MAX_RECORD_AGE_MS);
        assert_eq!(config.default_timeout_ms, DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn test_env_millis_fallback() {
        assert_eq!(env_millis("RPC_TEST_UNSET_VARIABLE_FOR_CONFIG", 42), 42);
    }
}
