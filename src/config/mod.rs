//! # Orchestrator Configuration
//!
//! Layered configuration for the orchestration engine: built-in defaults, an
//! optional `config/orchestrator.toml`, an optional environment-specific file
//! and `ORCHESTRATOR__*` environment variables, in that order of precedence.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use resource_orchestrator::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let interval = manager.config().polling.interval();
//! let pool = manager.config().engine.max_concurrent_tasks;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::defaults;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub engine: EngineConfig,
    pub polling: PollingConfig,
    pub connection: ConnectionConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub events: EventsConfig,
}

/// Task engine settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on tasks running in parallel across resources
    pub max_concurrent_tasks: usize,
    /// Persist shared params after every step
    pub persist_checkpoints: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: defaults::MAX_CONCURRENT_TASKS,
            persist_checkpoints: true,
        }
    }
}

/// Defaults for the poll primitive; individual steps may override them.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_ms: u64,
    pub max_attempts: u32,
    /// Attempts during which a missing remote entity counts as pending
    pub not_found_grace_attempts: u32,
    /// Consecutive transient remote errors tolerated before the poll fails
    pub transient_error_budget: u32,
    /// 1.0 keeps the interval fixed
    pub backoff_multiplier: f64,
    pub max_interval_ms: u64,
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: defaults::POLL_INTERVAL_MS,
            max_attempts: defaults::POLL_MAX_ATTEMPTS,
            not_found_grace_attempts: defaults::NOT_FOUND_GRACE_ATTEMPTS,
            transient_error_budget: defaults::POLL_TRANSIENT_ERROR_BUDGET,
            backoff_multiplier: 1.0,
            max_interval_ms: defaults::POLL_MAX_INTERVAL_MS,
        }
    }
}

/// Remote session token caching
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Lifetime assumed for a token when the platform does not report one
    pub token_ttl_seconds: u64,
    /// Tokens this close to expiry are renewed before use
    pub renewal_margin_seconds: u64,
}

impl ConnectionConfig {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_seconds)
    }

    pub fn renewal_margin(&self) -> Duration {
        Duration::from_secs(self.renewal_margin_seconds)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            token_ttl_seconds: defaults::TOKEN_TTL_SECONDS,
            renewal_margin_seconds: defaults::TOKEN_RENEWAL_MARGIN_SECONDS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Postgres URL; the in-memory store is used when unset
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

impl DatabaseConfig {
    pub fn require_url(&self) -> ConfigResult<&str> {
        self.url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| ConfigurationError::missing_required_field("url", "[database]"))
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            acquire_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Overrides the environment-derived level when set
    pub level: Option<String>,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: defaults::EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl OrchestratorConfig {
    /// Reject settings that would make polling or the worker pool unusable
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.engine.max_concurrent_tasks == 0 {
            return Err(ConfigurationError::invalid_value(
                "engine.max_concurrent_tasks",
                0,
                "worker pool size must be greater than 0",
            ));
        }

        if self.polling.interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "polling.interval_ms",
                0,
                "poll interval must be greater than 0",
            ));
        }

        if self.polling.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "polling.max_attempts",
                0,
                "max attempts must be greater than 0",
            ));
        }

        let multiplier = self.polling.backoff_multiplier;
        if !multiplier.is_finite() || !(1.0..=defaults::POLL_MAX_BACKOFF_MULTIPLIER).contains(&multiplier) {
            return Err(ConfigurationError::invalid_value(
                "polling.backoff_multiplier",
                multiplier,
                format!(
                    "multiplier must be between 1.0 and {}",
                    defaults::POLL_MAX_BACKOFF_MULTIPLIER
                ),
            ));
        }

        if self.polling.max_interval_ms < self.polling.interval_ms {
            return Err(ConfigurationError::invalid_value(
                "polling.max_interval_ms",
                self.polling.max_interval_ms,
                "max interval must not be below the base interval",
            ));
        }

        if self.connection.renewal_margin_seconds >= self.connection.token_ttl_seconds {
            return Err(ConfigurationError::invalid_value(
                "connection.renewal_margin_seconds",
                self.connection.renewal_margin_seconds,
                "renewal margin must be shorter than the token TTL",
            ));
        }

        if self.database.url.is_some() && self.database.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                0,
                "pool size must be greater than 0",
            ));
        }

        if self.events.channel_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "events.channel_capacity",
                0,
                "channel capacity must be greater than 0",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = OrchestratorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.connection.token_ttl(), Duration::from_secs(1800));
        assert_eq!(config.polling.backoff_multiplier, 1.0);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = OrchestratorConfig::default();
        config.polling.interval_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("polling.interval_ms"));
    }

    #[test]
    fn test_backoff_multiplier_bounds() {
        for multiplier in [0.5, 1e30, f64::INFINITY, f64::NAN] {
            let mut config = OrchestratorConfig::default();
            config.polling.backoff_multiplier = multiplier;
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("polling.backoff_multiplier"), "{multiplier}");
        }

        let mut config = OrchestratorConfig::default();
        config.polling.backoff_multiplier = defaults::POLL_MAX_BACKOFF_MULTIPLIER;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_database_url_is_required_when_asked_for() {
        let mut database = DatabaseConfig::default();
        let err = database.require_url().unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingRequiredField { ref field, .. } if field == "url"));

        database.url = Some("  ".to_string());
        assert!(database.require_url().is_err());

        database.url = Some("postgresql://localhost/ro".to_string());
        assert_eq!(database.require_url().unwrap(), "postgresql://localhost/ro");
    }

    #[test]
    fn test_margin_must_be_shorter_than_ttl() {
        let mut config = OrchestratorConfig::default();
        config.connection.renewal_margin_seconds = config.connection.token_ttl_seconds;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_deserialization_fills_defaults() {
        let config: OrchestratorConfig =
            serde_json::from_value(serde_json::json!({"polling": {"interval_ms": 50}})).unwrap();
        assert_eq!(config.polling.interval_ms, 50);
        assert_eq!(config.polling.max_attempts, defaults::POLL_MAX_ATTEMPTS);
        assert_eq!(
            config.polling.transient_error_budget,
            defaults::POLL_TRANSIENT_ERROR_BUDGET
        );
        assert_eq!(config.engine.max_concurrent_tasks, defaults::MAX_CONCURRENT_TASKS);
    }
}
