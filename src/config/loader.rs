//! Configuration Loader
//!
//! Environment-aware loading on top of the `config` crate. Handles file
//! discovery, environment detection and secret masking for log output.

use super::error::{ConfigResult, ConfigurationError};
use super::OrchestratorConfig;
use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const ENV_PREFIX: &str = "ORCHESTRATOR";

/// Loaded configuration plus the context it was loaded in
#[derive(Debug)]
pub struct ConfigManager {
    config: OrchestratorConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration with an explicit environment, without touching process env vars
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            environment = %environment,
            directory = %config_directory.display(),
            "Loading orchestrator configuration"
        );

        let config = Self::build(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment = %environment,
            max_concurrent_tasks = config.engine.max_concurrent_tasks,
            poll_interval_ms = config.polling.interval_ms,
            persistent_store = config.database.url.is_some(),
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration, e.g. in tests
    pub fn from_config(config: OrchestratorConfig, environment: &str) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            environment: environment.to_string(),
            config_directory: PathBuf::from("config"),
        })
    }

    fn build(config_directory: &Path, environment: &str) -> ConfigResult<OrchestratorConfig> {
        let defaults = Config::try_from(&OrchestratorConfig::default())?;

        let base_file = config_directory.join("orchestrator.toml");
        let env_file = config_directory.join(format!("orchestrator.{environment}.toml"));

        let settings = Config::builder()
            .add_source(defaults)
            .add_source(File::from(base_file).required(false))
            .add_source(File::from(env_file).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        settings
            .try_deserialize::<OrchestratorConfig>()
            .map_err(|e| ConfigurationError::load_error(config_directory.display().to_string(), e))
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// JSON view of the configuration with sensitive fields masked
    pub fn debug_config(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null);
        sanitize_json_recursive(&mut value, &SENSITIVE_PATTERNS);
        value
    }

    pub fn detect_environment() -> String {
        env::var("ORCHESTRATOR_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }
}

const SENSITIVE_PATTERNS: [&str; 6] = ["password", "secret", "key", "token", "credential", "url"];

fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                let key_lower = key.to_lowercase();
                // ttl and margin settings are not secrets even though they mention tokens
                let is_sensitive = sensitive_patterns.iter().any(|p| key_lower.contains(p))
                    && !key_lower.ends_with("_seconds");

                if is_sensitive && !val.is_null() {
                    let masked = match &*val {
                        serde_json::Value::String(s) if s.is_ascii() && s.len() > 4 => {
                            format!("[MASKED: {}***{}]", &s[..2], &s[s.len() - 2..])
                        }
                        _ => "[MASKED]".to_string(),
                    };
                    *val = serde_json::Value::String(masked);
                } else {
                    sanitize_json_recursive(val, sensitive_patterns);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                sanitize_json_recursive(item, sensitive_patterns);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_from_empty_directory_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
                .unwrap();
        assert_eq!(manager.environment(), "test");
        assert_eq!(
            manager.config().polling.max_attempts,
            crate::constants::defaults::POLL_MAX_ATTEMPTS
        );
    }

    #[test]
    fn test_environment_file_overrides_base_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut base = std::fs::File::create(dir.path().join("orchestrator.toml")).unwrap();
        writeln!(base, "[polling]\ninterval_ms = 500\nmax_attempts = 10").unwrap();
        let mut env_file =
            std::fs::File::create(dir.path().join("orchestrator.staging.toml")).unwrap();
        writeln!(env_file, "[polling]\nmax_attempts = 20").unwrap();

        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "staging")
                .unwrap();
        assert_eq!(manager.config().polling.interval_ms, 500);
        assert_eq!(manager.config().polling.max_attempts, 20);
    }

    #[test]
    fn test_invalid_file_values_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        let mut base = std::fs::File::create(dir.path().join("orchestrator.toml")).unwrap();
        writeln!(base, "[engine]\nmax_concurrent_tasks = 0").unwrap();

        let result =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test");
        assert!(result.is_err());
    }

    #[test]
    fn test_debug_config_masks_database_url() {
        let mut config = OrchestratorConfig::default();
        config.database.url = Some("postgres://admin:hunter2@db/orchestrator".to_string());
        let manager = ConfigManager::from_config(config, "test").unwrap();

        let debug = manager.debug_config();
        let url = debug["database"]["url"].as_str().unwrap();
        assert!(url.starts_with("[MASKED"));
        assert!(!url.contains("hunter2"));
        // durations that mention tokens stay readable
        assert_eq!(debug["connection"]["token_ttl_seconds"], 1800);
    }
}
