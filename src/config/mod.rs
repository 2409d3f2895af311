//! Configuration management for exportbox
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use exportbox::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Server listening on: {}", config.server.bind_addr);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `EXPORTBOX__<section>__<key>`
//!
//! Examples:
//! - `EXPORTBOX__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `EXPORTBOX__POLLING__INTERVAL=2s`
//! - `EXPORTBOX__BATCH__ITEM_MODE=single_check`
//!
//! Secrets are read from `RENDER_API_KEY`, `S3_ACCESS_KEY` / `AWS_ACCESS_KEY_ID`
//! and `S3_SECRET_KEY` / `AWS_SECRET_ACCESS_KEY` only.
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/exportbox.toml`.
//! This can be overridden using the `EXPORTBOX_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use crate::humanize::{ByteSize, HumanDuration};
pub use models::{
    BatchConfig, BatchItemMode, Config, LogFormat, PollingConfig, ProviderConfig, RetryConfig,
    ServerConfig, StorageConfig, StorageProvider, TelemetryConfig, WorkerConfig,
};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// # Errors
    ///
    /// Returns an error if the file is malformed or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path, without env secrets
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[worker]\nnum_workers = 2\n").unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.worker.num_workers, 2);
        assert_eq!(config.worker.channel_size, 100);
    }

    #[test]
    fn test_validation_runs_after_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[storage]\nprovider = \"local\"\n").unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(ValidationError::MissingLocalRoot)
        ));
    }

    #[test]
    fn test_full_config_example() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "0.0.0.0:8080"
data_dir = "data"
max_payload_bytes = "1MB"

[worker]
num_workers = 8
channel_size = 50
promote_interval = "500ms"

[polling]
interval = "5s"
max_attempts = 60

[batch]
concurrency = 4

[provider]
base_url = "https://render.internal"
request_timeout = "20s"

[storage]
provider = "local"
root = "data/artifacts"
public_base_url = "https://cdn.example.com"

[telemetry]
log_format = "json"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.worker.num_workers, 8);
        assert_eq!(config.batch.concurrency, 4);
        assert_eq!(config.provider.base_url, "https://render.internal");
        assert_eq!(config.storage.provider, StorageProvider::Local);
        assert_eq!(config.telemetry.log_format, LogFormat::Json);
    }
}
