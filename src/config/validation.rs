use super::models::{Config, StorageProvider};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    ZeroValue { field: &'static str },

    #[error("retry.base_delay ({base}) exceeds retry.max_delay ({max})")]
    RetryDelayInverted { base: String, max: String },

    #[error("Storage provider is S3 but missing credentials (access_key or secret_key)")]
    MissingS3Credentials,

    #[error("Storage provider is local but storage.root is not set")]
    MissingLocalRoot,

    #[error("provider.base_url must be an http(s) URL, got '{0}'")]
    InvalidProviderUrl(String),
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_worker(config)?;
    validate_polling(config)?;
    validate_retry(config)?;
    validate_provider(config)?;
    validate_storage(config)?;
    Ok(())
}

fn non_zero(value: u64, field: &'static str) -> Result<(), ValidationError> {
    if value == 0 {
        return Err(ValidationError::ZeroValue { field });
    }
    Ok(())
}

fn validate_worker(config: &Config) -> Result<(), ValidationError> {
    non_zero(config.worker.num_workers as u64, "worker.num_workers")?;
    non_zero(config.worker.channel_size as u64, "worker.channel_size")?;
    non_zero(config.batch.concurrency as u64, "batch.concurrency")
}

fn validate_polling(config: &Config) -> Result<(), ValidationError> {
    non_zero(config.polling.max_attempts as u64, "polling.max_attempts")?;
    non_zero(
        config.polling.interval.as_duration().as_millis() as u64,
        "polling.interval",
    )
}

fn validate_retry(config: &Config) -> Result<(), ValidationError> {
    non_zero(config.retry.max_attempts as u64, "retry.max_attempts")?;

    if config.retry.base_delay > config.retry.max_delay {
        return Err(ValidationError::RetryDelayInverted {
            base: config.retry.base_delay.to_string(),
            max: config.retry.max_delay.to_string(),
        });
    }
    Ok(())
}

fn validate_provider(config: &Config) -> Result<(), ValidationError> {
    let url = config.provider.base_url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ValidationError::InvalidProviderUrl(url.to_string()));
    }
    Ok(())
}

fn validate_storage(config: &Config) -> Result<(), ValidationError> {
    match config.storage.provider {
        StorageProvider::S3
            if config.storage.access_key.is_none() || config.storage.secret_key.is_none() =>
        {
            Err(ValidationError::MissingS3Credentials)
        }
        StorageProvider::Local if config.storage.root.is_none() => {
            Err(ValidationError::MissingLocalRoot)
        }
        _ => Ok(()),
    }
}
