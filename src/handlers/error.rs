use std::time::Duration;

use thiserror::Error;

use crate::humanize::HumanDuration;
use crate::ledger::LedgerError;
use crate::projects::ProjectStoreError;
use crate::provider::ProviderError;
use crate::storage::StorageError;

fn human(duration: &Duration) -> HumanDuration {
    HumanDuration(*duration)
}

/// Why an export did not produce an artifact
#[derive(Debug, Error)]
pub enum ExportError {
    /// Rejected before or by the provider; retrying cannot help
    #[error("invalid export request: {0}")]
    InvalidSpec(String),

    #[error("render failed: {0}")]
    ProviderFailure(String),

    #[error("render did not finish after {attempts} status checks ({})", human(.waited))]
    Timeout { attempts: u32, waited: Duration },

    #[error("storing artifact failed: {0}")]
    StorageWriteFailed(String),

    #[error("{0}")]
    NotFound(String),

    #[error("render provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ExportError {
    /// Whether the queue should redeliver the message
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ExportError::InvalidSpec(_) | ExportError::NotFound(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            ExportError::InvalidSpec(_) => "INVALID_SPEC",
            ExportError::ProviderFailure(_) => "PROVIDER_FAILURE",
            ExportError::Timeout { .. } => "TIMEOUT",
            ExportError::StorageWriteFailed(_) => "STORAGE_WRITE_FAILED",
            ExportError::NotFound(_) => "NOT_FOUND",
            ExportError::ProviderUnavailable(_) => "PROVIDER_UNAVAILABLE",
            ExportError::Internal(_) => "INTERNAL",
        }
    }
}

impl From<ProviderError> for ExportError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Unavailable(msg) => ExportError::ProviderUnavailable(msg),
            ProviderError::InvalidSpec(msg) => ExportError::InvalidSpec(msg),
            ProviderError::NotFound(msg) | ProviderError::Protocol(msg) => {
                ExportError::ProviderFailure(msg)
            }
        }
    }
}

impl From<StorageError> for ExportError {
    fn from(err: StorageError) -> Self {
        ExportError::StorageWriteFailed(err.to_string())
    }
}

impl From<LedgerError> for ExportError {
    fn from(err: LedgerError) -> Self {
        ExportError::Internal(format!("ledger: {}", err))
    }
}

impl From<ProjectStoreError> for ExportError {
    fn from(err: ProjectStoreError) -> Self {
        match err {
            e @ ProjectStoreError::NotFound { .. } => ExportError::NotFound(e.to_string()),
            e => ExportError::Internal(format!("project store: {}", e)),
        }
    }
}
