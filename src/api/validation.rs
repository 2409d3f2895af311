use std::collections::HashSet;

use thiserror::Error;

use crate::handlers::{BatchExportMessage, ExportOptions, SingleExportMessage};

/// Upper bound on projects in one batch message
pub const MAX_BATCH_SIZE: usize = 1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestValidationError {
    #[error("{0} must not be empty")]
    MissingField(&'static str),
    #[error("projectIds must contain between 1 and {MAX_BATCH_SIZE} entries")]
    InvalidBatchSize,
    #[error("projectIds must be unique, '{0}' repeats")]
    DuplicateProjectId(String),
}

fn require(value: &str, field: &'static str) -> Result<(), RequestValidationError> {
    if value.trim().is_empty() {
        return Err(RequestValidationError::MissingField(field));
    }
    Ok(())
}

fn validate_options(options: &ExportOptions) -> Result<(), RequestValidationError> {
    require(&options.format, "exportOptions.format")
}

/// Shape checks only; format support and asset checks happen in the handler
pub fn validate_export(message: &SingleExportMessage) -> Result<(), RequestValidationError> {
    require(&message.project_id, "projectId")?;
    require(&message.tenant_id, "tenantId")?;
    validate_options(&message.export_options)
}

pub fn validate_batch(message: &BatchExportMessage) -> Result<(), RequestValidationError> {
    require(&message.tenant_id, "tenantId")?;
    validate_options(&message.export_options)?;

    if !(1..=MAX_BATCH_SIZE).contains(&message.project_ids.len()) {
        return Err(RequestValidationError::InvalidBatchSize);
    }

    let mut seen = HashSet::new();
    for project_id in &message.project_ids {
        require(project_id, "projectIds[]")?;
        if !seen.insert(project_id.as_str()) {
            return Err(RequestValidationError::DuplicateProjectId(project_id.clone()));
        }
    }

    Ok(())
}
