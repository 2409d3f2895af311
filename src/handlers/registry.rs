use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use super::traits::JobHandler;
use crate::ledger::JobType;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("handler not found: {}", .0.as_str())]
    NotFound(JobType),
}

/// Registry mapping job types to handler instances
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<JobType, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the handler's own job type, replacing any previous one
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(handler.job_type(), handler);
    }

    pub fn get(&self, job_type: JobType) -> Result<Arc<dyn JobHandler>, RegistryError> {
        self.handlers
            .get(&job_type)
            .cloned()
            .ok_or(RegistryError::NotFound(job_type))
    }

    pub fn job_types(&self) -> Vec<JobType> {
        self.handlers.keys().copied().collect()
    }
}
