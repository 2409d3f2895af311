//! Render provider client
//!
//! The render provider is an external service that turns a project payload
//! into a file. This crate only needs five operations from it, captured by
//! [`RenderProvider`]; [`HttpRenderProvider`] speaks its HTTP API.

pub mod http;
mod types;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use http::HttpRenderProvider;
pub use types::{CorrelationId, Dimensions, RenderSpec, RenderState, RenderStatus};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("render provider unavailable: {0}")]
    Unavailable(String),

    #[error("render request rejected: {0}")]
    InvalidSpec(String),

    #[error("render job not found: {0}")]
    NotFound(String),

    #[error("unexpected provider response: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

#[async_trait]
pub trait RenderProvider: Send + Sync {
    /// Submit a render; returns the provider's correlation id
    async fn submit(&self, spec: &RenderSpec) -> Result<CorrelationId>;

    /// Single-shot status read. Safe to repeat.
    async fn status(&self, correlation_id: &str) -> Result<RenderStatus>;

    /// Ask the provider to stop a render. `false` when it was already gone or finished.
    async fn cancel(&self, correlation_id: &str) -> Result<bool>;

    async fn supported_formats(&self) -> Result<Vec<String>>;

    async fn estimate_duration(&self, spec: &RenderSpec) -> Result<Duration>;
}
