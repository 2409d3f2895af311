//! Export handlers
//!
//! A handler consumes one kind of queue message and drives it to a terminal
//! state, keeping the job ledger and the project status in step.
//!
//! ## Key Components
//!
//! - [`JobHandler`] - Trait every message consumer implements
//! - [`SingleExportHandler`] - Submits, polls and stores one project's render
//! - [`BatchExportHandler`] - Fans out over many projects and reports per item
//! - [`HandlerRegistry`] - Dispatch table from [`JobType`](crate::ledger::JobType) to handler
//! - [`ExportContext`] - Injected collaborators (stores, provider, clock)
//!
//! ## Example
//!
//! ```rust,ignore
//! use exportbox::handlers::{HandlerRegistry, SingleExportHandler, BatchExportHandler};
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register(Arc::new(SingleExportHandler::new(ctx.clone())));
//! registry.register(Arc::new(BatchExportHandler::new(ctx).with_concurrency(4)));
//!
//! let handler = registry.get(envelope.job_type())?;
//! let output = handler.handle(&envelope).await?;
//! ```

mod batch;
mod error;
mod pipeline;
pub mod poll;
mod registry;
mod render_spec;
mod single;
mod traits;
mod types;

pub use batch::{BatchExportHandler, batch_item_id};
pub use error::ExportError;
pub use pipeline::ExportContext;
pub use poll::{PollPolicy, PollState, RenderPoller};
pub use registry::{HandlerRegistry, RegistryError};
pub use render_spec::build_render_spec;
pub use single::SingleExportHandler;
pub use traits::JobHandler;
pub use types::{
    BatchExportMessage, BatchItemOutcome, ExportArtifact, ExportMessage, ExportOptions,
    HandlerOutput, ItemStatus, JobEnvelope, SingleExportMessage,
};
