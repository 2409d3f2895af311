//! Durable message queue
//!
//! [`FjallQueue`] persists messages, [`JobBroker`] fans them out to worker
//! channels, and [`ExportScheduler`] handles retries and deferred runs.

pub mod broker;
pub mod scheduler;
pub mod store;

pub use broker::{Delivery, JobBroker};
pub use scheduler::{ExportScheduler, FailureAction, RetryPolicy};
pub use store::{DeadLetter, FjallQueue, QueueError, QueueStats};
