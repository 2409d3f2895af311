use async_trait::async_trait;

use super::error::ExportError;
use super::types::{HandlerOutput, JobEnvelope};
use crate::ledger::JobType;

/// Consumer for one kind of queue message
///
/// Implementations must tolerate redelivery of the same envelope: the queue is
/// at-least-once and a message can arrive again after a crash or a retry.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> JobType;

    /// Drive the message to a terminal state. An `Err` goes back to the queue layer.
    async fn handle(&self, envelope: &JobEnvelope) -> Result<HandlerOutput, ExportError>;
}
