use async_trait::async_trait;
use serde_json::json;
use tracing::{Instrument, error, info, info_span};

use super::error::ExportError;
use super::pipeline::{ExportContext, WaitMode};
use super::traits::JobHandler;
use super::types::{ExportArtifact, ExportMessage, HandlerOutput, JobEnvelope, SingleExportMessage};
use crate::ledger::{JobType, LedgerEntry, LedgerStatus};

/// Exports one project: `RECEIVED -> SUBMITTED -> POLLING -> {COMPLETED | FAILED | TIMED_OUT}`
pub struct SingleExportHandler {
    ctx: ExportContext,
}

impl SingleExportHandler {
    pub fn new(ctx: ExportContext) -> Self {
        Self { ctx }
    }

    /// Artifact of an earlier delivery that already finished
    async fn already_completed(&self, message_id: &str) -> Result<Option<ExportArtifact>, ExportError> {
        let Some(entry) = self.ctx.ledger.get(message_id).await? else {
            return Ok(None);
        };
        if entry.status != LedgerStatus::Completed {
            return Ok(None);
        }
        match entry.result {
            Some(result) => serde_json::from_value(result)
                .map(Some)
                .map_err(|e| ExportError::Internal(format!("stored result unreadable: {}", e))),
            None => Ok(None),
        }
    }

    async fn run(
        &self,
        envelope: &JobEnvelope,
        message: &SingleExportMessage,
    ) -> Result<ExportArtifact, ExportError> {
        let mut project = self
            .ctx
            .projects
            .get(&message.tenant_id, &message.project_id)
            .await?
            .ok_or_else(|| {
                ExportError::NotFound(format!(
                    "project {} not found for tenant {}",
                    message.project_id, message.tenant_id
                ))
            })?;
        if let Some(payload) = &message.project {
            project.apply_payload(payload);
        }

        self.ctx
            .projects
            .mark_exporting(&message.tenant_id, &message.project_id)
            .await?;

        self.ctx
            .render_and_store(
                &envelope.message_id,
                &project,
                &message.tenant_id,
                &message.export_options,
                WaitMode::Poll,
            )
            .await
    }

    async fn process(
        &self,
        envelope: &JobEnvelope,
        message: &SingleExportMessage,
    ) -> Result<HandlerOutput, ExportError> {
        if let Some(artifact) = self.already_completed(&envelope.message_id).await? {
            info!(key = %artifact.key, "Export already completed, skipping redelivery");
            return Ok(HandlerOutput::Exported(artifact));
        }

        let template = LedgerEntry::new(
            &envelope.message_id,
            JobType::Export,
            &message.tenant_id,
            self.ctx.clock.now(),
        )
        .with_project(&message.project_id)
        .with_metadata(json!(message.export_options));
        self.ctx.ledger.start(template, self.ctx.clock.now()).await?;

        match self.run(envelope, message).await {
            Ok(artifact) => {
                let result = serde_json::to_value(&artifact)
                    .map_err(|e| ExportError::Internal(e.to_string()))?;
                self.ctx
                    .ledger
                    .complete(&envelope.message_id, result, self.ctx.clock.now())
                    .await?;
                self.ctx.metrics.export_completed();
                info!(key = %artifact.key, "Export completed");
                Ok(HandlerOutput::Exported(artifact))
            }
            Err(e) => {
                error!(code = e.code(), error = %e, "Export failed");
                self.ctx
                    .record_failure(
                        &envelope.message_id,
                        &message.tenant_id,
                        &message.project_id,
                        &e,
                        false,
                    )
                    .await;
                if matches!(e, ExportError::Timeout { .. }) {
                    self.ctx.metrics.export_timed_out();
                } else {
                    self.ctx.metrics.export_failed();
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl JobHandler for SingleExportHandler {
    fn job_type(&self) -> JobType {
        JobType::Export
    }

    async fn handle(&self, envelope: &JobEnvelope) -> Result<HandlerOutput, ExportError> {
        let ExportMessage::Export(message) = &envelope.message else {
            return Err(ExportError::Internal(format!(
                "{} handler received a {} message",
                JobType::Export.as_str(),
                envelope.job_type().as_str()
            )));
        };

        let span = info_span!(
            "export",
            job_id = %envelope.message_id,
            project_id = %message.project_id,
            tenant_id = %message.tenant_id,
            attempt = envelope.attempt,
        );
        self.process(envelope, message).instrument(span).await
    }
}
