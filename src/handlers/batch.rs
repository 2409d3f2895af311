use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::json;
use tracing::{Instrument, error, info, info_span, warn};

use super::error::ExportError;
use super::pipeline::{ExportContext, WaitMode};
use super::traits::JobHandler;
use super::types::{
    BatchExportMessage, BatchItemOutcome, ExportArtifact, ExportMessage, HandlerOutput, ItemStatus, JobEnvelope,
};
use crate::config::BatchItemMode;
use crate::ledger::{JobType, LedgerEntry, LedgerStatus};

/// Ledger id of one project's entry inside a batch
pub fn batch_item_id(batch_id: &str, project_id: &str) -> String {
    format!("{}:{}", batch_id, project_id)
}

/// Item status for an export error; the render's own failures are FAILED,
/// everything around it is ERROR.
fn item_status(error: &ExportError) -> ItemStatus {
    match error {
        ExportError::InvalidSpec(_) | ExportError::ProviderFailure(_) | ExportError::Timeout { .. } => {
            ItemStatus::Failed
        }
        ExportError::NotFound(_) => ItemStatus::NotFound,
        _ => ItemStatus::Error,
    }
}

/// Exports many projects with shared options; one project's failure never aborts the rest
pub struct BatchExportHandler {
    ctx: ExportContext,
    concurrency: usize,
    wait_mode: WaitMode,
}

impl BatchExportHandler {
    pub fn new(ctx: ExportContext) -> Self {
        Self {
            ctx,
            concurrency: 1,
            wait_mode: WaitMode::Poll,
        }
    }

    /// Items in flight at once; outcomes keep input order regardless
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_item_mode(mut self, mode: BatchItemMode) -> Self {
        self.wait_mode = mode.into();
        self
    }

    async fn already_completed(&self, batch_id: &str) -> Result<Option<Vec<BatchItemOutcome>>, ExportError> {
        let Some(entry) = self.ctx.ledger.get(batch_id).await? else {
            return Ok(None);
        };
        if entry.status != LedgerStatus::Completed {
            return Ok(None);
        }
        let Some(outcomes) = entry.result.as_ref().and_then(|r| r.get("outcomes")) else {
            return Ok(None);
        };
        serde_json::from_value(outcomes.clone())
            .map(Some)
            .map_err(|e| ExportError::Internal(format!("stored batch report unreadable: {}", e)))
    }

    /// Items an earlier delivery of this batch already exported, by project id
    async fn finished_items(
        &self,
        batch_id: &str,
        message: &BatchExportMessage,
    ) -> Result<HashMap<String, ExportArtifact>, ExportError> {
        let mut finished = HashMap::new();
        for project_id in &message.project_ids {
            let Some(child) = self.ctx.ledger.get(&batch_item_id(batch_id, project_id)).await? else {
                continue;
            };
            if child.status != LedgerStatus::Completed {
                continue;
            }
            // An unreadable result is exported again rather than trusted
            if let Some(artifact) = child
                .result
                .and_then(|result| serde_json::from_value::<ExportArtifact>(result).ok())
            {
                finished.insert(project_id.clone(), artifact);
            }
        }
        Ok(finished)
    }

    /// Bulk status change plus one PENDING child entry per unfinished project
    async fn prepare(
        &self,
        batch_id: &str,
        message: &BatchExportMessage,
        finished: &HashMap<String, ExportArtifact>,
    ) -> Result<(), ExportError> {
        let remaining: Vec<String> = message
            .project_ids
            .iter()
            .filter(|id| !finished.contains_key(*id))
            .cloned()
            .collect();

        let updated = self
            .ctx
            .projects
            .mark_exporting_many(&message.tenant_id, &remaining)
            .await?;
        info!(
            requested = message.project_ids.len(),
            already_exported = finished.len(),
            updated, "Marked batch projects exporting"
        );

        let now = self.ctx.clock.now();
        for project_id in &remaining {
            let id = batch_item_id(batch_id, project_id);
            let mut child = match self.ctx.ledger.get(&id).await? {
                Some(existing) => existing,
                None => LedgerEntry::new(&id, JobType::Export, &message.tenant_id, now)
                    .with_project(project_id)
                    .with_parent(batch_id)
                    .with_metadata(json!(message.export_options)),
            };
            child.status = LedgerStatus::Pending;
            child.result = None;
            child.error = None;
            child.updated_at = now;
            self.ctx.ledger.upsert(&child).await?;
        }
        Ok(())
    }

    /// Parent FAILED for an error outside the item loop; the error goes back to the caller
    async fn fail_batch(&self, batch_id: &str, e: ExportError) -> ExportError {
        error!(code = e.code(), error = %e, "Batch export failed");
        if let Err(ledger_err) = self
            .ctx
            .ledger
            .fail(batch_id, &e.to_string(), self.ctx.clock.now())
            .await
        {
            warn!(error = %ledger_err, "Could not record batch failure");
        }
        e
    }

    async fn process_item(
        &self,
        batch_id: &str,
        message: &BatchExportMessage,
        project_id: &str,
    ) -> BatchItemOutcome {
        let item_id = batch_item_id(batch_id, project_id);
        let tenant_id = message.tenant_id.as_str();

        let outcome = match self.export_item(&item_id, message, project_id).await {
            Ok(artifact) => {
                let completed = self
                    .ctx
                    .ledger
                    .complete(&item_id, json!(artifact), self.ctx.clock.now())
                    .await;
                match completed {
                    Ok(_) => BatchItemOutcome::completed(project_id, &artifact),
                    Err(e) => BatchItemOutcome::unsuccessful(project_id, ItemStatus::Error, e.to_string()),
                }
            }
            Err(e) => {
                let status = item_status(&e);
                warn!(project_id, code = e.code(), error = %e, "Batch item did not export");
                // Leaves projects another job already moved on untouched
                self.ctx
                    .record_failure(&item_id, tenant_id, project_id, &e, true)
                    .await;
                BatchItemOutcome::unsuccessful(project_id, status, e.to_string())
            }
        };

        self.ctx.metrics.batch_item(outcome.status);
        outcome
    }

    async fn export_item(
        &self,
        item_id: &str,
        message: &BatchExportMessage,
        project_id: &str,
    ) -> Result<ExportArtifact, ExportError> {
        let now = self.ctx.clock.now();
        let template = LedgerEntry::new(item_id, JobType::Export, &message.tenant_id, now)
            .with_project(project_id)
            .with_metadata(json!(message.export_options));
        self.ctx.ledger.start(template, now).await?;

        let project = self
            .ctx
            .projects
            .get(&message.tenant_id, project_id)
            .await?
            .ok_or_else(|| {
                ExportError::NotFound(format!(
                    "project {} not found for tenant {}",
                    project_id, message.tenant_id
                ))
            })?;

        self.ctx
            .render_and_store(
                item_id,
                &project,
                &message.tenant_id,
                &message.export_options,
                self.wait_mode,
            )
            .await
    }

    async fn process(
        &self,
        envelope: &JobEnvelope,
        message: &BatchExportMessage,
    ) -> Result<HandlerOutput, ExportError> {
        let batch_id = envelope.message_id.as_str();

        if let Some(outcomes) = self.already_completed(batch_id).await? {
            info!("Batch already completed, skipping redelivery");
            return Ok(HandlerOutput::Batch(outcomes));
        }

        let now = self.ctx.clock.now();
        let template = LedgerEntry::new(batch_id, JobType::BatchExport, &message.tenant_id, now)
            .with_metadata(json!({
                "projectIds": message.project_ids,
                "exportOptions": message.export_options,
            }));
        self.ctx.ledger.start(template, now).await?;

        let finished = match self.finished_items(batch_id, message).await {
            Ok(finished) => finished,
            Err(e) => return Err(self.fail_batch(batch_id, e).await),
        };
        if let Err(e) = self.prepare(batch_id, message, &finished).await {
            return Err(self.fail_batch(batch_id, e).await);
        }

        let finished = &finished;
        let outcomes: Vec<BatchItemOutcome> = stream::iter(message.project_ids.iter().cloned())
            .map(|project_id| async move {
                match finished.get(&project_id) {
                    Some(artifact) => {
                        info!(
                            project_id = %project_id,
                            key = %artifact.key,
                            "Item exported by an earlier delivery"
                        );
                        BatchItemOutcome::completed(project_id, artifact)
                    }
                    None => self.process_item(batch_id, message, &project_id).await,
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let completed = outcomes
            .iter()
            .filter(|o| o.status == ItemStatus::Completed)
            .count();
        if let Err(e) = self
            .ctx
            .ledger
            .complete(batch_id, json!({ "outcomes": outcomes }), self.ctx.clock.now())
            .await
        {
            return Err(self.fail_batch(batch_id, e.into()).await);
        }
        self.ctx.metrics.batch_completed();
        info!(total = outcomes.len(), completed, "Batch export finished");

        Ok(HandlerOutput::Batch(outcomes))
    }
}

#[async_trait]
impl JobHandler for BatchExportHandler {
    fn job_type(&self) -> JobType {
        JobType::BatchExport
    }

    async fn handle(&self, envelope: &JobEnvelope) -> Result<HandlerOutput, ExportError> {
        let ExportMessage::BatchExport(message) = &envelope.message else {
            return Err(ExportError::Internal(format!(
                "{} handler received a {} message",
                JobType::BatchExport.as_str(),
                envelope.job_type().as_str()
            )));
        };

        let span = info_span!(
            "batch_export",
            job_id = %envelope.message_id,
            tenant_id = %message.tenant_id,
            items = message.project_ids.len(),
            attempt = envelope.attempt,
        );
        self.process(envelope, message).instrument(span).await
    }
}
