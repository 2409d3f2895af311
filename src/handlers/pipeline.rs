use std::sync::Arc;

use tracing::{info, warn};

use super::error::ExportError;
use super::poll::{PollPolicy, RenderPoller};
use super::render_spec::build_render_spec;
use super::types::{ExportArtifact, ExportOptions};
use crate::clock::Clock;
use crate::config::BatchItemMode;
use crate::ledger::JobLedger;
use crate::observability::Metrics;
use crate::projects::{Project, ProjectStore};
use crate::provider::RenderProvider;
use crate::storage::{ArtifactStore, artifact_key};

/// Collaborators shared by the export handlers
#[derive(Clone)]
pub struct ExportContext {
    pub projects: Arc<dyn ProjectStore>,
    pub ledger: Arc<dyn JobLedger>,
    pub provider: Arc<dyn RenderProvider>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<Metrics>,
    pub polling: PollPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitMode {
    Poll,
    SingleCheck,
}

impl From<BatchItemMode> for WaitMode {
    fn from(mode: BatchItemMode) -> Self {
        match mode {
            BatchItemMode::Poll => WaitMode::Poll,
            BatchItemMode::SingleCheck => WaitMode::SingleCheck,
        }
    }
}

impl ExportContext {
    /// Submit, wait, copy, then mark the project EXPORTED.
    ///
    /// The project must already be EXPORTING; failure bookkeeping is left to the caller.
    pub(crate) async fn render_and_store(
        &self,
        spec_id: &str,
        project: &Project,
        tenant_id: &str,
        options: &ExportOptions,
        mode: WaitMode,
    ) -> Result<ExportArtifact, ExportError> {
        let spec = build_render_spec(spec_id, project, tenant_id, options)?;

        let correlation_id = self.provider.submit(&spec).await?;
        info!(
            project_id = %project.id,
            correlation_id = %correlation_id,
            format = %spec.format,
            "Render submitted"
        );

        let poller = RenderPoller::new(self.provider.as_ref(), self.clock.as_ref(), self.polling);
        let status = match mode {
            WaitMode::Poll => poller.wait(&correlation_id).await?,
            WaitMode::SingleCheck => poller.check_once(&correlation_id).await?,
        };

        let download_url = status.download_url.clone().ok_or_else(|| {
            ExportError::ProviderFailure(format!(
                "render {} completed without a download url",
                correlation_id
            ))
        })?;

        let key = artifact_key(
            project.kind,
            &project.id,
            self.clock.now().timestamp_millis(),
            &spec.format,
        );
        let stored = self.artifacts.copy_from_url(&key, &download_url).await?;

        let exported_at = self.clock.now();
        self.projects
            .mark_exported(tenant_id, &project.id, &key, exported_at)
            .await?;

        info!(project_id = %project.id, key = %key, size = stored.size, "Artifact stored");

        Ok(ExportArtifact {
            link: self.artifacts.link(&key),
            key,
            download_url,
            file_size: status.file_size.or(Some(stored.size)),
            format: spec.format,
        })
    }

    /// Record a failed export on the project and the ledger. Bookkeeping
    /// errors are logged, never raised over the original failure.
    pub(crate) async fn record_failure(
        &self,
        ledger_id: &str,
        tenant_id: &str,
        project_id: &str,
        error: &ExportError,
        only_if_exporting: bool,
    ) {
        let project_result = if only_if_exporting {
            self.projects
                .fail_if_exporting(tenant_id, project_id)
                .await
                .map(|_| ())
        } else {
            self.projects.mark_failed(tenant_id, project_id).await
        };
        if let Err(e) = project_result {
            warn!(project_id, error = %e, "Could not mark project failed");
        }

        if let Err(e) = self
            .ledger
            .fail(ledger_id, &error.to_string(), self.clock.now())
            .await
        {
            warn!(ledger_id, error = %e, "Could not record failure in ledger");
        }
    }
}
