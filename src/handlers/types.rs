use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::ledger::JobType;
use crate::projects::ProjectPayload;
use crate::provider::Dimensions;

/// Caller-chosen render parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportOptions {
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<Dimensions>,
    /// Anything else the caller sent; forwarded to the provider as metadata
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ExportOptions {
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            ..Self::default()
        }
    }

    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = Some(quality.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleExportMessage {
    pub project_id: String,
    pub tenant_id: String,
    pub export_options: ExportOptions,
    /// Content snapshot taken at enqueue time; stored content is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<ProjectPayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchExportMessage {
    pub project_ids: Vec<String>,
    pub tenant_id: String,
    pub export_options: ExportOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExportMessage {
    Export(SingleExportMessage),
    BatchExport(BatchExportMessage),
}

impl ExportMessage {
    pub fn job_type(&self) -> JobType {
        match self {
            ExportMessage::Export(_) => JobType::Export,
            ExportMessage::BatchExport(_) => JobType::BatchExport,
        }
    }

    pub fn tenant_id(&self) -> &str {
        match self {
            ExportMessage::Export(m) => &m.tenant_id,
            ExportMessage::BatchExport(m) => &m.tenant_id,
        }
    }
}

/// A message as it travels through the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEnvelope {
    /// Stable across redeliveries; doubles as the ledger entry id
    pub message_id: String,
    pub message: ExportMessage,
    /// 1 on first delivery
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_at: Option<DateTime<Utc>>,
}

impl JobEnvelope {
    pub fn new(message: ExportMessage, now: DateTime<Utc>) -> Self {
        Self {
            message_id: Uuid::now_v7().to_string(),
            message,
            attempt: 1,
            enqueued_at: now,
            run_at: None,
        }
    }

    pub fn with_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = message_id.into();
        self
    }

    pub fn with_run_at(mut self, run_at: DateTime<Utc>) -> Self {
        self.run_at = Some(run_at);
        self
    }

    pub fn job_type(&self) -> JobType {
        self.message.job_type()
    }
}

/// Per-project status in a batch report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    Completed,
    /// The render itself failed, timed out or was rejected
    Failed,
    /// Anything else went wrong (storage, project store, ledger)
    Error,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemOutcome {
    pub project_id: String,
    pub status: ItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchItemOutcome {
    pub fn completed(project_id: impl Into<String>, artifact: &ExportArtifact) -> Self {
        Self {
            project_id: project_id.into(),
            status: ItemStatus::Completed,
            key: Some(artifact.key.clone()),
            download_url: Some(artifact.download_url.clone()),
            file_size: artifact.file_size,
            error: None,
        }
    }

    pub fn unsuccessful(
        project_id: impl Into<String>,
        status: ItemStatus,
        error: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            status,
            key: None,
            download_url: None,
            file_size: None,
            error: Some(error.into()),
        }
    }
}

/// Result recorded in the ledger for a finished export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportArtifact {
    pub key: String,
    pub link: String,
    /// Provider's transient URL the artifact was copied from
    pub download_url: String,
    #[serde(default)]
    pub file_size: Option<u64>,
    pub format: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutput {
    Exported(ExportArtifact),
    Batch(Vec<BatchItemOutcome>),
}
