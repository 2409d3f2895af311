use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of work a ledger entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    Export,
    BatchExport,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Export => "EXPORT",
            JobType::BatchExport => "BATCH_EXPORT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl LedgerStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LedgerStatus::Completed | LedgerStatus::Failed)
    }
}

/// Durable record of one attempted unit of export work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: String,
    pub job_type: JobType,
    pub tenant_id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    /// Batch message id for per-item entries
    #[serde(default)]
    pub parent_id: Option<String>,
    pub status: LedgerStatus,
    /// Export parameters captured when the work was accepted
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    /// Times this entry entered PROCESSING (redeliveries included)
    #[serde(default)]
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl LedgerEntry {
    pub fn new(
        id: impl Into<String>,
        job_type: JobType,
        tenant_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            job_type,
            tenant_id: tenant_id.into(),
            project_id: None,
            parent_id: None,
            status: LedgerStatus::Pending,
            metadata: Value::Null,
            result: None,
            error: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Enter PROCESSING, clearing the outcome of any earlier attempt
    pub fn begin(&mut self, now: DateTime<Utc>) {
        self.status = LedgerStatus::Processing;
        self.attempts += 1;
        self.started_at = Some(now);
        self.completed_at = None;
        self.result = None;
        self.error = None;
        self.updated_at = now;
    }

    pub fn complete(&mut self, result: Value, now: DateTime<Utc>) {
        self.status = LedgerStatus::Completed;
        self.result = Some(result);
        self.error = None;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = LedgerStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(now);
        self.updated_at = now;
    }
}
