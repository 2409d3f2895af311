//! Request and response bodies of the intake and status endpoints.
//!
//! A single export request is the queue message itself plus an optional
//! `runAt`:
//!
//! ```json
//! {
//!   "projectId": "P1",
//!   "tenantId": "acme",
//!   "exportOptions": { "format": "PDF", "quality": "HIGH" },
//!   "project": { "content": {}, "assets": [], "brand": {} },
//!   "runAt": "2026-01-01T09:00:00Z"
//! }
//! ```
//!
//! A batch request carries `projectIds` instead of `projectId` and no
//! `project` snapshot.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::handlers::{BatchExportMessage, SingleExportMessage};
use crate::ledger::{JobType, LedgerEntry, LedgerStats};
use crate::observability::MetricsSnapshot;
use crate::queue::{DeadLetter, QueueStats};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    #[serde(flatten)]
    pub message: SingleExportMessage,
    /// Publish at this time instead of now
    #[serde(default)]
    pub run_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchExportRequest {
    #[serde(flatten)]
    pub message: BatchExportMessage,
    #[serde(default)]
    pub run_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAcceptedResponse {
    /// Ledger id to poll on `GET /jobs/{id}`
    pub message_id: String,
    pub job_type: JobType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_at: Option<DateTime<Utc>>,
    /// An earlier request with the same idempotency key was already accepted
    #[serde(default)]
    pub duplicate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobItemsResponse {
    pub job_id: String,
    pub items: Vec<LedgerEntry>,
}

/// `?limit=` of the dead-letter listing
#[derive(Debug, Deserialize)]
pub struct DeadLetterQuery {
    #[serde(default = "default_dead_letter_limit")]
    pub limit: usize,
}

fn default_dead_letter_limit() -> usize {
    50
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterItem {
    pub seq: u64,
    #[serde(flatten)]
    pub entry: DeadLetter,
}

#[derive(Debug, Serialize)]
pub struct DeadLettersResponse {
    pub items: Vec<DeadLetterItem>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: BTreeMap<String, String>,
    pub version: String,
    pub metrics: MetricsSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueueStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger: Option<LedgerStats>,
}
