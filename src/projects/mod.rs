//! Projects: the print and video documents this pipeline exports.
//!
//! Projects are owned by upstream editing features. The export pipeline only
//! reads their content and moves their status through
//! `* -> EXPORTING -> {EXPORTED | FAILED}`. [`ProjectStore`] is the seam to
//! whatever durable store holds them; [`FjallProjectStore`] keeps them in an
//! embedded keyspace so a single worker process can run standalone.

mod store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use store::FjallProjectStore;

#[derive(Debug, Error)]
pub enum ProjectStoreError {
    #[error("Project {project_id} not found for tenant {tenant_id}")]
    NotFound {
        tenant_id: String,
        project_id: String,
    },

    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Project store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, ProjectStoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectKind {
    Print,
    Video,
}

impl ProjectKind {
    /// Domain segment used in artifact keys
    pub fn as_domain(&self) -> &'static str {
        match self {
            ProjectKind::Print => "print",
            ProjectKind::Video => "video",
        }
    }

    /// Output formats a render of this kind can produce
    pub fn accepts_format(&self, format: &str) -> bool {
        let format = format.to_ascii_uppercase();
        match self {
            ProjectKind::Print => matches!(format.as_str(), "PDF" | "PNG" | "JPG"),
            ProjectKind::Video => matches!(format.as_str(), "MP4" | "MOV" | "GIF" | "WEBM"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStatus {
    Draft,
    Exporting,
    Exported,
    Failed,
}

/// Reference to an uploaded asset used by a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRef {
    pub id: String,
    /// Resolved source location; `None` means the upload never finished
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Content snapshot carried inline on an export message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectPayload {
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub assets: Vec<AssetRef>,
    #[serde(default)]
    pub brand: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub tenant_id: String,
    pub kind: ProjectKind,
    pub status: ProjectStatus,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub assets: Vec<AssetRef>,
    #[serde(default)]
    pub brand: Option<Value>,
    #[serde(default)]
    pub export_url: Option<String>,
    #[serde(default)]
    pub exported_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(
        id: impl Into<String>,
        tenant_id: impl Into<String>,
        kind: ProjectKind,
        content: Value,
    ) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            kind,
            status: ProjectStatus::Draft,
            content,
            assets: Vec::new(),
            brand: None,
            export_url: None,
            exported_at: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_assets(mut self, assets: Vec<AssetRef>) -> Self {
        self.assets = assets;
        self
    }

    pub fn with_brand(mut self, brand: Value) -> Self {
        self.brand = Some(brand);
        self
    }

    /// Replace content, assets and brand with the snapshot taken at enqueue time
    pub fn apply_payload(&mut self, payload: &ProjectPayload) {
        if !payload.content.is_null() {
            self.content = payload.content.clone();
        }
        if !payload.assets.is_empty() {
            self.assets = payload.assets.clone();
        }
        if payload.brand.is_some() {
            self.brand = payload.brand.clone();
        }
    }
}

/// Tenant-scoped access to project records.
///
/// Every method takes the tenant id; a project id that belongs to another
/// tenant behaves exactly like a missing one.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get(&self, tenant_id: &str, project_id: &str) -> Result<Option<Project>>;

    async fn mark_exporting(&self, tenant_id: &str, project_id: &str) -> Result<()>;

    /// Bulk transition; ids not owned by the tenant are skipped. Returns the number updated.
    async fn mark_exporting_many(&self, tenant_id: &str, project_ids: &[String]) -> Result<usize>;

    async fn mark_exported(
        &self,
        tenant_id: &str,
        project_id: &str,
        export_url: &str,
        exported_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn mark_failed(&self, tenant_id: &str, project_id: &str) -> Result<()>;

    /// Move to FAILED only while the project is still EXPORTING
    async fn fail_if_exporting(&self, tenant_id: &str, project_id: &str) -> Result<bool>;
}
