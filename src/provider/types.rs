use std::collections::BTreeMap;

use bon::Builder;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::projects::AssetRef;

/// Opaque id the provider hands back on submission
pub type CorrelationId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Everything the provider needs to render one project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(rename_all = "camelCase")]
pub struct RenderSpec {
    /// Caller-chosen id (message id, or `{batch_id}:{project_id}`)
    #[builder(into)]
    pub id: String,
    #[builder(into)]
    pub project_id: String,
    #[builder(into)]
    pub format: String,
    pub quality: Option<String>,
    pub dimensions: Option<Dimensions>,
    #[builder(default)]
    pub content: Value,
    #[builder(default)]
    pub assets: Vec<AssetRef>,
    pub brand: Option<Value>,
    #[builder(default)]
    pub metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RenderState {
    Queued,
    Processing,
    Completed,
    Failed,
    /// Any in-progress marker this client does not know by name
    #[serde(other)]
    Unknown,
}

/// Status snapshot returned by a poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderStatus {
    #[serde(rename = "status")]
    pub state: RenderState,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl RenderStatus {
    pub fn in_progress() -> Self {
        Self {
            state: RenderState::Processing,
            download_url: None,
            file_size: None,
            error: None,
            metadata: None,
        }
    }

    pub fn completed(download_url: impl Into<String>, file_size: Option<u64>) -> Self {
        Self {
            state: RenderState::Completed,
            download_url: Some(download_url.into()),
            file_size,
            ..Self::in_progress()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            state: RenderState::Failed,
            error: Some(error.into()),
            ..Self::in_progress()
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, RenderState::Completed | RenderState::Failed)
    }
}
