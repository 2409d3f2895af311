//! Shared fakes for the handler and API integration tests
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};
use tempfile::TempDir;

use exportbox::clock::ManualClock;
use exportbox::handlers::{ExportContext, PollPolicy};
use exportbox::ledger::{FjallLedger, JobLedger, LedgerEntry, LedgerError};
use exportbox::observability::Metrics;
use exportbox::projects::{
    AssetRef, FjallProjectStore, Project, ProjectKind, ProjectStore, ProjectStoreError,
};
use exportbox::provider::{CorrelationId, ProviderError, RenderProvider, RenderSpec, RenderStatus};
use exportbox::storage::{ArtifactStore, StorageError, StoredArtifact};

pub const TENANT: &str = "acme";

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap()
}

/// One scripted answer to a status read
#[derive(Debug, Clone)]
pub enum Step {
    Status(RenderStatus),
    Unavailable,
}

/// Render provider whose status answers are scripted per project.
///
/// The last step of a script repeats forever; an unscripted project stays
/// in progress forever.
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    submitted: Mutex<Vec<RenderSpec>>,
    cancelled: Mutex<Vec<String>>,
    status_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn script(&self, project_id: &str, steps: Vec<Step>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(project_id.to_string(), steps.into());
    }

    /// Completes on the `polls`-th status read with a fixed download url
    pub fn complete_after(&self, project_id: &str, polls: usize) {
        let mut steps = vec![Step::Status(RenderStatus::in_progress()); polls.saturating_sub(1)];
        steps.push(Step::Status(RenderStatus::completed(
            download_url(project_id),
            Some(2048),
        )));
        self.script(project_id, steps);
    }

    pub fn fail_with(&self, project_id: &str, message: &str) {
        self.script(project_id, vec![Step::Status(RenderStatus::failed(message))]);
    }

    pub fn submitted(&self) -> Vec<RenderSpec> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

pub fn correlation_id(project_id: &str) -> String {
    format!("render-{}", project_id)
}

pub fn download_url(project_id: &str) -> String {
    format!("https://render.test/out/{}", project_id)
}

#[async_trait]
impl RenderProvider for ScriptedProvider {
    async fn submit(&self, spec: &RenderSpec) -> Result<CorrelationId, ProviderError> {
        self.submitted.lock().unwrap().push(spec.clone());
        Ok(correlation_id(&spec.project_id))
    }

    async fn status(&self, correlation_id: &str) -> Result<RenderStatus, ProviderError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let project_id = correlation_id.trim_start_matches("render-");

        let step = {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(project_id) {
                Some(steps) if steps.len() > 1 => steps.pop_front(),
                Some(steps) => steps.front().cloned(),
                None => None,
            }
        };

        match step {
            Some(Step::Status(status)) => Ok(status),
            Some(Step::Unavailable) => Err(ProviderError::Unavailable("connection reset".into())),
            None => Ok(RenderStatus::in_progress()),
        }
    }

    async fn cancel(&self, correlation_id: &str) -> Result<bool, ProviderError> {
        self.cancelled.lock().unwrap().push(correlation_id.to_string());
        Ok(true)
    }

    async fn supported_formats(&self) -> Result<Vec<String>, ProviderError> {
        Ok(vec!["PDF".into(), "PNG".into(), "MP4".into()])
    }

    async fn estimate_duration(&self, _spec: &RenderSpec) -> Result<Duration, ProviderError> {
        Ok(Duration::from_secs(30))
    }
}

/// Artifact store that records copies instead of fetching anything
#[derive(Default)]
pub struct RecordingArtifacts {
    copies: Mutex<Vec<(String, String)>>,
    fail: AtomicBool,
}

impl RecordingArtifacts {
    pub fn fail_writes(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// `(key, source_url)` pairs in copy order
    pub fn copies(&self) -> Vec<(String, String)> {
        self.copies.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactStore for RecordingArtifacts {
    async fn copy_from_url(
        &self,
        key: &str,
        source_url: &str,
    ) -> Result<StoredArtifact, StorageError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed {
                key: key.to_string(),
                reason: "bucket unreachable".into(),
            });
        }
        self.copies
            .lock()
            .unwrap()
            .push((key.to_string(), source_url.to_string()));
        Ok(StoredArtifact {
            key: key.to_string(),
            size: 2048,
            etag: None,
        })
    }

    fn link(&self, key: &str) -> String {
        format!("https://cdn.test/{}", key)
    }
}

/// Delegates to the fjall store but refuses bulk status changes
pub struct BulkFailingProjects(pub Arc<FjallProjectStore>);

#[async_trait]
impl ProjectStore for BulkFailingProjects {
    async fn get(&self, tenant_id: &str, project_id: &str) -> Result<Option<Project>, ProjectStoreError> {
        self.0.get(tenant_id, project_id).await
    }

    async fn mark_exporting(&self, tenant_id: &str, project_id: &str) -> Result<(), ProjectStoreError> {
        self.0.mark_exporting(tenant_id, project_id).await
    }

    async fn mark_exporting_many(
        &self,
        _tenant_id: &str,
        _project_ids: &[String],
    ) -> Result<usize, ProjectStoreError> {
        Err(ProjectStoreError::Unavailable("primary database is read-only".into()))
    }

    async fn mark_exported(
        &self,
        tenant_id: &str,
        project_id: &str,
        export_url: &str,
        exported_at: DateTime<Utc>,
    ) -> Result<(), ProjectStoreError> {
        self.0
            .mark_exported(tenant_id, project_id, export_url, exported_at)
            .await
    }

    async fn mark_failed(&self, tenant_id: &str, project_id: &str) -> Result<(), ProjectStoreError> {
        self.0.mark_failed(tenant_id, project_id).await
    }

    async fn fail_if_exporting(&self, tenant_id: &str, project_id: &str) -> Result<bool, ProjectStoreError> {
        self.0.fail_if_exporting(tenant_id, project_id).await
    }
}

/// Delegates to the fjall ledger but cannot complete batch parents (ids without `:`)
pub struct ParentCompleteFailing(pub Arc<FjallLedger>);

#[async_trait]
impl JobLedger for ParentCompleteFailing {
    async fn upsert(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        self.0.upsert(entry).await
    }

    async fn get(&self, id: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        self.0.get(id).await
    }

    async fn children(&self, parent_id: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.0.children(parent_id).await
    }

    async fn reserve(&self, entry: &LedgerEntry) -> Result<bool, LedgerError> {
        self.0.reserve(entry).await
    }

    async fn complete(&self, id: &str, result: Value, now: DateTime<Utc>) -> Result<LedgerEntry, LedgerError> {
        if !id.contains(':') {
            return Err(LedgerError::Io(std::io::Error::other("disk full")));
        }
        self.0.complete(id, result, now).await
    }
}

pub fn print_project(id: &str, tenant_id: &str) -> Project {
    Project::new(id, tenant_id, ProjectKind::Print, json!({"pages": [{"blocks": []}]})).with_assets(
        vec![AssetRef {
            id: format!("{}-logo", id),
            url: Some(format!("https://assets.test/{}/logo.png", id)),
            mime_type: Some("image/png".into()),
        }],
    )
}

pub fn video_project(id: &str, tenant_id: &str) -> Project {
    Project::new(id, tenant_id, ProjectKind::Video, json!({"scenes": [{"duration": 4}]}))
}

/// Stores, fakes and a manual clock wired into one [`ExportContext`]
pub struct Harness {
    _temp_dir: TempDir,
    pub ledger: Arc<FjallLedger>,
    pub projects: Arc<FjallProjectStore>,
    pub provider: Arc<ScriptedProvider>,
    pub artifacts: Arc<RecordingArtifacts>,
    pub clock: Arc<ManualClock>,
    pub metrics: Arc<Metrics>,
}

impl Harness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let ledger = Arc::new(FjallLedger::open(temp_dir.path().join("ledger")).unwrap());
        let projects = Arc::new(FjallProjectStore::open(temp_dir.path().join("projects")).unwrap());

        Self {
            _temp_dir: temp_dir,
            ledger,
            projects,
            provider: Arc::new(ScriptedProvider::default()),
            artifacts: Arc::new(RecordingArtifacts::default()),
            clock: Arc::new(ManualClock::new(start_time())),
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn seed(&self, project: Project) {
        self.projects.put(&project).unwrap();
    }

    /// Default polling budget: 60 reads, 5s apart
    pub fn context(&self) -> ExportContext {
        self.context_with_projects(self.projects.clone())
    }

    pub fn context_with_projects(&self, projects: Arc<dyn ProjectStore>) -> ExportContext {
        ExportContext {
            projects,
            ..self.context_with_ledger(self.ledger.clone())
        }
    }

    pub fn context_with_ledger(&self, ledger: Arc<dyn JobLedger>) -> ExportContext {
        ExportContext {
            projects: self.projects.clone(),
            ledger,
            provider: self.provider.clone(),
            artifacts: self.artifacts.clone(),
            clock: self.clock.clone(),
            metrics: self.metrics.clone(),
            polling: PollPolicy::default(),
        }
    }

    pub async fn project(&self, tenant_id: &str, project_id: &str) -> Option<Project> {
        self.projects.get(tenant_id, project_id).await.unwrap()
    }
}
