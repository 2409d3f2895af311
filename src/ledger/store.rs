use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::JobLedger;
use super::error::Result;
use super::models::{LedgerEntry, LedgerStatus};
use super::partitions::{encode_child_key, encode_child_prefix, encode_job_key};

/// Fjall-backed persistent storage for ledger entries
#[derive(Clone)]
pub struct FjallLedger {
    keyspace: Keyspace,
    jobs: PartitionHandle,
    children: PartitionHandle,
    /// Serializes check-then-insert in `reserve`
    reserve_lock: Arc<Mutex<()>>,
}

impl FjallLedger {
    /// Open or create a ledger at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening Fjall ledger at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;
        let jobs = keyspace.open_partition("jobs", PartitionCreateOptions::default())?;
        let children = keyspace.open_partition("children", PartitionCreateOptions::default())?;

        info!("Fjall ledger opened successfully");
        Ok(Self {
            keyspace,
            jobs,
            children,
            reserve_lock: Arc::new(Mutex::new(())),
        })
    }

    fn read(&self, id: &str) -> Result<Option<LedgerEntry>> {
        match self.jobs.get(encode_job_key(id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    /// Count entries per status (for the health endpoint)
    pub fn stats(&self) -> Result<LedgerStats> {
        let mut stats = LedgerStats::default();

        for item in self.jobs.iter() {
            let (_, value) = item?;
            let entry: LedgerEntry = serde_json::from_slice(&value)?;
            match entry.status {
                LedgerStatus::Pending => stats.pending += 1,
                LedgerStatus::Processing => stats.processing += 1,
                LedgerStatus::Completed => stats.completed += 1,
                LedgerStatus::Failed => stats.failed += 1,
            }
        }

        Ok(stats)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct LedgerStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

#[async_trait]
impl JobLedger for FjallLedger {
    async fn upsert(&self, entry: &LedgerEntry) -> Result<()> {
        self.jobs
            .insert(encode_job_key(&entry.id), serde_json::to_vec(entry)?)?;
        if let Some(parent_id) = &entry.parent_id {
            self.children
                .insert(encode_child_key(parent_id, &entry.id), entry.id.as_bytes())?;
        }
        debug!(entry_id = %entry.id, status = ?entry.status, "Upserted ledger entry");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<LedgerEntry>> {
        self.read(id)
    }

    async fn children(&self, parent_id: &str) -> Result<Vec<LedgerEntry>> {
        let mut entries = Vec::new();
        for item in self.children.prefix(encode_child_prefix(parent_id)) {
            let (_, child_id) = item?;
            let child_id = String::from_utf8_lossy(&child_id).to_string();
            if let Some(entry) = self.read(&child_id)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    async fn reserve(&self, entry: &LedgerEntry) -> Result<bool> {
        let _guard = self.reserve_lock.lock().await;
        if let Some(existing) = self.read(&entry.id)? {
            let never_ran = existing.status == LedgerStatus::Failed && existing.attempts == 0;
            if !never_ran {
                debug!(entry_id = %entry.id, status = ?existing.status, "Ledger id already taken");
                return Ok(false);
            }
        }
        self.upsert(entry).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::models::JobType;
    use chrono::Utc;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_ledger() -> (FjallLedger, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let ledger = FjallLedger::open(temp_dir.path().join("test_ledger")).unwrap();
        (ledger, temp_dir)
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let (ledger, _temp) = create_test_ledger();
        let entry = LedgerEntry::new("msg-1", JobType::Export, "t1", Utc::now())
            .with_project("p1")
            .with_metadata(json!({"format": "PDF"}));

        ledger.upsert(&entry).await.unwrap();
        let stored = ledger.get("msg-1").await.unwrap().unwrap();

        assert_eq!(stored, entry);
        assert!(ledger.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_repeated_upsert_keeps_single_entry() {
        let (ledger, _temp) = create_test_ledger();
        let now = Utc::now();
        let mut entry = LedgerEntry::new("msg-1", JobType::Export, "t1", now);

        ledger.upsert(&entry).await.unwrap();
        entry.begin(now);
        ledger.upsert(&entry).await.unwrap();
        entry.complete(json!({"key": "k"}), now);
        ledger.upsert(&entry).await.unwrap();

        let stats = ledger.stats().unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.pending + stats.processing + stats.failed, 0);
    }

    #[tokio::test]
    async fn test_start_complete_fail_helpers() {
        let (ledger, _temp) = create_test_ledger();
        let now = Utc::now();

        let started = ledger
            .start(LedgerEntry::new("msg-1", JobType::Export, "t1", now), now)
            .await
            .unwrap();
        assert_eq!(started.status, LedgerStatus::Processing);

        let done = ledger.complete("msg-1", json!({"key": "k"}), now).await.unwrap();
        assert_eq!(done.status, LedgerStatus::Completed);

        let restarted = ledger
            .start(LedgerEntry::new("msg-1", JobType::Export, "t1", now), now)
            .await
            .unwrap();
        assert_eq!(restarted.attempts, 2);

        let failed = ledger.fail("msg-1", "boom", now).await.unwrap();
        assert_eq!(failed.error.as_deref(), Some("boom"));

        assert!(ledger.fail("missing", "boom", now).await.is_err());
    }

    #[tokio::test]
    async fn test_children_listed_by_parent() {
        let (ledger, _temp) = create_test_ledger();
        let now = Utc::now();

        ledger
            .upsert(&LedgerEntry::new("b1", JobType::BatchExport, "t1", now))
            .await
            .unwrap();
        for project in ["p1", "p2"] {
            let child = LedgerEntry::new(format!("b1:{project}"), JobType::Export, "t1", now)
                .with_parent("b1")
                .with_project(project);
            ledger.upsert(&child).await.unwrap();
        }
        let other = LedgerEntry::new("b2:p9", JobType::Export, "t1", now).with_parent("b2");
        ledger.upsert(&other).await.unwrap();

        let children = ledger.children("b1").await.unwrap();
        let ids: Vec<_> = children.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["b1:p1", "b1:p2"]);
    }

    #[tokio::test]
    async fn test_reserve_claims_an_id_once() {
        let (ledger, _temp) = create_test_ledger();
        let now = Utc::now();
        let entry = LedgerEntry::new("order-7", JobType::Export, "t1", now);

        let (a, b) = tokio::join!(ledger.reserve(&entry), ledger.reserve(&entry));
        assert!(a.unwrap() ^ b.unwrap());
        assert_eq!(ledger.stats().unwrap().pending, 1);

        // Still taken once a worker has picked it up
        ledger.start(entry.clone(), now).await.unwrap();
        assert!(!ledger.reserve(&entry).await.unwrap());
    }

    #[tokio::test]
    async fn test_reserve_reclaims_never_attempted_failure() {
        let (ledger, _temp) = create_test_ledger();
        let now = Utc::now();
        let entry = LedgerEntry::new("order-8", JobType::Export, "t1", now);

        assert!(ledger.reserve(&entry).await.unwrap());
        ledger.fail("order-8", "queue unavailable", now).await.unwrap();
        assert!(ledger.reserve(&entry).await.unwrap());
        assert_eq!(
            ledger.get("order-8").await.unwrap().unwrap().status,
            LedgerStatus::Pending
        );
    }

    #[test]
    fn test_persist() {
        let (ledger, _temp) = create_test_ledger();
        ledger.persist().unwrap();
    }
}
