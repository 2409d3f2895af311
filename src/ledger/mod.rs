/// Job ledger: durable record of every export attempt
///
/// Each queue message gets exactly one entry keyed by its message id; batch
/// messages additionally get one child entry per project, keyed
/// `{batch_id}:{project_id}`. Entries are only ever upserted, so a redelivered
/// message rewrites its own record instead of adding a second one. Nothing in
/// this crate deletes entries.
///
/// ## Usage
///
/// ```rust,ignore
/// use exportbox::ledger::{FjallLedger, JobLedger, JobType, LedgerEntry};
///
/// let ledger = FjallLedger::open("data/ledger")?;
/// ledger.start(LedgerEntry::new(msg_id, JobType::Export, tenant, now), now).await?;
/// ledger.complete(msg_id, result, now).await?;
/// ```

pub mod error;
pub mod models;
pub mod partitions;
pub mod store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

pub use error::{LedgerError, Result};
pub use models::{JobType, LedgerEntry, LedgerStatus};
pub use store::{FjallLedger, LedgerStats};

#[async_trait]
pub trait JobLedger: Send + Sync {
    /// Insert or replace the entry with `entry.id`
    async fn upsert(&self, entry: &LedgerEntry) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<LedgerEntry>>;

    /// Per-item entries recorded under a batch entry
    async fn children(&self, parent_id: &str) -> Result<Vec<LedgerEntry>>;

    /// Insert `entry` only if its id is free; `false` means another submission holds it.
    /// An id whose entry failed without ever being attempted counts as free.
    async fn reserve(&self, entry: &LedgerEntry) -> Result<bool>;

    /// Move an entry to PROCESSING, creating it from `template` on first delivery
    async fn start(&self, template: LedgerEntry, now: DateTime<Utc>) -> Result<LedgerEntry> {
        let mut entry = match self.get(&template.id).await? {
            Some(mut existing) => {
                existing.metadata = template.metadata;
                existing
            }
            None => template,
        };
        entry.begin(now);
        self.upsert(&entry).await?;
        Ok(entry)
    }

    async fn complete(&self, id: &str, result: Value, now: DateTime<Utc>) -> Result<LedgerEntry> {
        let mut entry = self
            .get(id)
            .await?
            .ok_or_else(|| LedgerError::EntryNotFound(id.to_string()))?;
        entry.complete(result, now);
        self.upsert(&entry).await?;
        Ok(entry)
    }

    async fn fail(&self, id: &str, error: &str, now: DateTime<Utc>) -> Result<LedgerEntry> {
        let mut entry = self
            .get(id)
            .await?
            .ok_or_else(|| LedgerError::EntryNotFound(id.to_string()))?;
        entry.fail(error, now);
        self.upsert(&entry).await?;
        Ok(entry)
    }
}
