use crate::handlers::JobEnvelope;
use chrono::{DateTime, Utc};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Envelope encoding error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Message not found: seq={0}")]
    MessageNotFound(u64),

    #[error("Invalid key in {0} partition")]
    InvalidKey(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// A message that will not be delivered again
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub envelope: JobEnvelope,
    pub failure_code: String,
    pub failure_message: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub scheduled: usize,
    pub dead_lettered: usize,
}

/// Key of a scheduled message: run time first so iteration is in due order
fn encode_scheduled_key(run_at: DateTime<Utc>, seq: u64) -> String {
    format!("{:020}:{:020}", run_at.timestamp_millis().max(0), seq)
}

fn decode_scheduled_run_at(key: &[u8]) -> Result<i64> {
    std::str::from_utf8(key)
        .ok()
        .and_then(|k| k.split(':').next())
        .and_then(|ms| ms.parse::<i64>().ok())
        .ok_or(QueueError::InvalidKey("scheduled"))
}

fn decode_seq(key: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = key.try_into().map_err(|_| QueueError::InvalidKey("tasks"))?;
    Ok(u64::from_be_bytes(bytes))
}

/// FjallQueue persists queue messages using Fjall embedded database
///
/// Architecture:
/// - `tasks` partition: u64 (big-endian) → JobEnvelope (JSON), live until acked
/// - `metadata` partition: "next_seq" → u64 (atomic counter)
/// - `scheduled` partition: "{run_at_ms}:{seq}" → JobEnvelope (JSON)
/// - `dlq` partition: u64 (big-endian) → DeadLetter (JSON)
///
/// Messages are persisted before being sent to workers via mpsc channels and
/// removed only on ack, so anything in `tasks` after a restart was never
/// finished and gets delivered again.
pub struct FjallQueue {
    keyspace: Keyspace,
    tasks: PartitionHandle,
    metadata: PartitionHandle,
    scheduled: PartitionHandle,
    dlq: PartitionHandle,
    seq_counter: Arc<AtomicU64>,
}

impl FjallQueue {
    /// Open or create a new FjallQueue at the specified path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening FjallQueue at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;

        let tasks = keyspace.open_partition("tasks", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;
        let scheduled = keyspace.open_partition("scheduled", PartitionCreateOptions::default())?;
        let dlq = keyspace.open_partition("dlq", PartitionCreateOptions::default())?;

        let current_seq = match metadata.get(b"next_seq")? {
            Some(bytes) => decode_seq(&bytes)?,
            None => 0,
        };

        info!("FjallQueue opened, current sequence: {}", current_seq);

        Ok(Self {
            keyspace,
            tasks,
            metadata,
            scheduled,
            dlq,
            seq_counter: Arc::new(AtomicU64::new(current_seq)),
        })
    }

    fn next_seq(&self) -> Result<u64> {
        let seq = self.seq_counter.fetch_add(1, Ordering::SeqCst);
        self.metadata.insert(b"next_seq", (seq + 1).to_be_bytes())?;
        Ok(seq)
    }

    /// Persist a message for immediate delivery and return its sequence number
    pub fn enqueue(&self, envelope: &JobEnvelope) -> Result<u64> {
        let value = serde_json::to_vec(envelope)?;
        let seq = self.next_seq()?;
        self.tasks.insert(seq.to_be_bytes(), value)?;

        debug!(seq, message_id = %envelope.message_id, "Message enqueued");
        Ok(seq)
    }

    pub fn get(&self, seq: u64) -> Result<Option<JobEnvelope>> {
        match self.tasks.get(seq.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Forget a handled message
    pub fn ack(&self, seq: u64) -> Result<()> {
        self.tasks.remove(seq.to_be_bytes())?;
        debug!(seq, "Message acked");
        Ok(())
    }

    /// Messages persisted but never acked, in sequence order
    pub fn pending(&self) -> Result<Vec<(u64, JobEnvelope)>> {
        let mut results = Vec::new();
        for item in self.tasks.iter() {
            let (key, value) = item?;
            results.push((decode_seq(&key)?, serde_json::from_slice(&value)?));
        }
        Ok(results)
    }

    /// Hold a message until `run_at`
    pub fn schedule(&self, envelope: &JobEnvelope, run_at: DateTime<Utc>) -> Result<()> {
        let value = serde_json::to_vec(envelope)?;
        let key = encode_scheduled_key(run_at, self.next_seq()?);
        self.scheduled.insert(key.as_bytes(), value)?;

        debug!(message_id = %envelope.message_id, %run_at, "Message scheduled");
        Ok(())
    }

    /// Scheduled messages whose run time is at or before `now`, earliest first
    pub fn due(&self, now: DateTime<Utc>) -> Result<Vec<(Vec<u8>, JobEnvelope)>> {
        let now_ms = now.timestamp_millis();
        let mut results = Vec::new();

        for item in self.scheduled.iter() {
            let (key, value) = item?;
            if decode_scheduled_run_at(&key)? > now_ms {
                break;
            }
            results.push((key.to_vec(), serde_json::from_slice(&value)?));
        }

        Ok(results)
    }

    pub fn remove_scheduled(&self, key: &[u8]) -> Result<()> {
        self.scheduled.remove(key)?;
        Ok(())
    }

    /// Move a live message to the Dead Letter Queue
    ///
    /// Called when a message exhausts its retries or fails permanently.
    pub fn move_to_dlq(
        &self,
        seq: u64,
        failure_code: &str,
        failure_message: &str,
        attempts: u32,
        failed_at: DateTime<Utc>,
    ) -> Result<()> {
        let envelope = self.get(seq)?.ok_or(QueueError::MessageNotFound(seq))?;

        let entry = DeadLetter {
            envelope,
            failure_code: failure_code.to_string(),
            failure_message: failure_message.to_string(),
            attempts,
            failed_at,
        };

        self.dlq.insert(seq.to_be_bytes(), serde_json::to_vec(&entry)?)?;
        self.tasks.remove(seq.to_be_bytes())?;

        info!(seq, attempts, failure_code, "Message moved to DLQ");
        Ok(())
    }

    /// Dead letters, newest first
    pub fn list_dlq(&self, limit: usize) -> Result<Vec<(u64, DeadLetter)>> {
        let mut results = Vec::new();
        for item in self.dlq.iter().rev().take(limit) {
            let (key, value) = item?;
            results.push((decode_seq(&key)?, serde_json::from_slice(&value)?));
        }
        Ok(results)
    }

    pub fn stats(&self) -> Result<QueueStats> {
        Ok(QueueStats {
            pending: self.tasks.len()?,
            scheduled: self.scheduled.len()?,
            dead_lettered: self.dlq.len()?,
        })
    }

    /// Flush all writes to disk
    pub fn flush(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }
}
