use crate::handlers::JobEnvelope;
use crate::queue::store::{DeadLetter, FjallQueue, QueueError, QueueStats};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

/// A persisted message handed to a worker; `seq` is what gets acked
#[derive(Clone, Debug)]
pub struct Delivery {
    pub seq: u64,
    pub envelope: JobEnvelope,
}

/// JobBroker distributes export messages to the worker pool
///
/// Architecture:
/// 1. Intake calls `broker.enqueue(envelope)` (or `schedule` for a later run)
/// 2. Broker persists the envelope to FjallQueue (atomic, get seq)
/// 3. Broker sends Delivery{seq, envelope} to a worker via mpsc channel
/// 4. Round-robin distribution across worker pool
/// 5. Backpressure via bounded channels (default: 100 per worker)
///
/// The message stays in the queue until the worker acks it or it is
/// dead-lettered; `redeliver_pending` replays whatever is left after a restart.
pub struct JobBroker {
    queue: Arc<RwLock<FjallQueue>>,
    worker_channels: Vec<mpsc::Sender<Delivery>>,
    next_worker: AtomicUsize,
}

impl JobBroker {
    /// Create a new JobBroker with worker channels
    ///
    /// Returns the broker and one receiver per worker.
    pub fn new(
        queue: Arc<RwLock<FjallQueue>>,
        num_workers: usize,
        channel_size: usize,
    ) -> (Self, Vec<mpsc::Receiver<Delivery>>) {
        info!(
            num_workers,
            channel_size, "Creating JobBroker with worker channels"
        );

        let (worker_channels, worker_receivers): (Vec<_>, Vec<_>) = (0..num_workers.max(1))
            .map(|_| mpsc::channel(channel_size.max(1)))
            .unzip();

        let broker = Self {
            queue,
            worker_channels,
            next_worker: AtomicUsize::new(0),
        };

        (broker, worker_receivers)
    }

    /// Send to the next worker (round-robin). A closed channel is logged, not
    /// an error: the message is already safe in the queue.
    async fn dispatch(&self, delivery: Delivery) {
        let seq = delivery.seq;
        let worker_idx =
            self.next_worker.fetch_add(1, Ordering::Relaxed) % self.worker_channels.len();

        match self.worker_channels[worker_idx].send(delivery).await {
            Ok(_) => debug!(seq, worker_idx, "Message sent to worker"),
            Err(_) => warn!(seq, worker_idx, "Worker channel closed, message left in queue"),
        }
    }

    /// Persist and dispatch a message for immediate handling
    pub async fn enqueue(&self, envelope: JobEnvelope) -> Result<u64, QueueError> {
        let seq = {
            let queue = self.queue.write().await;
            queue.enqueue(&envelope)?
        };

        debug!(
            seq,
            message_id = %envelope.message_id,
            job_type = envelope.job_type().as_str(),
            "Message persisted to queue"
        );

        self.dispatch(Delivery { seq, envelope }).await;
        Ok(seq)
    }

    /// Persist a message for delivery at `run_at`
    pub async fn schedule(
        &self,
        envelope: JobEnvelope,
        run_at: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let queue = self.queue.write().await;
        queue.schedule(&envelope, run_at)
    }

    /// Move scheduled messages whose time has come onto the live queue
    pub async fn promote_due(&self, now: DateTime<Utc>) -> Result<usize, QueueError> {
        let due = {
            let queue = self.queue.read().await;
            queue.due(now)?
        };

        let count = due.len();
        for (key, envelope) in due {
            // Enqueue before removing: a crash in between duplicates, never loses
            self.enqueue(envelope).await?;
            self.queue.write().await.remove_scheduled(&key)?;
        }

        if count > 0 {
            info!(count, "Promoted scheduled messages");
        }
        Ok(count)
    }

    /// Dispatch every persisted but unacked message again (startup recovery)
    pub async fn redeliver_pending(&self) -> Result<usize, QueueError> {
        let pending = {
            let queue = self.queue.read().await;
            queue.pending()?
        };

        let count = pending.len();
        for (seq, envelope) in pending {
            self.dispatch(Delivery { seq, envelope }).await;
        }

        if count > 0 {
            info!(count, "Redelivered unacknowledged messages");
        }
        Ok(count)
    }

    pub async fn ack(&self, seq: u64) -> Result<(), QueueError> {
        self.queue.write().await.ack(seq)
    }

    pub async fn dead_letter(
        &self,
        seq: u64,
        code: &str,
        message: &str,
        attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        self.queue
            .write()
            .await
            .move_to_dlq(seq, code, message, attempts, now)
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        self.queue.read().await.stats()
    }

    /// Most recent dead letters first, at most `limit`
    pub async fn dead_letters(&self, limit: usize) -> Result<Vec<(u64, DeadLetter)>, QueueError> {
        self.queue.read().await.list_dlq(limit)
    }

    /// Check if all worker channels are healthy (not closed)
    pub fn health_check(&self) -> bool {
        self.worker_channels.iter().all(|ch| !ch.is_closed())
    }
}
