//! Retries and deferred runs
//!
//! Both are the same operation: put a message on the `scheduled` partition
//! for a future time. A promoter task moves it onto the live queue once due.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::broker::{Delivery, JobBroker};
use super::store::QueueError;
use crate::clock::Clock;
use crate::config::RetryConfig;
use crate::handlers::{ExportError, JobEnvelope};
use crate::observability::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Deliveries allowed, the first one included
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before redelivering after `attempt` failed: `base * 2^(attempt-1)`, capped
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn should_retry(&self, attempt: u32, error: &ExportError) -> bool {
        error.is_retryable() && attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.base_delay.as_duration(),
            max_delay: config.max_delay.as_duration(),
        }
    }
}

/// What happened to a failed delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureAction {
    Retry {
        next_attempt: u32,
        run_at: DateTime<Utc>,
    },
    DeadLettered,
}

pub struct ExportScheduler {
    broker: Arc<JobBroker>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
}

impl ExportScheduler {
    pub fn new(
        broker: Arc<JobBroker>,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            broker,
            policy,
            clock,
            metrics,
        }
    }

    /// Accept a message: dispatch now, or hold it when `run_at` is in the future
    pub async fn submit(&self, envelope: JobEnvelope) -> Result<(), QueueError> {
        match envelope.run_at {
            Some(run_at) if run_at > self.clock.now() => self.defer(envelope, run_at).await,
            _ => self.broker.enqueue(envelope).await.map(|_| ()),
        }
    }

    /// Deliver `envelope` at `run_at`
    pub async fn defer(&self, envelope: JobEnvelope, run_at: DateTime<Utc>) -> Result<(), QueueError> {
        info!(message_id = %envelope.message_id, %run_at, "Deferring message");
        self.broker.schedule(envelope, run_at).await
    }

    /// Reschedule a failed delivery with backoff, or dead-letter it
    pub async fn handle_failure(
        &self,
        delivery: &Delivery,
        error: &ExportError,
    ) -> Result<FailureAction, QueueError> {
        let attempt = delivery.envelope.attempt;
        let now = self.clock.now();

        if self.policy.should_retry(attempt, error) {
            let delay = self.policy.delay_for(attempt);
            let run_at = TimeDelta::from_std(delay)
                .ok()
                .and_then(|delta| now.checked_add_signed(delta))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);

            let mut next = delivery.envelope.clone();
            next.attempt = attempt + 1;
            next.run_at = Some(run_at);

            // Schedule before ack: a crash in between redelivers, never drops
            self.broker.schedule(next, run_at).await?;
            self.broker.ack(delivery.seq).await?;
            self.metrics.message_retried();

            warn!(
                message_id = %delivery.envelope.message_id,
                attempt,
                code = error.code(),
                ?delay,
                "Export failed, retry scheduled"
            );
            return Ok(FailureAction::Retry {
                next_attempt: attempt + 1,
                run_at,
            });
        }

        self.broker
            .dead_letter(delivery.seq, error.code(), &error.to_string(), attempt, now)
            .await?;
        self.metrics.message_dead_lettered();

        error!(
            message_id = %delivery.envelope.message_id,
            attempt,
            code = error.code(),
            "Export failed permanently, moved to DLQ"
        );
        Ok(FailureAction::DeadLettered)
    }

    /// Promote due messages every `interval` until shutdown is signalled
    pub fn spawn_promoter(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.broker.promote_due(self.clock.now()).await {
                            error!(error = %e, "Promoting scheduled messages failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Scheduler promoter stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}
