use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span};

use crate::clock::Clock;
use crate::handlers::{ExportError, HandlerRegistry};
use crate::queue::{Delivery, ExportScheduler, FailureAction, JobBroker, QueueError};

/// What a worker did with one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Acked,
    Retrying { next_attempt: u32 },
    DeadLettered,
}

/// One queue consumer
#[derive(Clone)]
pub struct Worker {
    id: usize,
    registry: Arc<HandlerRegistry>,
    broker: Arc<JobBroker>,
    scheduler: Arc<ExportScheduler>,
    clock: Arc<dyn Clock>,
}

impl Worker {
    pub fn new(
        id: usize,
        registry: Arc<HandlerRegistry>,
        broker: Arc<JobBroker>,
        scheduler: Arc<ExportScheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            id,
            registry,
            broker,
            scheduler,
            clock,
        }
    }

    /// Consume until the channel closes or shutdown is signalled.
    ///
    /// A delivery that is in progress when shutdown arrives finishes first.
    pub async fn run(self, mut rx: mpsc::Receiver<Delivery>, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id = self.id, "Worker started");

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                delivery = rx.recv() => {
                    let Some(delivery) = delivery else {
                        debug!(worker_id = self.id, "Worker channel closed");
                        break;
                    };
                    if let Err(e) = self.process(delivery).await {
                        // Message stays in the queue and is redelivered on restart
                        error!(worker_id = self.id, error = %e, "Queue bookkeeping failed");
                    }
                }
            }
        }

        info!(worker_id = self.id, "Worker stopped");
    }

    /// Handle one delivery and settle it with the queue
    pub async fn process(&self, delivery: Delivery) -> Result<DeliveryOutcome, QueueError> {
        let span = info_span!(
            "delivery",
            worker_id = self.id,
            seq = delivery.seq,
            message_id = %delivery.envelope.message_id,
            job_type = delivery.envelope.job_type().as_str(),
            attempt = delivery.envelope.attempt,
        );
        self.settle(delivery).instrument(span).await
    }

    async fn settle(&self, delivery: Delivery) -> Result<DeliveryOutcome, QueueError> {
        let job_type = delivery.envelope.job_type();

        let handler = match self.registry.get(job_type) {
            Ok(handler) => handler,
            Err(e) => {
                error!(error = %e, "No handler registered, dead-lettering");
                self.broker
                    .dead_letter(
                        delivery.seq,
                        "UNSUPPORTED_JOB_TYPE",
                        &e.to_string(),
                        delivery.envelope.attempt,
                        self.clock.now(),
                    )
                    .await?;
                return Ok(DeliveryOutcome::DeadLettered);
            }
        };

        match handler.handle(&delivery.envelope).await {
            Ok(_) => {
                self.broker.ack(delivery.seq).await?;
                debug!("Delivery acked");
                Ok(DeliveryOutcome::Acked)
            }
            Err(e) => self.fail(&delivery, &e).await,
        }
    }

    async fn fail(
        &self,
        delivery: &Delivery,
        error: &ExportError,
    ) -> Result<DeliveryOutcome, QueueError> {
        match self.scheduler.handle_failure(delivery, error).await? {
            FailureAction::Retry { next_attempt, .. } => {
                Ok(DeliveryOutcome::Retrying { next_attempt })
            }
            FailureAction::DeadLettered => Ok(DeliveryOutcome::DeadLettered),
        }
    }
}

/// Start one worker per receiver
pub fn spawn_workers(
    receivers: Vec<mpsc::Receiver<Delivery>>,
    registry: Arc<HandlerRegistry>,
    broker: Arc<JobBroker>,
    scheduler: Arc<ExportScheduler>,
    clock: Arc<dyn Clock>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    receivers
        .into_iter()
        .enumerate()
        .map(|(id, rx)| {
            let worker = Worker::new(
                id,
                registry.clone(),
                broker.clone(),
                scheduler.clone(),
                clock.clone(),
            );
            tokio::spawn(worker.run(rx, shutdown.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::handlers::{
        BatchExportMessage, ExportMessage, ExportOptions, HandlerOutput, JobEnvelope, JobHandler,
        SingleExportMessage,
    };
    use crate::ledger::JobType;
    use crate::observability::Metrics;
    use crate::queue::{FjallQueue, RetryPolicy};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::RwLock;

    /// Fails the first `failures` calls with the given error, then succeeds
    struct FlakyHandler {
        failures: usize,
        error: fn() -> ExportError,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler for FlakyHandler {
        fn job_type(&self) -> JobType {
            JobType::Export
        }

        async fn handle(&self, _envelope: &JobEnvelope) -> Result<HandlerOutput, ExportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err((self.error)())
            } else {
                Ok(HandlerOutput::Batch(Vec::new()))
            }
        }
    }

    struct Harness {
        _temp_dir: TempDir,
        broker: Arc<JobBroker>,
        receivers: Vec<mpsc::Receiver<Delivery>>,
        clock: Arc<ManualClock>,
        worker: Worker,
    }

    fn harness(handler: FlakyHandler) -> Harness {
        let temp_dir = TempDir::new().unwrap();
        let queue = Arc::new(RwLock::new(
            FjallQueue::open(temp_dir.path().join("queue")).unwrap(),
        ));
        let (broker, receivers) = JobBroker::new(queue, 1, 10);
        let broker = Arc::new(broker);
        let clock = Arc::new(ManualClock::default());
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
        };
        let scheduler = Arc::new(ExportScheduler::new(
            broker.clone(),
            policy,
            clock.clone(),
            Arc::new(Metrics::new()),
        ));

        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(handler));

        let worker = Worker::new(0, Arc::new(registry), broker.clone(), scheduler, clock.clone());
        Harness {
            _temp_dir: temp_dir,
            broker,
            receivers,
            clock,
            worker,
        }
    }

    fn export_envelope() -> JobEnvelope {
        JobEnvelope::new(
            ExportMessage::Export(SingleExportMessage {
                project_id: "P1".into(),
                tenant_id: "t1".into(),
                export_options: ExportOptions::new("PDF"),
                project: None,
            }),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_success_acks() {
        let mut h = harness(FlakyHandler {
            failures: 0,
            error: || ExportError::Internal("unused".into()),
            calls: AtomicUsize::new(0),
        });

        h.broker.enqueue(export_envelope()).await.unwrap();
        let delivery = h.receivers[0].recv().await.unwrap();

        assert_eq!(h.worker.process(delivery).await.unwrap(), DeliveryOutcome::Acked);
        assert_eq!(h.broker.stats().await.unwrap().pending, 0);
    }

    #[tokio::test]
    async fn test_retryable_failure_then_dead_letter_when_exhausted() {
        let mut h = harness(FlakyHandler {
            failures: 5,
            error: || ExportError::ProviderFailure("render engine crash".into()),
            calls: AtomicUsize::new(0),
        });

        h.broker.enqueue(export_envelope()).await.unwrap();
        let first = h.receivers[0].recv().await.unwrap();
        assert_eq!(
            h.worker.process(first).await.unwrap(),
            DeliveryOutcome::Retrying { next_attempt: 2 }
        );

        h.clock.advance(Duration::from_secs(10));
        h.broker.promote_due(h.clock.now()).await.unwrap();
        let second = h.receivers[0].recv().await.unwrap();
        assert_eq!(second.envelope.attempt, 2);
        assert_eq!(
            h.worker.process(second).await.unwrap(),
            DeliveryOutcome::DeadLettered
        );

        let stats = h.broker.stats().await.unwrap();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.scheduled, 0);
        assert_eq!(stats.dead_lettered, 1);
    }

    #[tokio::test]
    async fn test_missing_handler_dead_letters() {
        let mut h = harness(FlakyHandler {
            failures: 0,
            error: || ExportError::Internal("unused".into()),
            calls: AtomicUsize::new(0),
        });

        let batch = JobEnvelope::new(
            ExportMessage::BatchExport(BatchExportMessage {
                project_ids: vec!["P1".into()],
                tenant_id: "t1".into(),
                export_options: ExportOptions::new("PDF"),
            }),
            Utc::now(),
        );
        h.broker.enqueue(batch).await.unwrap();
        let delivery = h.receivers[0].recv().await.unwrap();

        assert_eq!(
            h.worker.process(delivery).await.unwrap(),
            DeliveryOutcome::DeadLettered
        );
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let h = harness(FlakyHandler {
            failures: 0,
            error: || ExportError::Internal("unused".into()),
            calls: AtomicUsize::new(0),
        });
        let Harness {
            _temp_dir,
            mut receivers,
            worker,
            ..
        } = h;

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run(receivers.remove(0), rx));
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
