//! Queue to worker to handler, with fakes behind the handlers
mod support;

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::{RwLock, watch};

use exportbox::clock::Clock;
use exportbox::handlers::{
    BatchExportHandler, ExportMessage, ExportOptions, HandlerRegistry, JobEnvelope,
    SingleExportHandler, SingleExportMessage,
};
use exportbox::ledger::{JobLedger, LedgerEntry, LedgerStatus};
use exportbox::projects::ProjectStatus;
use exportbox::queue::{ExportScheduler, FjallQueue, JobBroker, RetryPolicy};
use exportbox::worker::spawn_workers;
use support::{Harness, TENANT, print_project, start_time};

fn export(project_id: &str, message_id: &str) -> JobEnvelope {
    JobEnvelope::new(
        ExportMessage::Export(SingleExportMessage {
            project_id: project_id.into(),
            tenant_id: TENANT.into(),
            export_options: ExportOptions::new("PDF"),
            project: None,
        }),
        start_time(),
    )
    .with_id(message_id)
}

/// Poll the ledger until the entry is terminal
async fn wait_terminal(h: &Harness, id: &str) -> LedgerEntry {
    for _ in 0..500 {
        if let Some(entry) = h.ledger.get(id).await.unwrap() {
            if entry.status.is_terminal() {
                return entry;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("ledger entry {} never became terminal", id);
}

#[tokio::test]
async fn test_workers_drive_messages_to_terminal_states() {
    let h = Harness::new();
    h.seed(print_project("P1", TENANT));
    h.seed(print_project("P2", TENANT));
    h.provider.complete_after("P1", 2);
    h.provider.fail_with("P2", "render engine crash");

    let queue_dir = TempDir::new().unwrap();
    let queue = Arc::new(RwLock::new(FjallQueue::open(queue_dir.path().join("queue")).unwrap()));
    let (broker, receivers) = JobBroker::new(queue, 2, 8);
    let broker = Arc::new(broker);
    let scheduler = Arc::new(ExportScheduler::new(
        broker.clone(),
        RetryPolicy::default(),
        h.clock.clone(),
        h.metrics.clone(),
    ));

    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(SingleExportHandler::new(h.context())));
    registry.register(Arc::new(BatchExportHandler::new(h.context())));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let clock: Arc<dyn Clock> = h.clock.clone();
    let workers = spawn_workers(
        receivers,
        Arc::new(registry),
        broker.clone(),
        scheduler.clone(),
        clock,
        shutdown_rx,
    );

    scheduler.submit(export("P1", "msg-1")).await.unwrap();
    scheduler.submit(export("P2", "msg-2")).await.unwrap();
    scheduler.submit(export("P404", "msg-3")).await.unwrap();

    let done = wait_terminal(&h, "msg-1").await;
    assert_eq!(done.status, LedgerStatus::Completed);
    let failed = wait_terminal(&h, "msg-2").await;
    assert_eq!(failed.status, LedgerStatus::Failed);
    let missing = wait_terminal(&h, "msg-3").await;
    assert_eq!(missing.status, LedgerStatus::Failed);

    shutdown_tx.send(true).unwrap();
    for handle in workers {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    // Success acked, provider failure rescheduled, missing project dead-lettered
    let stats = broker.stats().await.unwrap();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.scheduled, 1);
    assert_eq!(stats.dead_lettered, 1);

    assert_eq!(h.project(TENANT, "P1").await.unwrap().status, ProjectStatus::Exported);
    assert_eq!(h.project(TENANT, "P2").await.unwrap().status, ProjectStatus::Failed);

    let metrics = h.metrics.snapshot();
    assert_eq!(metrics.exports_completed, 1);
    assert_eq!(metrics.messages_retried, 1);
    assert_eq!(metrics.messages_dead_lettered, 1);
}
