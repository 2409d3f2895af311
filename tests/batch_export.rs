mod support;

use std::sync::Arc;

use serde_json::json;

use exportbox::config::BatchItemMode;
use exportbox::handlers::{
    BatchExportHandler, BatchExportMessage, BatchItemOutcome, ExportMessage, ExportOptions,
    HandlerOutput, ItemStatus, JobEnvelope, JobHandler, batch_item_id,
};
use exportbox::ledger::{JobLedger, JobType, LedgerStatus};
use exportbox::projects::ProjectStatus;
use support::{BulkFailingProjects, Harness, ParentCompleteFailing, TENANT, print_project, start_time};

fn batch_envelope(project_ids: &[&str]) -> JobEnvelope {
    JobEnvelope::new(
        ExportMessage::BatchExport(BatchExportMessage {
            project_ids: project_ids.iter().map(|id| id.to_string()).collect(),
            tenant_id: TENANT.to_string(),
            export_options: ExportOptions::new("PDF"),
        }),
        start_time(),
    )
    .with_id("batch-1")
}

fn outcomes(output: HandlerOutput) -> Vec<BatchItemOutcome> {
    match output {
        HandlerOutput::Batch(outcomes) => outcomes,
        other => panic!("expected a batch report, got {:?}", other),
    }
}

fn statuses(outcomes: &[BatchItemOutcome]) -> Vec<(&str, ItemStatus)> {
    outcomes
        .iter()
        .map(|o| (o.project_id.as_str(), o.status))
        .collect()
}

#[tokio::test]
async fn test_one_bad_item_never_aborts_the_batch() {
    let h = Harness::new();
    for id in ["P1", "P2", "P3", "P5"] {
        h.seed(print_project(id, TENANT));
    }
    h.provider.complete_after("P1", 1);
    h.provider.complete_after("P2", 2);
    h.provider.fail_with("P3", "provider exploded");
    h.provider.complete_after("P5", 1);
    let handler = BatchExportHandler::new(h.context());

    let report = outcomes(
        handler
            .handle(&batch_envelope(&["P1", "P2", "P3", "P4", "P5"]))
            .await
            .unwrap(),
    );

    assert_eq!(
        statuses(&report),
        vec![
            ("P1", ItemStatus::Completed),
            ("P2", ItemStatus::Completed),
            ("P3", ItemStatus::Failed),
            ("P4", ItemStatus::NotFound),
            ("P5", ItemStatus::Completed),
        ]
    );
    assert!(report[0].key.as_deref().unwrap().starts_with("exports/print/P1/"));
    assert!(report[2].error.as_deref().unwrap().contains("provider exploded"));
    assert!(report[3].key.is_none());

    let batch = h.ledger.get("batch-1").await.unwrap().unwrap();
    assert_eq!(batch.job_type, JobType::BatchExport);
    assert_eq!(batch.status, LedgerStatus::Completed);
    assert_eq!(batch.result.unwrap()["outcomes"][3]["status"], json!("NOT_FOUND"));

    let children = h.ledger.children("batch-1").await.unwrap();
    assert_eq!(children.len(), 5);
    let p3 = h.ledger.get(&batch_item_id("batch-1", "P3")).await.unwrap().unwrap();
    assert_eq!(p3.status, LedgerStatus::Failed);
    assert_eq!(p3.parent_id.as_deref(), Some("batch-1"));
    let p1 = h.ledger.get(&batch_item_id("batch-1", "P1")).await.unwrap().unwrap();
    assert_eq!(p1.status, LedgerStatus::Completed);

    assert_eq!(h.project(TENANT, "P1").await.unwrap().status, ProjectStatus::Exported);
    assert_eq!(h.project(TENANT, "P3").await.unwrap().status, ProjectStatus::Failed);
    assert_eq!(h.project(TENANT, "P5").await.unwrap().status, ProjectStatus::Exported);

    let metrics = h.metrics.snapshot();
    assert_eq!(metrics.batches_completed, 1);
    assert_eq!(metrics.batch_items_completed, 3);
    assert_eq!(metrics.batch_items_failed, 1);
    assert_eq!(metrics.batch_items_not_found, 1);
}

#[tokio::test]
async fn test_foreign_project_reported_not_found() {
    let h = Harness::new();
    h.seed(print_project("P1", TENANT));
    h.seed(print_project("P2", "other-tenant"));
    h.provider.complete_after("P1", 1);
    h.provider.complete_after("P2", 1);
    let handler = BatchExportHandler::new(h.context());

    let report = outcomes(handler.handle(&batch_envelope(&["P1", "P2"])).await.unwrap());

    assert_eq!(
        statuses(&report),
        vec![("P1", ItemStatus::Completed), ("P2", ItemStatus::NotFound)]
    );
    // Never submitted and never touched
    assert_eq!(h.provider.submitted().len(), 1);
    let foreign = h.project("other-tenant", "P2").await.unwrap();
    assert_eq!(foreign.status, ProjectStatus::Draft);
}

#[tokio::test]
async fn test_bulk_status_failure_fails_the_batch() {
    let h = Harness::new();
    h.seed(print_project("P1", TENANT));
    let projects = Arc::new(BulkFailingProjects(h.projects.clone()));
    let handler = BatchExportHandler::new(h.context_with_projects(projects));

    let err = handler
        .handle(&batch_envelope(&["P1"]))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INTERNAL");
    assert!(err.is_retryable());
    assert!(h.provider.submitted().is_empty());

    let batch = h.ledger.get("batch-1").await.unwrap().unwrap();
    assert_eq!(batch.status, LedgerStatus::Failed);
    assert!(batch.error.unwrap().contains("read-only"));
}

#[tokio::test]
async fn test_single_check_mode_fails_unfinished_items() {
    let h = Harness::new();
    h.seed(print_project("P1", TENANT));
    h.seed(print_project("P2", TENANT));
    h.provider.complete_after("P1", 1);
    let handler = BatchExportHandler::new(h.context()).with_item_mode(BatchItemMode::SingleCheck);

    let report = outcomes(handler.handle(&batch_envelope(&["P1", "P2"])).await.unwrap());

    assert_eq!(
        statuses(&report),
        vec![("P1", ItemStatus::Completed), ("P2", ItemStatus::Failed)]
    );
    assert_eq!(h.clock.sleep_count(), 0);
    assert_eq!(h.provider.status_calls(), 2);
    assert_eq!(h.project(TENANT, "P2").await.unwrap().status, ProjectStatus::Failed);
}

#[tokio::test]
async fn test_concurrent_items_keep_input_order() {
    let h = Harness::new();
    let ids = ["P1", "P2", "P3", "P4"];
    for (i, id) in ids.iter().enumerate() {
        h.seed(print_project(id, TENANT));
        // Later items finish sooner
        h.provider.complete_after(id, ids.len() - i);
    }
    let handler = BatchExportHandler::new(h.context()).with_concurrency(3);

    let report = outcomes(handler.handle(&batch_envelope(&ids)).await.unwrap());

    let order: Vec<&str> = report.iter().map(|o| o.project_id.as_str()).collect();
    assert_eq!(order, ids);
    assert!(report.iter().all(|o| o.status == ItemStatus::Completed));
}

#[tokio::test]
async fn test_redelivered_completed_batch_returns_stored_report() {
    let h = Harness::new();
    h.seed(print_project("P1", TENANT));
    h.provider.complete_after("P1", 1);
    let handler = BatchExportHandler::new(h.context());
    let envelope = batch_envelope(&["P1", "P9"]);

    let first = outcomes(handler.handle(&envelope).await.unwrap());
    let second = outcomes(handler.handle(&envelope).await.unwrap());

    assert_eq!(first, second);
    assert_eq!(h.provider.submitted().len(), 1);
    assert_eq!(h.ledger.get("batch-1").await.unwrap().unwrap().attempts, 1);
}

#[tokio::test]
async fn test_redelivered_partial_batch_keeps_exported_items() {
    let h = Harness::new();
    h.seed(print_project("P1", TENANT));
    h.seed(print_project("P2", TENANT));
    h.provider.complete_after("P1", 1);
    h.provider.fail_with("P2", "render engine crash");
    let handler = BatchExportHandler::new(h.context());
    let envelope = batch_envelope(&["P1", "P2"]);

    let first = outcomes(handler.handle(&envelope).await.unwrap());
    assert_eq!(
        statuses(&first),
        vec![("P1", ItemStatus::Completed), ("P2", ItemStatus::Failed)]
    );
    let p1_before = h.project(TENANT, "P1").await.unwrap();

    // Crash after the item loop: the parent never reached COMPLETED
    let mut parent = h.ledger.get("batch-1").await.unwrap().unwrap();
    parent.status = LedgerStatus::Processing;
    parent.result = None;
    h.ledger.upsert(&parent).await.unwrap();

    h.provider.complete_after("P2", 1);
    let second = outcomes(handler.handle(&envelope).await.unwrap());

    assert_eq!(
        statuses(&second),
        vec![("P1", ItemStatus::Completed), ("P2", ItemStatus::Completed)]
    );
    assert_eq!(second[0], first[0]);

    let submitted: Vec<String> = h
        .provider
        .submitted()
        .iter()
        .map(|spec| spec.project_id.clone())
        .collect();
    assert_eq!(submitted, vec!["P1", "P2", "P2"]);

    let p1_after = h.project(TENANT, "P1").await.unwrap();
    assert_eq!(p1_after.status, ProjectStatus::Exported);
    assert_eq!(p1_after.export_url, p1_before.export_url);
    assert_eq!(p1_after.exported_at, p1_before.exported_at);

    let p1_entry = h.ledger.get(&batch_item_id("batch-1", "P1")).await.unwrap().unwrap();
    assert_eq!(p1_entry.status, LedgerStatus::Completed);
    assert_eq!(p1_entry.attempts, 1);
    assert_eq!(
        h.ledger.get("batch-1").await.unwrap().unwrap().status,
        LedgerStatus::Completed
    );
}

#[tokio::test]
async fn test_unrecordable_report_fails_the_batch() {
    let h = Harness::new();
    h.seed(print_project("P1", TENANT));
    h.provider.complete_after("P1", 1);
    let ledger = Arc::new(ParentCompleteFailing(h.ledger.clone()));
    let handler = BatchExportHandler::new(h.context_with_ledger(ledger));

    let err = handler.handle(&batch_envelope(&["P1"])).await.unwrap_err();
    assert_eq!(err.code(), "INTERNAL");

    let batch = h.ledger.get("batch-1").await.unwrap().unwrap();
    assert_eq!(batch.status, LedgerStatus::Failed);
    assert!(batch.error.unwrap().contains("disk full"));
    let p1 = h.ledger.get(&batch_item_id("batch-1", "P1")).await.unwrap().unwrap();
    assert_eq!(p1.status, LedgerStatus::Completed);
}
