use std::collections::BTreeMap;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{info, warn};

use super::{
    error::ApiError,
    models::{
        BatchExportRequest, DeadLetterItem, DeadLetterQuery, DeadLettersResponse, ExportRequest,
        HealthResponse, JobAcceptedResponse, JobItemsResponse,
    },
    state::AppState,
    utils::{parse_content_type, validate_body_size},
    validation::{validate_batch, validate_export},
};
use crate::handlers::{ExportMessage, JobEnvelope};
use crate::ledger::{JobLedger, LedgerEntry};

/// Upper bound for `GET /dead-letters?limit=`
const MAX_DEAD_LETTERS: usize = 500;

/// Clients may set this to make retried submissions land on the same message id
pub const IDEMPOTENCY_HEADER: &str = "X-Exportbox-Idempotency-Key";

/// Content-Type check, size check, then JSON
fn read_json<T: DeserializeOwned>(
    state: &AppState,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<T, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::UnsupportedMediaType("missing Content-Type header".into()))?;
    parse_content_type(content_type)?;

    validate_body_size(body, state.max_payload_bytes)?;
    Ok(serde_json::from_slice(body)?)
}

fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

/// PENDING entry that claims the message id from intake until a worker starts it
fn intake_entry(envelope: &JobEnvelope) -> LedgerEntry {
    let entry = LedgerEntry::new(
        &envelope.message_id,
        envelope.job_type(),
        envelope.message.tenant_id(),
        envelope.enqueued_at,
    );
    match &envelope.message {
        ExportMessage::Export(message) => entry
            .with_project(&message.project_id)
            .with_metadata(json!(message.export_options)),
        ExportMessage::BatchExport(message) => entry.with_metadata(json!({
            "projectIds": message.project_ids,
            "exportOptions": message.export_options,
        })),
    }
}

/// Claim the message id in the ledger, then hand the envelope to the queue,
/// deferring when `run_at` is in the future
async fn publish(
    state: &AppState,
    headers: &HeaderMap,
    message: ExportMessage,
    run_at: Option<DateTime<Utc>>,
) -> Result<(StatusCode, Json<JobAcceptedResponse>), ApiError> {
    let job_type = message.job_type();
    let mut envelope = JobEnvelope::new(message, state.clock.now());

    if let Some(key) = idempotency_key(headers) {
        envelope = envelope.with_id(key);
    }
    if let Some(run_at) = run_at {
        envelope = envelope.with_run_at(run_at);
    }
    let message_id = envelope.message_id.clone();

    if !state.ledger.reserve(&intake_entry(&envelope)).await? {
        info!(message_id = %message_id, "Duplicate submission, not republished");
        let response = JobAcceptedResponse {
            message_id,
            job_type,
            run_at: None,
            duplicate: true,
        };
        return Ok((StatusCode::ACCEPTED, Json(response)));
    }

    if let Err(e) = state.scheduler.submit(envelope).await {
        // Frees the id for a resubmission under the same key
        if let Err(ledger_err) = state
            .ledger
            .fail(&message_id, &format!("not queued: {}", e), state.clock.now())
            .await
        {
            warn!(message_id = %message_id, error = %ledger_err, "Could not release message id");
        }
        return Err(e.into());
    }

    info!(
        message_id = %message_id,
        job_type = job_type.as_str(),
        run_at = ?run_at,
        "Export message accepted"
    );

    let response = JobAcceptedResponse {
        message_id,
        job_type,
        run_at,
        duplicate: false,
    };
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// `POST /jobs/export`
pub async fn submit_export(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let request: ExportRequest = read_json(&state, &headers, &body)?;
    validate_export(&request.message).map_err(|e| ApiError::InvalidPayload(e.to_string()))?;

    publish(
        &state,
        &headers,
        ExportMessage::Export(request.message),
        request.run_at,
    )
    .await
}

/// `POST /jobs/batch-export`
pub async fn submit_batch_export(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let request: BatchExportRequest = read_json(&state, &headers, &body)?;
    validate_batch(&request.message).map_err(|e| ApiError::InvalidPayload(e.to_string()))?;

    publish(
        &state,
        &headers,
        ExportMessage::BatchExport(request.message),
        request.run_at,
    )
    .await
}

/// `GET /jobs/{id}`: the ledger entry as stored
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let entry = state
        .ledger
        .get(&job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("job {job_id}")))?;

    Ok((StatusCode::OK, Json(entry)))
}

/// `GET /jobs/{id}/items`: per-project entries of a batch
pub async fn get_job_items(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if state.ledger.get(&job_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("job {job_id}")));
    }
    let items = state.ledger.children(&job_id).await?;

    Ok((StatusCode::OK, Json(JobItemsResponse { job_id, items })))
}

/// `GET /dead-letters`: newest messages that will not be delivered again
pub async fn list_dead_letters(
    State(state): State<AppState>,
    Query(query): Query<DeadLetterQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.clamp(1, MAX_DEAD_LETTERS);
    let items = state
        .broker
        .dead_letters(limit)
        .await?
        .into_iter()
        .map(|(seq, entry)| DeadLetterItem { seq, entry })
        .collect();

    Ok((StatusCode::OK, Json(DeadLettersResponse { items })))
}

/// `GET /health`: 503 when any component is unhealthy
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let mut components = BTreeMap::new();
    components.insert("api".to_string(), "healthy".to_string());

    let ledger = match state.ledger.stats() {
        Ok(stats) => {
            components.insert("ledger".to_string(), "healthy".to_string());
            Some(stats)
        }
        Err(e) => {
            components.insert("ledger".to_string(), format!("unhealthy: {}", e));
            None
        }
    };

    let queue = match state.broker.stats().await {
        Ok(stats) => {
            components.insert("queue".to_string(), "healthy".to_string());
            Some(stats)
        }
        Err(e) => {
            components.insert("queue".to_string(), format!("unhealthy: {}", e));
            None
        }
    };

    let workers = if state.broker.health_check() {
        "healthy".to_string()
    } else {
        "unhealthy: worker channel closed".to_string()
    };
    components.insert("workers".to_string(), workers);

    let all_healthy = components.values().all(|status| status == "healthy");
    let (status, status_code) = if all_healthy {
        ("healthy", StatusCode::OK)
    } else {
        ("unhealthy", StatusCode::SERVICE_UNAVAILABLE)
    };

    let response = HealthResponse {
        status: status.to_string(),
        components,
        version: env!("CARGO_PKG_VERSION").to_string(),
        metrics: state.metrics.snapshot(),
        queue,
        ledger,
    };

    (status_code, Json(response))
}
