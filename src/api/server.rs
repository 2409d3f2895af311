use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::{decompression::RequestDecompressionLayer, trace::TraceLayer};

use super::{
    services::{
        get_job, get_job_items, health, list_dead_letters, submit_batch_export, submit_export,
    },
    state::AppState,
};

/// All routes with their middleware
pub fn router(state: AppState) -> Router {
    let body_limit = state.max_payload_bytes;

    Router::new()
        .route("/jobs/export", post(submit_export))
        .route("/jobs/batch-export", post(submit_batch_export))
        .route("/jobs/{job_id}", get(get_job))
        .route("/jobs/{job_id}/items", get(get_job_items))
        .route("/dead-letters", get(list_dead_letters))
        .route("/health", get(health))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        // gzip request bodies arrive decompressed; the size check applies after
        .layer(RequestDecompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}
