//! API route handlers for the manimate server.

pub mod health;
pub mod jobs;
pub mod metrics;
pub mod prompt;
pub mod render;
pub mod status;
pub mod stream;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined API router with all routes under /api prefix.
///
/// Routes:
/// - GET  /api/health - Health check
/// - POST /api/v1/prompt/send - Admit a prompt (alias: /api/v1/promt/send)
/// - GET  /api/v1/status/job/{job_id} - SSE of status, done and error events
/// - GET  /api/v1/stream/job/{job_id} - SSE of raw content chunks
/// - GET  /api/v1/jobs?status= - Job snapshots, optionally in one status
/// - GET  /api/v1/jobs/{job_id} - Job snapshot with live subscriber counts
/// - POST /api/v1/jobs/{job_id}/render - Renderer status report
/// - GET  /metrics - Prometheus metrics (no /api prefix)
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", prompt::router())
        .nest("/api", status::router())
        .nest("/api", stream::router())
        .nest("/api", jobs::router())
        .nest("/api", render::router())
        .merge(metrics::router())
        .with_state(state)
}
