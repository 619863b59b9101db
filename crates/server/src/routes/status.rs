// crates/server/src/routes/status.rs
//! Status subscription over SSE.
//!
//! - GET /v1/status/job/{job_id} -- `status` events while the job moves,
//!   then one `done` or `error` event, then the stream closes.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use futures_util::StreamExt;

use manimate_core::JobId;
use manimate_jobs::subscribe_status;

use crate::error::ApiResult;
use crate::state::AppState;

/// GET /api/v1/status/job/{job_id}
///
/// Unknown jobs are rejected with 404 before the stream opens.
async fn stream_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>> {
    let job_id = JobId::from(job_id);
    let events = subscribe_status(state.watcher.as_ref(), &state.tracker, &job_id).await?;
    tracing::debug!(job_id = %job_id, watcher = state.watcher.name(), "status subscriber connected");

    let stream = events
        .take_until(state.shutdown.clone().cancelled_owned())
        .map(|event| {
            let json = serde_json::to_string(&event).unwrap_or_default();
            Ok(Event::default().event(event.name()).data(json))
        });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    ))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/v1/status/job/{job_id}", get(stream_status))
}
