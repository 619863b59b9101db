// crates/server/src/routes/stream.rs
//! Content subscription over SSE.
//!
//! - GET /v1/stream/job/{job_id} -- unlabeled `data` events, one per chunk,
//!   in production order. Closes when the job reaches a terminal status.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use futures_util::StreamExt;

use manimate_core::JobId;
use manimate_jobs::subscribe_content;

use crate::error::ApiResult;
use crate::state::AppState;

/// SSE data lines cannot carry carriage returns; newlines are split into
/// continuation lines and rejoined by the client.
fn normalize_newlines(chunk: &str) -> String {
    chunk.replace("\r\n", "\n").replace('\r', "\n")
}

fn chunk_event(chunk: &str) -> Event {
    Event::default().data(normalize_newlines(chunk))
}

/// GET /api/v1/stream/job/{job_id}
async fn stream_content(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>> {
    let job_id = JobId::from(job_id);
    let chunks = subscribe_content(
        state.store.as_ref(),
        state.watcher.as_ref(),
        &state.tracker,
        &job_id,
    )
    .await?;
    tracing::debug!(job_id = %job_id, "content subscriber connected");

    let stream = chunks
        .take_until(state.shutdown.clone().cancelled_owned())
        .map(|chunk| Ok(chunk_event(&chunk)));

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/v1/stream/job/{job_id}", get(stream_content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::{get, test_state};
    use axum::http::StatusCode;
    use manimate_core::{GenerationMode, StatusUpdate};
    use manimate_jobs::SubscriptionKind;

    #[tokio::test]
    async fn test_unknown_job_is_404() {
        let (status, _) = get(router().with_state(test_state()), "/v1/stream/job/missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_terminal_job_closes_stream_without_chunks() {
        let state = test_state();
        let id = state
            .queue
            .enqueue("p".into(), GenerationMode::Streaming)
            .await
            .unwrap();
        state
            .store
            .set_status(&id, StatusUpdate::failed("stop"))
            .await
            .unwrap();

        let uri = format!("/v1/stream/job/{id}");
        let (status, body) = get(router().with_state(state.clone()), &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!body.contains("data:"), "{body}");
        assert_eq!(state.tracker.total(), 0);
    }

    #[test]
    fn test_carriage_returns_are_normalized() {
        assert_eq!(
            normalize_newlines("line one\r\nline two\rthree"),
            "line one\nline two\nthree"
        );
    }

    #[tokio::test]
    async fn test_chunk_with_carriage_returns_is_sent_as_data_lines() {
        let state = test_state();
        let id = state
            .queue
            .enqueue("p".into(), GenerationMode::Streaming)
            .await
            .unwrap();

        let producer = {
            let state = state.clone();
            let id = id.clone();
            tokio::spawn(async move {
                while state.tracker.count(&id, SubscriptionKind::Content) == 0 {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                state.store.append_chunk(&id, "from manim import *\r\nclass A:".into()).await.unwrap();
                state.store.set_status(&id, StatusUpdate::failed("stop")).await.unwrap();
            })
        };

        let uri = format!("/v1/stream/job/{id}");
        let (status, body) = get(router().with_state(state), &uri).await;
        producer.await.unwrap();

        assert_eq!(status, StatusCode::OK);
        assert!(!body.contains('\r'), "{body:?}");
        assert!(body.contains("data: from manim import *\ndata: class A:\n"), "{body:?}");
    }
}
