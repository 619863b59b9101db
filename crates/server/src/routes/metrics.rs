//! Prometheus metrics endpoint at `GET /metrics` (no `/api` prefix).

use std::sync::Arc;

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};

use crate::metrics::render_metrics;
use crate::state::AppState;

/// Returns 503 if the recorder was never installed.
pub async fn metrics_handler() -> Response {
    match render_metrics() {
        Some(output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            output,
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "Metrics not initialized").into_response(),
    }
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/metrics", get(metrics_handler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::init_metrics;
    use crate::routes::test_support::{get, post_json, test_state};
    use crate::routes::prompt;

    #[tokio::test]
    async fn test_metrics_endpoint_reports_job_counters() {
        init_metrics();
        let state = test_state();

        let (status, _) = post_json(
            prompt::router().with_state(state.clone()),
            "/v1/prompt/send",
            r#"{"prompt":"a red circle"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (status, body) = get(router().with_state(state), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("jobs_enqueued_total"), "{body}");
    }
}
