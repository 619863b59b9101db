//! Application metrics for Prometheus monitoring.
//!
//! Job metrics are recorded where they happen (queue, worker, subscription
//! tracker, render route) through the `metrics` facade. This module installs
//! the Prometheus recorder and renders it for `GET /metrics`.

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Call once at startup, before any metrics are recorded.
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    let mut installed = false;
    PROMETHEUS_HANDLE.get_or_init(|| {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        if metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("Failed to set global metrics recorder (already set)");
        } else {
            describe_metrics();
            installed = true;
            tracing::info!("Prometheus metrics initialized");
        }
        handle
    });
    installed
}

/// Describe all application metrics for Prometheus.
fn describe_metrics() {
    describe_counter!("jobs_enqueued_total", "Jobs admitted to the queue");
    describe_counter!(
        "jobs_completed_total",
        "Jobs that reached the completed status"
    );
    describe_counter!(
        "jobs_failed_total",
        "Jobs that reached the failed status, by reason"
    );
    describe_counter!(
        "jobs_requeued_total",
        "Expired claims returned to the queue"
    );
    describe_histogram!(
        "generation_duration_seconds",
        Unit::Seconds,
        "Time spent in the generation collaborator per attempt"
    );
    describe_gauge!(
        "sse_subscribers",
        "Open SSE subscriptions, by channel kind"
    );
}

/// Render current metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}
