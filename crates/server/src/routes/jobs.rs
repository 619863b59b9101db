// crates/server/src/routes/jobs.rs
//! Job snapshots for late subscribers and the external renderer.
//!
//! - GET /v1/jobs?status=ready_for_render -- snapshots in one status, oldest first
//! - GET /v1/jobs/{job_id} -- one snapshot with live subscriber counts

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use manimate_core::{JobId, JobSnapshot, JobStatus};
use manimate_jobs::SubscriptionKind;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct SubscriberCounts {
    pub status: usize,
    pub content: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(test, derive(Deserialize))]
pub struct JobView {
    #[serde(flatten)]
    pub snapshot: JobSnapshot,
    pub subscribers: SubscriberCounts,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

/// GET /api/v1/jobs/{job_id}
async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobView>> {
    let job_id = JobId::from(job_id);
    let snapshot = state.store.snapshot(&job_id).await?;
    let subscribers = SubscriberCounts {
        status: state.tracker.count(&job_id, SubscriptionKind::Status),
        content: state.tracker.count(&job_id, SubscriptionKind::Content),
    };
    Ok(Json(JobView {
        snapshot,
        subscribers,
    }))
}

/// GET /api/v1/jobs -- all retained jobs, or only those in `?status=`.
async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<JobSnapshot>>> {
    let statuses = match query.status.as_deref() {
        Some(raw) => vec![raw.parse::<JobStatus>()?],
        None => JobStatus::ALL.to_vec(),
    };

    let mut jobs = Vec::new();
    for status in statuses {
        jobs.extend(state.store.list_by_status(status).await?);
    }
    jobs.sort_by_key(|job| job.created_at);
    Ok(Json(jobs))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1/jobs", get(list_jobs))
        .route("/v1/jobs/{job_id}", get(get_job))
}
