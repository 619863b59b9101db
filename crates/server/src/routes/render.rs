// crates/server/src/routes/render.rs
//! Render collaborator reports.
//!
//! - POST /v1/jobs/{job_id}/render -- `{status, videoUrl?, message?}`
//!
//! The renderer discovers work through `GET /v1/jobs?status=ready_for_render`
//! and reports `rendering`, `uploading`, then `completed` (with a video URL)
//! or `failed` (with a reason). Every report goes through the status state
//! machine, so a late or duplicate report after a terminal status is a 409.
//! Reports other than `failed` are also a 409 while the job is still
//! `pending` or `processing`.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;

use manimate_core::{JobId, JobSnapshot, JobStatus, StatusUpdate, StoreError, ValidationError};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderReport {
    pub status: String,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl RenderReport {
    fn into_update(self) -> Result<StatusUpdate, ValidationError> {
        let status: JobStatus = self.status.parse()?;
        match status {
            JobStatus::Rendering | JobStatus::Uploading => Ok(StatusUpdate {
                message: self.message,
                ..StatusUpdate::new(status)
            }),
            JobStatus::Completed => self
                .video_url
                .filter(|url| !url.trim().is_empty())
                .map(StatusUpdate::completed)
                .ok_or(ValidationError::MissingVideoUrl),
            JobStatus::Failed => Ok(StatusUpdate::failed(
                self.message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| "Rendering failed".into()),
            )),
            other => Err(ValidationError::NotReportable(other)),
        }
    }
}

/// POST /api/v1/jobs/{job_id}/render
///
/// Returns the job snapshot after the report is applied. Repeating the
/// current non-terminal status is accepted and changes nothing.
async fn report_render(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
    payload: Result<Json<RenderReport>, JsonRejection>,
) -> ApiResult<Json<JobSnapshot>> {
    let Json(report) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let job_id = JobId::from(job_id);
    let update = report.into_update()?;
    let status = update.status;

    // The renderer takes over only after generation; it may still fail a job early.
    let current = state.store.get_status(&job_id).await?;
    if status != JobStatus::Failed && matches!(current, JobStatus::Pending | JobStatus::Processing) {
        return Err(StoreError::IllegalTransition {
            job_id,
            from: current,
            to: status,
        }
        .into());
    }

    let changed = state.store.set_status(&job_id, update).await?;
    if changed {
        match status {
            JobStatus::Completed => metrics::counter!("jobs_completed_total").increment(1),
            JobStatus::Failed => {
                metrics::counter!("jobs_failed_total", "reason" => "render").increment(1)
            }
            _ => {}
        }
        tracing::info!(job_id = %job_id, status = %status, "render report applied");
    }

    Ok(Json(state.store.snapshot(&job_id).await?))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/v1/jobs/{job_id}/render", post(report_render))
}
