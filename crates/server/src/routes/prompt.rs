// crates/server/src/routes/prompt.rs
//! Prompt admission.
//!
//! - POST /v1/prompt/send -- validate and enqueue, respond 202 with the job id
//! - POST /v1/promt/send  -- same handler, kept for existing clients

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use manimate_core::{GenerationMode, JobId, Prompt};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SendPromptRequest {
    #[serde(default)]
    pub prompt: String,
    /// `bulk` or `streaming`; the server default when absent.
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(test, derive(Deserialize))]
pub struct SendPromptResponse {
    pub job_id: JobId,
}

/// POST /api/v1/prompt/send -- admit a prompt.
///
/// Returns as soon as the job is queued; generation happens on a worker.
pub async fn send_prompt(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SendPromptRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SendPromptResponse>)> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let prompt = Prompt::parse(request.prompt)?;
    let mode = match request.mode.as_deref() {
        Some(raw) => raw.parse::<GenerationMode>()?,
        None => state.default_mode,
    };

    let job_id = state.queue.enqueue(prompt.into_inner(), mode).await?;
    Ok((StatusCode::ACCEPTED, Json(SendPromptResponse { job_id })))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1/prompt/send", post(send_prompt))
        .route("/v1/promt/send", post(send_prompt))
}
