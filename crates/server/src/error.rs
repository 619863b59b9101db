// crates/server/src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use manimate_core::{QueueError, StoreError, ValidationError};

/// Structured JSON error response for API errors
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// API error types that map to HTTP status codes
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

fn store_response(err: &StoreError) -> (StatusCode, ErrorResponse) {
    match err {
        StoreError::NotFound(id) => {
            tracing::warn!(job_id = %id, "Job not found");
            (
                StatusCode::NOT_FOUND,
                ErrorResponse::with_details("Job not found", format!("Job ID: {}", id)),
            )
        }
        StoreError::IllegalTransition { .. } | StoreError::AlreadyTerminal { .. } => {
            tracing::warn!(error = %err, "Rejected status transition");
            (
                StatusCode::CONFLICT,
                ErrorResponse::with_details("Conflict", err.to_string()),
            )
        }
        StoreError::Unavailable(msg) => {
            tracing::error!(message = %msg, "Job store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse::with_details("Job store unavailable", msg.clone()),
            )
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            ApiError::Validation(err) => {
                tracing::warn!(error = %err, "Validation failed");
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::with_details("Invalid request", err.to_string()),
                )
            }
            ApiError::Queue(QueueError::Unavailable(msg)) => {
                tracing::error!(message = %msg, "Queue unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ErrorResponse::with_details("Queue unavailable", msg.clone()),
                )
            }
            ApiError::Queue(QueueError::Store(err)) | ApiError::Store(err) => store_response(err),
            ApiError::Queue(err @ QueueError::ClaimLost(_)) => {
                tracing::error!(error = %err, "Unexpected queue error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("Internal server error"),
                )
            }
            ApiError::BadRequest(msg) => {
                tracing::warn!(message = %msg, "Bad request");
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::with_details("Bad request", msg.clone()),
                )
            }
            ApiError::Internal(msg) => {
                tracing::error!(message = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("Internal server error"),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
