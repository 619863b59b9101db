// crates/core/src/error.rs
use thiserror::Error;

use crate::types::{JobId, JobStatus};

/// Input rejected before anything is enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Prompt must not be empty")]
    EmptyPrompt,

    #[error("Unknown generation mode: {0}")]
    UnknownMode(String),

    #[error("Unknown job status: {0}")]
    UnknownStatus(String),

    #[error("A completed job requires a non-empty video URL")]
    MissingVideoUrl,

    #[error("Status {0} cannot be reported by the renderer")]
    NotReportable(JobStatus),
}

/// Errors raised by the job store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Job store unavailable: {0}")]
    Unavailable(String),

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Illegal status transition for job {job_id}: {from} -> {to}")]
    IllegalTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job {job_id} is already {status}")]
    AlreadyTerminal { job_id: JobId, status: JobStatus },
}

impl StoreError {
    /// True for the rejections of the status state machine.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::IllegalTransition { .. } | StoreError::AlreadyTerminal { .. }
        )
    }
}

/// Errors raised by the job queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    /// The claim token no longer owns the job (lease expired and reaped,
    /// or already acknowledged).
    #[error("Claim lost for job {0}")]
    ClaimLost(JobId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised by a generation provider. Always terminal for the job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("Failed to spawn generation process: {0}")]
    SpawnFailed(String),

    #[error("Generation command failed: {0}")]
    CommandFailed(String),

    #[error("Generation request failed: {0}")]
    Request(String),

    #[error("Generation API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse generation response: {0}")]
    ParseFailed(String),

    #[error("Generation returned no content")]
    EmptyResponse,

    #[error("Provider not available: {0}")]
    NotAvailable(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::IllegalTransition {
            job_id: JobId::from("j1"),
            from: JobStatus::Rendering,
            to: JobStatus::Processing,
        };
        assert_eq!(
            err.to_string(),
            "Illegal status transition for job j1: rendering -> processing"
        );
        assert!(err.is_conflict());
        assert!(!StoreError::NotFound(JobId::from("j1")).is_conflict());
    }

    #[test]
    fn test_generation_error_display() {
        assert_eq!(GenerationError::Timeout(30).to_string(), "Timeout after 30 seconds");
        let err = GenerationError::Api {
            status: 429,
            body: "quota".into(),
        };
        assert_eq!(err.to_string(), "Generation API returned 429: quota");
    }

    #[test]
    fn test_queue_error_wraps_store_error() {
        let err: QueueError = StoreError::Unavailable("down".into()).into();
        assert_eq!(err.to_string(), "Job store unavailable: down");
    }
}
