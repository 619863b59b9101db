// crates/core/src/types.rs
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Opaque, unique job identifier.
///
/// Freshly issued ids are 32 lowercase hex characters (a v4 UUID without
/// dashes). Ids arriving from clients are accepted verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Issue a new random id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Lifecycle state of a job.
///
/// ```text
/// pending -> processing -> ready_for_render -> rendering -> uploading -> completed
///     \____________\______________\_______________\____________\------> failed
/// ```
///
/// Forward skips are legal, backward moves are not, and nothing leaves a
/// terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    ReadyForRender,
    Rendering,
    Uploading,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::ReadyForRender,
        JobStatus::Rendering,
        JobStatus::Uploading,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::ReadyForRender => "ready_for_render",
            JobStatus::Rendering => "rendering",
            JobStatus::Uploading => "uploading",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// `completed` and `failed` are terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Position along the success path. `failed` sits outside it.
    fn rank(self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Processing => 1,
            JobStatus::ReadyForRender => 2,
            JobStatus::Rendering => 3,
            JobStatus::Uploading => 4,
            JobStatus::Completed => 5,
            JobStatus::Failed => u8::MAX,
        }
    }

    /// Whether `self -> next` is a legal transition. Re-writing the same
    /// status is not a transition and returns `false`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self.is_terminal() || self == next {
            return false;
        }
        next == JobStatus::Failed || next.rank() > self.rank()
    }

    /// Progress hint shown to status subscribers.
    pub fn progress_hint(self) -> Option<u8> {
        match self {
            JobStatus::Pending => Some(10),
            JobStatus::Processing => Some(15),
            JobStatus::ReadyForRender => Some(25),
            JobStatus::Rendering => Some(50),
            JobStatus::Uploading => Some(75),
            JobStatus::Completed => Some(100),
            JobStatus::Failed => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownStatus(s.to_string()))
    }
}

/// How the generation collaborator is driven for a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    /// One call returns the whole content.
    Bulk,
    /// Content arrives as a sequence of chunks.
    #[default]
    Streaming,
}

impl GenerationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            GenerationMode::Bulk => "bulk",
            GenerationMode::Streaming => "streaming",
        }
    }
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bulk" => Ok(GenerationMode::Bulk),
            "streaming" => Ok(GenerationMode::Streaming),
            other => Err(ValidationError::UnknownMode(other.to_string())),
        }
    }
}

/// A validated prompt ready for admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt(String);

impl Prompt {
    /// Reject empty or whitespace-only prompts.
    pub fn parse(raw: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(ValidationError::EmptyPrompt);
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

/// One entry of a job's status log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub status: JobStatus,
    pub at: DateTime<Utc>,
    /// Failure reason, only on `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Result location, only on `completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
}

impl StatusUpdate {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            at: Utc::now(),
            message: None,
            video_url: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::new(JobStatus::Failed)
        }
    }

    pub fn completed(video_url: impl Into<String>) -> Self {
        Self {
            video_url: Some(video_url.into()),
            ..Self::new(JobStatus::Completed)
        }
    }
}

/// Result fields of a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    /// Generated code. `None` until generation finishes.
    pub content: Option<String>,
    pub video_url: Option<String>,
    pub error: Option<String>,
}

/// Point-in-time view of a job, as served to late subscribers and the
/// external renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub prompt: String,
    pub mode: GenerationMode,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(flatten)]
    pub result: JobResult,
    pub history: Vec<StatusUpdate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
