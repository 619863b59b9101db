// crates/jobs/src/notifier.rs
//! Status notifier: turns a job's status updates into labeled events.
//!
//! | Event    | Payload              | When                          |
//! |----------|----------------------|-------------------------------|
//! | `status` | `{status, progress}` | current status, then changes  |
//! | `done`   | `{video_url}`        | after `completed`, then close |
//! | `error`  | `{message}`          | after `failed`, or on a delivery failure, then close |

use std::sync::Arc;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::Serialize;
use thiserror::Error;

use manimate_core::{JobId, JobStatus, StatusUpdate, StoreError};

use crate::subscription::{SubscriberTracker, SubscriptionKind};
use crate::watcher::{StatusStream, StatusWatcher};

/// One event on a status subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StatusEvent {
    Status {
        status: JobStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        progress: Option<u8>,
    },
    Done {
        video_url: String,
    },
    Error {
        message: String,
    },
}

impl StatusEvent {
    /// SSE event label.
    pub fn name(&self) -> &'static str {
        match self {
            StatusEvent::Status { .. } => "status",
            StatusEvent::Done { .. } => "done",
            StatusEvent::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, StatusEvent::Status { .. })
    }

    fn status(status: JobStatus) -> Self {
        StatusEvent::Status {
            status,
            progress: status.progress_hint(),
        }
    }
}

/// A store failure observed by one subscriber. Ends that subscription only.
#[derive(Debug, Error)]
#[error("Status delivery failed: {0}")]
pub struct DeliveryError(#[from] pub StoreError);

/// Map status updates to events; ends after the first terminal event.
pub fn status_events(updates: StatusStream) -> BoxStream<'static, StatusEvent> {
    Box::pin(async_stream::stream! {
        let mut updates = updates;
        while let Some(update) = updates.next().await {
            let update = match update {
                Ok(update) => update,
                Err(e) => {
                    let err = DeliveryError::from(e);
                    tracing::warn!(error = %err, "status subscription aborted");
                    yield StatusEvent::Error { message: err.to_string() };
                    return;
                }
            };

            yield StatusEvent::status(update.status);
            if let Some(last) = terminal_event(update) {
                yield last;
                return;
            }
        }
    })
}

fn terminal_event(update: StatusUpdate) -> Option<StatusEvent> {
    match update.status {
        JobStatus::Completed => Some(match update.video_url.filter(|u| !u.is_empty()) {
            Some(video_url) => StatusEvent::Done { video_url },
            None => StatusEvent::Error {
                message: "Job completed without a video URL".into(),
            },
        }),
        JobStatus::Failed => Some(StatusEvent::Error {
            message: update
                .message
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "Job failed".into()),
        }),
        _ => None,
    }
}

/// Open a status subscription for `job_id`, counted in `tracker` until the
/// returned stream is dropped.
pub async fn subscribe_status(
    watcher: &dyn StatusWatcher,
    tracker: &Arc<SubscriberTracker>,
    job_id: &JobId,
) -> Result<BoxStream<'static, StatusEvent>, StoreError> {
    let updates = watcher.watch(job_id).await?;
    let guard = tracker.connect(job_id, SubscriptionKind::Status);
    let mut events = status_events(updates);

    Ok(Box::pin(async_stream::stream! {
        let _guard = guard;
        while let Some(event) = events.next().await {
            yield event;
        }
    }))
}
