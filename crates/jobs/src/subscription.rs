// crates/jobs/src/subscription.rs
//! Live subscriber accounting for SSE channels.
//!
//! Every status or content subscription holds a [`SubscriptionGuard`]; the
//! count is decremented when the guard drops, which happens as soon as the
//! response stream is dropped (client disconnect, task cancellation or
//! normal completion).

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use manimate_core::JobId;

/// Which channel a subscriber is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionKind {
    Status,
    Content,
}

impl SubscriptionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionKind::Status => "status",
            SubscriptionKind::Content => "content",
        }
    }
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts active subscribers per job and channel kind.
///
/// Entries are removed when their count drops to zero.
#[derive(Default)]
pub struct SubscriberTracker {
    active: DashMap<(JobId, SubscriptionKind), usize>,
}

impl SubscriberTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber and return the guard that releases it.
    pub fn connect(self: &Arc<Self>, job_id: &JobId, kind: SubscriptionKind) -> SubscriptionGuard {
        *self.active.entry((job_id.clone(), kind)).or_insert(0) += 1;
        metrics::gauge!("sse_subscribers", "kind" => kind.as_str()).increment(1.0);
        tracing::debug!(job_id = %job_id, kind = %kind, "subscriber connected");
        SubscriptionGuard {
            job_id: job_id.clone(),
            kind,
            tracker: Arc::clone(self),
        }
    }

    fn disconnect(&self, job_id: &JobId, kind: SubscriptionKind) {
        let key = (job_id.clone(), kind);
        let mut removed = false;
        if let Some(mut count) = self.active.get_mut(&key) {
            *count = count.saturating_sub(1);
            removed = true;
        }
        if removed {
            self.active.remove_if(&key, |_, count| *count == 0);
            metrics::gauge!("sse_subscribers", "kind" => kind.as_str()).decrement(1.0);
        }
    }

    /// Current number of subscribers for one job and kind.
    pub fn count(&self, job_id: &JobId, kind: SubscriptionKind) -> usize {
        self.active
            .get(&(job_id.clone(), kind))
            .map(|c| *c)
            .unwrap_or(0)
    }

    /// Total subscribers across all jobs and kinds.
    pub fn total(&self) -> usize {
        self.active.iter().map(|e| *e.value()).sum()
    }
}

/// RAII guard that calls `disconnect()` when dropped.
pub struct SubscriptionGuard {
    job_id: JobId,
    kind: SubscriptionKind,
    tracker: Arc<SubscriberTracker>,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.tracker.disconnect(&self.job_id, self.kind);
        tracing::debug!(
            job_id = %self.job_id,
            kind = %self.kind,
            "subscription dropped, subscriber count decremented"
        );
    }
}
