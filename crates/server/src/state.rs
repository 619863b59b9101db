// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use manimate_core::GenerationMode;
use manimate_jobs::{JobQueue, JobStore, SubscriberTracker, StatusWatcher};

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Canonical per-job state and channels.
    pub store: Arc<dyn JobStore>,
    /// Admission side of the job queue. Workers hold their own handle.
    pub queue: Arc<dyn JobQueue>,
    /// Status change detection for the status SSE endpoint.
    pub watcher: Arc<dyn StatusWatcher>,
    /// Live subscriber counts, per job and channel.
    pub tracker: Arc<SubscriberTracker>,
    /// Mode used when a prompt request names none.
    pub default_mode: GenerationMode,
    /// Fires on server shutdown; open SSE streams end with it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn JobQueue>,
        watcher: Arc<dyn StatusWatcher>,
        default_mode: GenerationMode,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            store,
            queue,
            watcher,
            tracker: Arc::new(SubscriberTracker::new()),
            default_mode,
            shutdown,
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
