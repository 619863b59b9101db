// crates/jobs/src/store.rs
//! Typed job repository.
//!
//! Every job owns two independent channels:
//! - a **status log** (`watch` channel over the ordered list of
//!   [`StatusUpdate`]s). The log is the source of truth for the current
//!   status and is appended under the per-key lock, so transitions are
//!   totally ordered per job.
//! - a **content channel** (`broadcast`) for fire-and-forget chunk fan-out.
//!   No history is kept; latecomers read the accumulated content from the
//!   snapshot.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use manimate_core::{
    GenerationMode, JobId, JobResult, JobSnapshot, JobStatus, StatusUpdate, StoreError,
};

/// Per-job broadcast capacity. Slower subscribers skip overflowed chunks.
pub const CONTENT_CHANNEL_CAPACITY: usize = 256;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a `pending` job and return its fresh id.
    async fn create(&self, prompt: String, mode: GenerationMode) -> Result<JobId, StoreError>;

    async fn get_status(&self, job_id: &JobId) -> Result<JobStatus, StoreError>;

    /// Append a status transition. Returns `Ok(false)` when the job is
    /// already in `update.status` (no-op).
    async fn set_status(&self, job_id: &JobId, update: StatusUpdate) -> Result<bool, StoreError>;

    /// Raise the progress value. Lower values and writes to terminal jobs
    /// are ignored.
    async fn set_progress(&self, job_id: &JobId, progress: u8) -> Result<(), StoreError>;

    /// Write the final generated content.
    async fn set_content(&self, job_id: &JobId, content: String) -> Result<(), StoreError>;

    /// Publish one chunk to current content subscribers. Returns how many
    /// subscribers received it.
    async fn append_chunk(&self, job_id: &JobId, chunk: String) -> Result<usize, StoreError>;

    async fn get_result(&self, job_id: &JobId) -> Result<JobResult, StoreError>;

    async fn snapshot(&self, job_id: &JobId) -> Result<JobSnapshot, StoreError>;

    /// Snapshots of all jobs currently in `status`, oldest first.
    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<JobSnapshot>, StoreError>;

    /// Receiver over the job's status log. The sender is dropped when the
    /// job is evicted.
    async fn watch_status(
        &self,
        job_id: &JobId,
    ) -> Result<watch::Receiver<Vec<StatusUpdate>>, StoreError>;

    async fn subscribe_content(
        &self,
        job_id: &JobId,
    ) -> Result<broadcast::Receiver<String>, StoreError>;

    /// Evict terminal jobs whose terminal status is older than `retention`.
    /// Returns the number of evicted jobs.
    async fn purge_expired(&self, retention: Duration) -> Result<usize, StoreError>;

    /// Mark a job `failed` with `reason`.
    async fn fail(&self, job_id: &JobId, reason: &str) -> Result<bool, StoreError> {
        self.set_status(job_id, StatusUpdate::failed(reason)).await
    }
}

// ============================================================================
// In-memory store
// ============================================================================

struct JobRecord {
    prompt: String,
    mode: GenerationMode,
    progress: u8,
    content: Option<String>,
    video_url: Option<String>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    terminal_at: Option<Instant>,
    status_tx: watch::Sender<Vec<StatusUpdate>>,
    content_tx: broadcast::Sender<String>,
}

impl JobRecord {
    fn status(&self) -> JobStatus {
        self.status_tx
            .borrow()
            .last()
            .map(|u| u.status)
            .unwrap_or(JobStatus::Pending)
    }

    fn result(&self) -> JobResult {
        JobResult {
            content: self.content.clone(),
            video_url: self.video_url.clone(),
            error: self.error.clone(),
        }
    }

    fn snapshot(&self, job_id: &JobId) -> JobSnapshot {
        let history = self.status_tx.borrow().clone();
        JobSnapshot {
            job_id: job_id.clone(),
            prompt: self.prompt.clone(),
            mode: self.mode,
            status: history.last().map(|u| u.status).unwrap_or(JobStatus::Pending),
            progress: self.progress,
            result: self.result(),
            history,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// DashMap-backed store. Each write takes the shard lock for its key only.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: DashMap<JobId, JobRecord>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, prompt: String, mode: GenerationMode) -> Result<JobId, StoreError> {
        let job_id = JobId::new();
        let now = Utc::now();
        let (status_tx, _) = watch::channel(vec![StatusUpdate::new(JobStatus::Pending)]);
        let (content_tx, _) = broadcast::channel(CONTENT_CHANNEL_CAPACITY);
        self.jobs.insert(
            job_id.clone(),
            JobRecord {
                prompt,
                mode,
                progress: JobStatus::Pending.progress_hint().unwrap_or(0),
                content: None,
                video_url: None,
                error: None,
                created_at: now,
                updated_at: now,
                terminal_at: None,
                status_tx,
                content_tx,
            },
        );
        Ok(job_id)
    }

    async fn get_status(&self, job_id: &JobId) -> Result<JobStatus, StoreError> {
        self.jobs
            .get(job_id)
            .map(|r| r.status())
            .ok_or_else(|| StoreError::NotFound(job_id.clone()))
    }

    async fn set_status(&self, job_id: &JobId, update: StatusUpdate) -> Result<bool, StoreError> {
        let mut record = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.clone()))?;

        let current = record.status();
        if current.is_terminal() {
            return Err(StoreError::AlreadyTerminal {
                job_id: job_id.clone(),
                status: current,
            });
        }
        if current == update.status {
            return Ok(false);
        }
        if !current.can_transition_to(update.status) {
            return Err(StoreError::IllegalTransition {
                job_id: job_id.clone(),
                from: current,
                to: update.status,
            });
        }

        if let Some(hint) = update.status.progress_hint() {
            record.progress = record.progress.max(hint);
        }
        match update.status {
            JobStatus::Completed => record.video_url = update.video_url.clone(),
            JobStatus::Failed => record.error = update.message.clone(),
            _ => {}
        }
        if update.status.is_terminal() {
            record.terminal_at = Some(Instant::now());
        }
        record.updated_at = update.at;

        tracing::debug!(job_id = %job_id, from = %current, to = %update.status, "status transition");
        record.status_tx.send_modify(|log| log.push(update));
        Ok(true)
    }

    async fn set_progress(&self, job_id: &JobId, progress: u8) -> Result<(), StoreError> {
        let mut record = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.clone()))?;
        if !record.status().is_terminal() && progress > record.progress {
            record.progress = progress.min(100);
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_content(&self, job_id: &JobId, content: String) -> Result<(), StoreError> {
        let mut record = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.clone()))?;
        let status = record.status();
        if status.is_terminal() {
            return Err(StoreError::AlreadyTerminal {
                job_id: job_id.clone(),
                status,
            });
        }
        record.content = Some(content);
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn append_chunk(&self, job_id: &JobId, chunk: String) -> Result<usize, StoreError> {
        let record = self
            .jobs
            .get(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.clone()))?;
        // No subscribers is fine.
        Ok(record.content_tx.send(chunk).unwrap_or(0))
    }

    async fn get_result(&self, job_id: &JobId) -> Result<JobResult, StoreError> {
        self.jobs
            .get(job_id)
            .map(|r| r.result())
            .ok_or_else(|| StoreError::NotFound(job_id.clone()))
    }

    async fn snapshot(&self, job_id: &JobId) -> Result<JobSnapshot, StoreError> {
        self.jobs
            .get(job_id)
            .map(|r| r.snapshot(job_id))
            .ok_or_else(|| StoreError::NotFound(job_id.clone()))
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<JobSnapshot>, StoreError> {
        let mut jobs: Vec<JobSnapshot> = self
            .jobs
            .iter()
            .filter(|entry| entry.value().status() == status)
            .map(|entry| entry.value().snapshot(entry.key()))
            .collect();
        jobs.sort_by_key(|s| s.created_at);
        Ok(jobs)
    }

    async fn watch_status(
        &self,
        job_id: &JobId,
    ) -> Result<watch::Receiver<Vec<StatusUpdate>>, StoreError> {
        self.jobs
            .get(job_id)
            .map(|r| r.status_tx.subscribe())
            .ok_or_else(|| StoreError::NotFound(job_id.clone()))
    }

    async fn subscribe_content(
        &self,
        job_id: &JobId,
    ) -> Result<broadcast::Receiver<String>, StoreError> {
        self.jobs
            .get(job_id)
            .map(|r| r.content_tx.subscribe())
            .ok_or_else(|| StoreError::NotFound(job_id.clone()))
    }

    async fn purge_expired(&self, retention: Duration) -> Result<usize, StoreError> {
        let before = self.jobs.len();
        self.jobs.retain(|_, record| {
            record
                .terminal_at
                .map_or(true, |at| at.elapsed() < retention)
        });
        Ok(before.saturating_sub(self.jobs.len()))
    }
}

/// Periodically evict terminal jobs older than `retention` until `shutdown`
/// fires.
pub async fn run_retention_sweeper(
    store: Arc<dyn JobStore>,
    retention: Duration,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match store.purge_expired(retention).await {
            Ok(0) => {}
            Ok(evicted) => tracing::debug!(evicted, "evicted expired jobs"),
            Err(e) => tracing::warn!(error = %e, "retention sweep failed"),
        }
    }
}
