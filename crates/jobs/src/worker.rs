// crates/jobs/src/worker.rs
//! Generation workers.
//!
//! Each worker claims one job at a time, drives the generation provider as
//! a chunk stream, publishes every chunk, and finally writes the cleaned
//! content and `ready_for_render`. A heartbeat runs alongside generation;
//! if it reports the claim lost, the job is abandoned without writing a
//! result and the reaper decides what happens next.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use manimate_core::generation::{produce, strip_code_fences, GenerationProvider};
use manimate_core::{GenerationError, JobStatus, QueueError, StatusUpdate, StoreError};

use crate::queue::{Claim, JobQueue};
use crate::store::JobStore;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Interval between lease extensions; a third of the visibility timeout.
    pub heartbeat_interval: Duration,
    /// Pause after an unexpected queue error before claiming again.
    pub error_backoff: Duration,
}

impl WorkerConfig {
    pub fn for_visibility(visibility_timeout: Duration) -> Self {
        Self {
            heartbeat_interval: visibility_timeout / 3,
            error_backoff: Duration::from_secs(1),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::for_visibility(Duration::from_secs(30))
    }
}

/// What happened to one claimed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Content written, status `ready_for_render`.
    Generated,
    /// Generation failed; job marked `failed`.
    Failed(String),
    /// Job was already past `processing`, terminal, or gone.
    Skipped,
    /// The claim was lost mid-flight; nothing written.
    Abandoned,
    /// A store write failed; the claim is left to expire and be retried.
    Deferred(String),
}

enum RunError {
    Generation(GenerationError),
    Store(StoreError),
    ClaimLost,
}

impl From<StoreError> for RunError {
    fn from(e: StoreError) -> Self {
        RunError::Store(e)
    }
}

impl From<QueueError> for RunError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Store(e) => RunError::Store(e),
            QueueError::Unavailable(msg) => RunError::Store(StoreError::Unavailable(msg)),
            QueueError::ClaimLost(_) => RunError::ClaimLost,
        }
    }
}

pub struct Worker {
    id: String,
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn JobStore>,
    provider: Arc<dyn GenerationProvider>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn JobStore>,
        provider: Arc<dyn GenerationProvider>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            id: id.into(),
            queue,
            store,
            provider,
            config,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Claim and process jobs until `shutdown` fires or the queue closes.
    /// A job in progress when `shutdown` fires is finished first.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(worker_id = %self.id, provider = self.provider.name(), "worker started");
        loop {
            let claim = tokio::select! {
                _ = shutdown.cancelled() => break,
                claim = self.queue.next(&self.id) => claim,
            };
            match claim {
                Ok(claim) => {
                    self.process(claim).await;
                }
                Err(QueueError::Unavailable(reason)) => {
                    tracing::info!(worker_id = %self.id, %reason, "queue unavailable, worker stopping");
                    break;
                }
                Err(e) => {
                    tracing::warn!(worker_id = %self.id, error = %e, "claim failed");
                    tokio::time::sleep(self.config.error_backoff).await;
                }
            }
        }
        tracing::info!(worker_id = %self.id, "worker stopped");
    }

    /// Process one claimed job to an outcome. Acknowledges the claim unless
    /// it was lost or the outcome is deferred.
    pub async fn process(&self, claim: Claim) -> JobOutcome {
        let span = tracing::info_span!(
            "job",
            job_id = %claim.job_id,
            worker_id = %self.id,
            attempt = claim.attempt,
        );
        async {
            let outcome = self.execute(&claim).await;
            match &outcome {
                JobOutcome::Abandoned | JobOutcome::Deferred(_) => {}
                _ => {
                    if let Err(e) = self.queue.ack(&claim).await {
                        tracing::warn!(error = %e, "ack failed");
                    }
                }
            }
            tracing::info!(outcome = ?outcome, "job finished");
            outcome
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, claim: &Claim) -> JobOutcome {
        match self.store.get_status(&claim.job_id).await {
            Ok(JobStatus::Pending | JobStatus::Processing) => {}
            Ok(status) => {
                tracing::info!(%status, "job already past processing, skipping");
                return JobOutcome::Skipped;
            }
            Err(StoreError::NotFound(_)) => {
                tracing::info!("job no longer exists, skipping");
                return JobOutcome::Skipped;
            }
            Err(e) => return JobOutcome::Deferred(e.to_string()),
        }

        tracing::info!(mode = %claim.mode, "processing started");
        let started = Instant::now();

        let result = tokio::select! {
            result = self.generate(claim) => result,
            lost = self.heartbeat(claim) => Err(lost),
        };
        metrics::histogram!("generation_duration_seconds").record(started.elapsed().as_secs_f64());

        match result {
            Ok(()) => JobOutcome::Generated,
            Err(RunError::ClaimLost) => {
                tracing::warn!("claim lost, abandoning job");
                JobOutcome::Abandoned
            }
            Err(RunError::Generation(e)) => {
                let reason = e.to_string();
                tracing::warn!(error = %reason, "generation failed");
                metrics::counter!("jobs_failed_total", "reason" => "generation").increment(1);
                match self.store.fail(&claim.job_id, &reason).await {
                    Ok(_) => JobOutcome::Failed(reason),
                    Err(e) if e.is_conflict() => JobOutcome::Skipped,
                    Err(e) => JobOutcome::Deferred(e.to_string()),
                }
            }
            Err(RunError::Store(e)) if e.is_conflict() || matches!(e, StoreError::NotFound(_)) => {
                tracing::info!(error = %e, "job changed underneath the worker, stopping");
                JobOutcome::Skipped
            }
            Err(RunError::Store(e)) => {
                tracing::error!(error = %e, "store write failed");
                JobOutcome::Deferred(e.to_string())
            }
        }
    }

    async fn generate(&self, claim: &Claim) -> Result<(), RunError> {
        let job_id = &claim.job_id;
        self.advance(claim, JobStatus::Processing).await?;

        let mut chunks = produce(self.provider.as_ref(), claim.mode, &claim.prompt)
            .await
            .map_err(RunError::Generation)?;

        let mut content = String::new();
        let mut count = 0usize;
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(RunError::Generation)?;
            content.push_str(&chunk);
            count += 1;
            self.store.append_chunk(job_id, chunk).await?;
        }
        tracing::debug!(chunks = count, bytes = content.len(), "generation stream ended");

        let content = strip_code_fences(&content);
        if content.is_empty() {
            return Err(RunError::Generation(GenerationError::EmptyResponse));
        }
        self.store.set_content(job_id, content).await?;
        self.advance(claim, JobStatus::ReadyForRender).await
    }

    /// Move the job to `status` and report its progress through the queue.
    async fn advance(&self, claim: &Claim, status: JobStatus) -> Result<(), RunError> {
        self.store
            .set_status(&claim.job_id, StatusUpdate::new(status))
            .await?;
        if let Some(progress) = status.progress_hint() {
            self.queue.update_progress(claim, progress).await?;
        }
        Ok(())
    }

    /// Extend the lease until it is lost. Never returns while the claim is
    /// held.
    async fn heartbeat(&self, claim: &Claim) -> RunError {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match self.queue.heartbeat(claim).await {
                Ok(()) => {}
                Err(QueueError::ClaimLost(_)) => return RunError::ClaimLost,
                Err(e) => tracing::warn!(error = %e, "heartbeat failed"),
            }
        }
    }
}

/// Spawn `count` workers sharing one queue, store and provider.
pub fn spawn_workers(
    count: usize,
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn JobStore>,
    provider: Arc<dyn GenerationProvider>,
    config: WorkerConfig,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|i| {
            let worker = Worker::new(
                format!("worker-{i}"),
                Arc::clone(&queue),
                Arc::clone(&store),
                Arc::clone(&provider),
                config.clone(),
            );
            tokio::spawn(worker.run(shutdown.clone()))
        })
        .collect()
}
