// crates/jobs/src/queue.rs
//! Work queue with leased, at-least-once delivery.
//!
//! A claim is made under the queue mutex, so claim-and-mark-in-progress is
//! one indivisible step and a job is held by at most one worker at a time.
//! Each claim carries a lease that workers extend with `heartbeat`. The
//! reaper returns expired claims to the queue after an exponential backoff
//! (`base * 2^(attempt-1)`, capped), and fails the job once `max_attempts`
//! claims have been made.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use manimate_core::{GenerationMode, JobId, QueueError, StoreError};

use crate::store::JobStore;

/// Queue tuning.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub visibility_timeout: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub reaper_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(30),
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
            reaper_interval: Duration::from_secs(1),
        }
    }
}

impl QueueConfig {
    /// Delay before a job whose `attempt`-th claim expired becomes
    /// claimable again.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(1u32 << exp)
            .min(self.backoff_max)
    }
}

/// Exclusive, time-bounded ownership of one job by one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub job_id: JobId,
    pub prompt: String,
    pub mode: GenerationMode,
    /// 1-based claim count for this job.
    pub attempt: u32,
    pub worker_id: String,
    token: String,
}

impl Claim {
    pub fn token(&self) -> &str {
        &self.token
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueStats {
    /// Jobs waiting to be claimed, including those in backoff.
    pub depth: usize,
    pub in_flight: usize,
}

/// Outcome of one reaper pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapOutcome {
    pub requeued: Vec<JobId>,
    pub exhausted: Vec<JobId>,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Admit a prompt. Returns immediately with the new job id.
    async fn enqueue(&self, prompt: String, mode: GenerationMode) -> Result<JobId, QueueError>;

    /// Claim the next eligible job, if any, without waiting.
    async fn claim(&self, worker_id: &str) -> Result<Option<Claim>, QueueError>;

    /// Wait until a job can be claimed. Fails with `Unavailable` once the
    /// queue is closed.
    async fn next(&self, worker_id: &str) -> Result<Claim, QueueError>;

    /// Extend the lease of `claim`.
    async fn heartbeat(&self, claim: &Claim) -> Result<(), QueueError>;

    /// Release `claim`; the job leaves the queue.
    async fn ack(&self, claim: &Claim) -> Result<(), QueueError>;

    /// Advisory progress, forwarded to the store.
    async fn update_progress(&self, claim: &Claim, progress: u8) -> Result<(), QueueError>;

    /// Requeue or fail every claim whose lease has expired.
    async fn reap_expired(&self) -> Result<ReapOutcome, QueueError>;

    /// Stop admitting and handing out work.
    fn close(&self);

    fn stats(&self) -> QueueStats;
}

// ============================================================================
// In-memory queue
// ============================================================================

struct Lease {
    token: String,
    worker_id: String,
    deadline: Instant,
}

struct Entry {
    prompt: String,
    mode: GenerationMode,
    attempts: u32,
    enqueued_at: Instant,
    lease: Option<Lease>,
}

#[derive(Default)]
struct Inner {
    ready: VecDeque<JobId>,
    /// Jobs in backoff, with the instant they become claimable.
    delayed: Vec<(Instant, JobId)>,
    entries: HashMap<JobId, Entry>,
    closed: bool,
}

impl Inner {
    fn promote_due(&mut self, now: Instant) {
        if self.delayed.is_empty() {
            return;
        }
        self.delayed.sort_by_key(|(at, _)| *at);
        let due = self.delayed.partition_point(|(at, _)| *at <= now);
        for (_, job_id) in self.delayed.drain(..due) {
            self.ready.push_back(job_id);
        }
    }

    fn earliest_delayed(&self) -> Option<Instant> {
        self.delayed.iter().map(|(at, _)| *at).min()
    }

    fn owned_entry(&mut self, claim: &Claim) -> Result<&mut Entry, QueueError> {
        self.entries
            .get_mut(&claim.job_id)
            .filter(|e| e.lease.as_ref().is_some_and(|l| l.token == claim.token))
            .ok_or_else(|| QueueError::ClaimLost(claim.job_id.clone()))
    }
}

pub struct MemoryQueue {
    store: Arc<dyn JobStore>,
    config: QueueConfig,
    inner: Mutex<Inner>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new(store: Arc<dyn JobStore>, config: QueueConfig) -> Self {
        Self {
            store,
            config,
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Critical sections never panic midway; a poisoned lock still
        // holds consistent data.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn closed_error() -> QueueError {
        QueueError::Unavailable("queue is closed".into())
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, prompt: String, mode: GenerationMode) -> Result<JobId, QueueError> {
        if self.lock().closed {
            return Err(Self::closed_error());
        }
        let job_id = self
            .store
            .create(prompt.clone(), mode)
            .await
            .map_err(|e| match e {
                StoreError::Unavailable(msg) => QueueError::Unavailable(msg),
                other => QueueError::Store(other),
            })?;

        let admitted = {
            let mut inner = self.lock();
            if inner.closed {
                false
            } else {
                inner.entries.insert(
                    job_id.clone(),
                    Entry {
                        prompt,
                        mode,
                        attempts: 0,
                        enqueued_at: Instant::now(),
                        lease: None,
                    },
                );
                inner.ready.push_back(job_id.clone());
                true
            }
        };
        if !admitted {
            if let Err(e) = self.store.fail(&job_id, "queue closed before admission").await {
                tracing::warn!(job_id = %job_id, error = %e, "failed to mark unadmitted job failed");
            }
            return Err(Self::closed_error());
        }

        metrics::counter!("jobs_enqueued_total").increment(1);
        tracing::info!(job_id = %job_id, mode = %mode, "job enqueued");
        self.notify.notify_one();
        Ok(job_id)
    }

    async fn claim(&self, worker_id: &str) -> Result<Option<Claim>, QueueError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(Self::closed_error());
        }
        let now = Instant::now();
        inner.promote_due(now);

        while let Some(job_id) = inner.ready.pop_front() {
            // Entries acked or failed while waiting are skipped.
            let Some(entry) = inner.entries.get_mut(&job_id) else {
                continue;
            };
            if entry.lease.is_some() {
                continue;
            }
            entry.attempts += 1;
            let token = uuid::Uuid::new_v4().to_string();
            entry.lease = Some(Lease {
                token: token.clone(),
                worker_id: worker_id.to_string(),
                deadline: now + self.config.visibility_timeout,
            });
            tracing::debug!(
                job_id = %job_id,
                worker_id,
                attempt = entry.attempts,
                waited_ms = now.duration_since(entry.enqueued_at).as_millis() as u64,
                "job claimed"
            );
            return Ok(Some(Claim {
                job_id,
                prompt: entry.prompt.clone(),
                mode: entry.mode,
                attempt: entry.attempts,
                worker_id: worker_id.to_string(),
                token,
            }));
        }
        Ok(None)
    }

    async fn next(&self, worker_id: &str) -> Result<Claim, QueueError> {
        loop {
            // Register interest before looking, so an enqueue between the
            // check and the wait is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(claim) = self.claim(worker_id).await? {
                return Ok(claim);
            }

            let wake_at = self.lock().earliest_delayed();
            match wake_at {
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn heartbeat(&self, claim: &Claim) -> Result<(), QueueError> {
        let mut inner = self.lock();
        let entry = inner.owned_entry(claim)?;
        if let Some(lease) = entry.lease.as_mut() {
            lease.deadline = Instant::now() + self.config.visibility_timeout;
        }
        Ok(())
    }

    async fn ack(&self, claim: &Claim) -> Result<(), QueueError> {
        let mut inner = self.lock();
        inner.owned_entry(claim)?;
        inner.entries.remove(&claim.job_id);
        tracing::debug!(job_id = %claim.job_id, worker_id = %claim.worker_id, "claim acknowledged");
        Ok(())
    }

    async fn update_progress(&self, claim: &Claim, progress: u8) -> Result<(), QueueError> {
        self.lock().owned_entry(claim)?;
        self.store.set_progress(&claim.job_id, progress).await?;
        Ok(())
    }

    async fn reap_expired(&self) -> Result<ReapOutcome, QueueError> {
        let now = Instant::now();
        let mut outcome = ReapOutcome::default();
        {
            let mut inner = self.lock();
            let expired: Vec<JobId> = inner
                .entries
                .iter()
                .filter(|(_, e)| e.lease.as_ref().is_some_and(|l| l.deadline <= now))
                .map(|(id, _)| id.clone())
                .collect();

            for job_id in expired {
                let Some(entry) = inner.entries.get_mut(&job_id) else {
                    continue;
                };
                let lease = entry.lease.take();
                let attempts = entry.attempts;
                tracing::warn!(
                    job_id = %job_id,
                    worker_id = lease.as_ref().map(|l| l.worker_id.as_str()).unwrap_or_default(),
                    attempt = attempts,
                    "claim expired"
                );
                if attempts >= self.config.max_attempts {
                    inner.entries.remove(&job_id);
                    outcome.exhausted.push(job_id);
                } else {
                    let at = now + self.config.backoff(attempts);
                    inner.delayed.push((at, job_id.clone()));
                    outcome.requeued.push(job_id);
                }
            }
        }

        for job_id in &outcome.requeued {
            metrics::counter!("jobs_requeued_total").increment(1);
            tracing::info!(job_id = %job_id, "job requeued after lease expiry");
        }
        for job_id in &outcome.exhausted {
            metrics::counter!("jobs_failed_total", "reason" => "retry_exhausted").increment(1);
            let reason = format!(
                "retry exhausted after {} attempts",
                self.config.max_attempts
            );
            match self.store.fail(job_id, &reason).await {
                Ok(_) => tracing::warn!(job_id = %job_id, "job failed: retry exhausted"),
                Err(e) if e.is_conflict() => {}
                Err(e) => tracing::error!(job_id = %job_id, error = %e, "failed to mark job failed"),
            }
        }
        if !outcome.requeued.is_empty() {
            // Sleeping workers recompute their backoff deadline.
            self.notify.notify_waiters();
        }
        Ok(outcome)
    }

    fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
        tracing::info!("job queue closed");
    }

    fn stats(&self) -> QueueStats {
        let inner = self.lock();
        let in_flight = inner.entries.values().filter(|e| e.lease.is_some()).count();
        QueueStats {
            depth: inner.entries.len() - in_flight,
            in_flight,
        }
    }
}

/// Run `reap_expired` every `every` until `shutdown` fires.
pub async fn run_reaper(queue: Arc<dyn JobQueue>, every: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if let Err(e) = queue.reap_expired().await {
            tracing::warn!(error = %e, "reaper pass failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryJobStore;
    use manimate_core::JobStatus;

    fn queue_with(config: QueueConfig) -> (Arc<MemoryJobStore>, MemoryQueue) {
        let store = Arc::new(MemoryJobStore::new());
        let queue = MemoryQueue::new(store.clone(), config);
        (store, queue)
    }

    fn fast_config() -> QueueConfig {
        QueueConfig {
            visibility_timeout: Duration::from_secs(3),
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
            reaper_interval: Duration::from_millis(100),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = QueueConfig::default();
        assert_eq!(config.backoff(1), Duration::from_secs(1));
        assert_eq!(config.backoff(2), Duration::from_secs(2));
        assert_eq!(config.backoff(3), Duration::from_secs(4));
        assert_eq!(config.backoff(10), Duration::from_secs(30));
        assert_eq!(config.backoff(u32::MAX), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn enqueue_returns_unique_ids() {
        let (_, queue) = queue_with(QueueConfig::default());
        let mut ids = std::collections::HashSet::new();
        for i in 0..100 {
            let id = queue
                .enqueue(format!("prompt {i}"), GenerationMode::Bulk)
                .await
                .unwrap();
            assert!(ids.insert(id));
        }
        assert_eq!(queue.stats(), QueueStats { depth: 100, in_flight: 0 });
    }

    #[tokio::test]
    async fn claims_are_fifo_and_exclusive() {
        let (_, queue) = queue_with(QueueConfig::default());
        let a = queue.enqueue("a".into(), GenerationMode::Bulk).await.unwrap();
        let b = queue.enqueue("b".into(), GenerationMode::Streaming).await.unwrap();

        let first = queue.claim("w1").await.unwrap().unwrap();
        let second = queue.claim("w2").await.unwrap().unwrap();
        assert_eq!(first.job_id, a);
        assert_eq!(first.attempt, 1);
        assert_eq!(second.job_id, b);
        assert_eq!(second.mode, GenerationMode::Streaming);
        assert!(queue.claim("w3").await.unwrap().is_none());
        assert_eq!(queue.stats().in_flight, 2);
    }

    #[tokio::test]
    async fn ack_removes_and_stale_token_is_rejected() {
        let (_, queue) = queue_with(QueueConfig::default());
        queue.enqueue("a".into(), GenerationMode::Bulk).await.unwrap();
        let claim = queue.claim("w1").await.unwrap().unwrap();

        queue.heartbeat(&claim).await.unwrap();
        tokio_test::assert_ok!(queue.ack(&claim).await);
        assert_eq!(queue.stats(), QueueStats::default());

        assert!(matches!(queue.ack(&claim).await, Err(QueueError::ClaimLost(_))));
        assert!(matches!(queue.heartbeat(&claim).await, Err(QueueError::ClaimLost(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lease_is_requeued_with_backoff() {
        let (store, queue) = queue_with(fast_config());
        let id = queue.enqueue("a".into(), GenerationMode::Bulk).await.unwrap();
        let stale = queue.claim("w1").await.unwrap().unwrap();

        tokio::time::advance(Duration::from_secs(3)).await;
        let outcome = queue.reap_expired().await.unwrap();
        assert_eq!(outcome.requeued, vec![id.clone()]);

        // Old holder lost the claim; the job is in backoff for 1s.
        assert!(matches!(queue.heartbeat(&stale).await, Err(QueueError::ClaimLost(_))));
        assert!(queue.claim("w2").await.unwrap().is_none());

        tokio::time::advance(Duration::from_secs(1)).await;
        let fresh = queue.claim("w2").await.unwrap().unwrap();
        assert_eq!(fresh.job_id, id);
        assert_eq!(fresh.attempt, 2);
        assert_ne!(fresh.token(), stale.token());
        assert!(matches!(queue.ack(&stale).await, Err(QueueError::ClaimLost(_))));
        assert_eq!(store.get_status(&id).await.unwrap(), JobStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_keeps_lease_alive() {
        let (_, queue) = queue_with(fast_config());
        queue.enqueue("a".into(), GenerationMode::Bulk).await.unwrap();
        let claim = queue.claim("w1").await.unwrap().unwrap();

        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(2)).await;
            queue.heartbeat(&claim).await.unwrap();
            assert!(queue.reap_expired().await.unwrap().requeued.is_empty());
        }
        tokio_test::assert_ok!(queue.ack(&claim).await);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_exhausted_marks_failed() {
        let (store, queue) = queue_with(fast_config());
        let id = queue.enqueue("a".into(), GenerationMode::Bulk).await.unwrap();

        for attempt in 1..=3u32 {
            let claim = queue.next("w1").await.unwrap();
            assert_eq!(claim.attempt, attempt);
            tokio::time::advance(Duration::from_secs(3)).await;
            queue.reap_expired().await.unwrap();
        }

        assert_eq!(queue.stats(), QueueStats::default());
        let snapshot = store.snapshot(&id).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(
            snapshot.result.error.as_deref(),
            Some("retry exhausted after 3 attempts")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn next_waits_for_enqueue() {
        let store = Arc::new(MemoryJobStore::new());
        let queue = Arc::new(MemoryQueue::new(store, QueueConfig::default()));

        let waiter = tokio::spawn({
            let queue = queue.clone();
            async move { queue.next("w1").await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        let id = queue.enqueue("a".into(), GenerationMode::Bulk).await.unwrap();
        let claim = waiter.await.unwrap().unwrap();
        assert_eq!(claim.job_id, id);
        assert_eq!(claim.worker_id, "w1");
    }

    #[tokio::test]
    async fn close_rejects_and_wakes_waiters() {
        let store = Arc::new(MemoryJobStore::new());
        let queue = Arc::new(MemoryQueue::new(store.clone(), QueueConfig::default()));
        let waiter = tokio::spawn({
            let queue = queue.clone();
            async move { queue.next("w1").await }
        });
        tokio::task::yield_now().await;

        queue.close();
        assert!(matches!(waiter.await.unwrap(), Err(QueueError::Unavailable(_))));
        assert!(matches!(
            queue.enqueue("late".into(), GenerationMode::Bulk).await,
            Err(QueueError::Unavailable(_))
        ));

        let rejected = store.list_by_status(JobStatus::Failed).await.unwrap();
        assert_eq!(rejected.len(), 1);
        assert_eq!(
            rejected[0].result.error.as_deref(),
            Some("queue closed before admission")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claimers_get_exactly_one_claim() {
        let store = Arc::new(MemoryJobStore::new());
        let queue = Arc::new(MemoryQueue::new(store, QueueConfig::default()));
        queue.enqueue("only".into(), GenerationMode::Bulk).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                queue.claim(&format!("w{i}")).await.unwrap()
            }));
        }
        let mut claimed = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                claimed += 1;
            }
        }
        assert_eq!(claimed, 1);
    }

    #[tokio::test]
    async fn update_progress_is_forwarded() {
        let (store, queue) = queue_with(QueueConfig::default());
        let id = queue.enqueue("a".into(), GenerationMode::Bulk).await.unwrap();
        let claim = queue.claim("w1").await.unwrap().unwrap();
        queue.update_progress(&claim, 40).await.unwrap();
        assert_eq!(store.snapshot(&id).await.unwrap().progress, 40);
    }
}
