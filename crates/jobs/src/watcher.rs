// crates/jobs/src/watcher.rs
//! Status change detection.
//!
//! [`NotifyingWatcher`] is authoritative: it follows the store's status log
//! and delivers every transition in order without polling latency.
//! [`PollingWatcher`] re-reads the status on a fixed interval; its latency
//! is bounded by one interval and states shorter than that may be skipped,
//! so its output is a subsequence of the legal order.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use tokio::time::MissedTickBehavior;

use manimate_core::{JobId, JobStatus, StatusUpdate, StoreError};

use crate::store::JobStore;

/// Status updates for one job: the current status first, then every
/// observed change. Ends after a terminal status or an error.
pub type StatusStream = BoxStream<'static, Result<StatusUpdate, StoreError>>;

#[async_trait]
pub trait StatusWatcher: Send + Sync {
    /// Fails with `NotFound` for unknown jobs.
    async fn watch(&self, job_id: &JobId) -> Result<StatusStream, StoreError>;

    fn name(&self) -> &'static str;
}

// ============================================================================
// Notification-based
// ============================================================================

pub struct NotifyingWatcher {
    store: Arc<dyn JobStore>,
}

impl NotifyingWatcher {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StatusWatcher for NotifyingWatcher {
    async fn watch(&self, job_id: &JobId) -> Result<StatusStream, StoreError> {
        let mut rx = self.store.watch_status(job_id).await?;
        let job_id = job_id.clone();
        // Delivery starts at the status current at subscription time.
        let mut cursor = rx.borrow_and_update().len().saturating_sub(1);

        Ok(Box::pin(async_stream::stream! {
            loop {
                let pending: Vec<StatusUpdate> = {
                    let log = rx.borrow_and_update();
                    let fresh = log.get(cursor..).map(<[StatusUpdate]>::to_vec).unwrap_or_default();
                    cursor = log.len();
                    fresh
                };

                for update in pending {
                    let terminal = update.status.is_terminal();
                    yield Ok(update);
                    if terminal {
                        return;
                    }
                }

                if rx.changed().await.is_err() {
                    // Sender dropped: the job was evicted.
                    yield Err(StoreError::NotFound(job_id.clone()));
                    return;
                }
            }
        }))
    }

    fn name(&self) -> &'static str {
        "notify"
    }
}

// ============================================================================
// Polling-based
// ============================================================================

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct PollingWatcher {
    store: Arc<dyn JobStore>,
    interval: Duration,
}

impl PollingWatcher {
    pub fn new(store: Arc<dyn JobStore>, interval: Duration) -> Self {
        Self { store, interval }
    }
}

#[async_trait]
impl StatusWatcher for PollingWatcher {
    async fn watch(&self, job_id: &JobId) -> Result<StatusStream, StoreError> {
        // Surface unknown ids before the stream opens.
        self.store.get_status(job_id).await?;

        let store = Arc::clone(&self.store);
        let job_id = job_id.clone();
        let period = self.interval;

        Ok(Box::pin(async_stream::stream! {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last: Option<JobStatus> = None;

            loop {
                ticker.tick().await;
                let status = match store.get_status(&job_id).await {
                    Ok(status) => status,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                if last == Some(status) {
                    continue;
                }
                last = Some(status);

                let mut update = StatusUpdate::new(status);
                if status.is_terminal() {
                    match store.get_result(&job_id).await {
                        Ok(result) => {
                            update.message = result.error;
                            update.video_url = result.video_url;
                        }
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
                yield Ok(update);
                if status.is_terminal() {
                    return;
                }
            }
        }))
    }

    fn name(&self) -> &'static str {
        "poll"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryJobStore;
    use futures_util::StreamExt;
    use manimate_core::GenerationMode;
    use pretty_assertions::assert_eq;

    async fn setup() -> (Arc<MemoryJobStore>, JobId) {
        let store = Arc::new(MemoryJobStore::new());
        let id = store.create("p".into(), GenerationMode::Bulk).await.unwrap();
        (store, id)
    }

    fn statuses(updates: &[Result<StatusUpdate, StoreError>]) -> Vec<JobStatus> {
        updates
            .iter()
            .map(|u| u.as_ref().unwrap().status)
            .collect()
    }

    #[tokio::test]
    async fn notifying_delivers_every_transition_in_order() {
        let (store, id) = setup().await;
        let watcher = NotifyingWatcher::new(store.clone());
        let stream = watcher.watch(&id).await.unwrap();

        for status in [
            JobStatus::Processing,
            JobStatus::ReadyForRender,
            JobStatus::Rendering,
        ] {
            store.set_status(&id, StatusUpdate::new(status)).await.unwrap();
        }
        store
            .set_status(&id, StatusUpdate::completed("https://v/1.mp4"))
            .await
            .unwrap();

        let updates: Vec<_> = stream.collect().await;
        assert_eq!(
            statuses(&updates),
            vec![
                JobStatus::Pending,
                JobStatus::Processing,
                JobStatus::ReadyForRender,
                JobStatus::Rendering,
                JobStatus::Completed,
            ]
        );
        let last = updates.last().unwrap().as_ref().unwrap();
        assert_eq!(last.video_url.as_deref(), Some("https://v/1.mp4"));
    }

    #[tokio::test]
    async fn notifying_starts_from_current_status() {
        let (store, id) = setup().await;
        store
            .set_status(&id, StatusUpdate::new(JobStatus::ReadyForRender))
            .await
            .unwrap();
        let mut stream = NotifyingWatcher::new(store.clone()).watch(&id).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.status, JobStatus::ReadyForRender);
    }

    #[tokio::test]
    async fn notifying_on_terminal_job_yields_once_and_ends() {
        let (store, id) = setup().await;
        store.fail(&id, "boom").await.unwrap();
        let updates: Vec<_> = NotifyingWatcher::new(store.clone())
            .watch(&id)
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(statuses(&updates), vec![JobStatus::Failed]);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let id = JobId::from("nope");
        assert!(NotifyingWatcher::new(store.clone()).watch(&id).await.is_err());
        assert!(PollingWatcher::new(store, DEFAULT_POLL_INTERVAL)
            .watch(&id)
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn polling_emits_changes_and_terminal_result() {
        let (store, id) = setup().await;
        let watcher = PollingWatcher::new(store.clone(), Duration::from_millis(500));
        let mut stream = watcher.watch(&id).await.unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap().status, JobStatus::Pending);

        store
            .set_status(&id, StatusUpdate::new(JobStatus::ReadyForRender))
            .await
            .unwrap();
        assert_eq!(
            stream.next().await.unwrap().unwrap().status,
            JobStatus::ReadyForRender
        );

        store.fail(&id, "render crashed").await.unwrap();
        let last = stream.next().await.unwrap().unwrap();
        assert_eq!(last.status, JobStatus::Failed);
        assert_eq!(last.message.as_deref(), Some("render crashed"));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn polling_may_skip_short_lived_states() {
        let (store, id) = setup().await;
        let mut stream = PollingWatcher::new(store.clone(), Duration::from_millis(500))
            .watch(&id)
            .await
            .unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap().status, JobStatus::Pending);

        // Both transitions land within one interval.
        store
            .set_status(&id, StatusUpdate::new(JobStatus::Processing))
            .await
            .unwrap();
        store
            .set_status(&id, StatusUpdate::completed("https://v/2.mp4"))
            .await
            .unwrap();

        let rest: Vec<_> = stream.collect().await;
        assert_eq!(statuses(&rest), vec![JobStatus::Completed]);
    }
}
