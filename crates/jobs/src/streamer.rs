// crates/jobs/src/streamer.rs
//! Content streamer: relays a job's published chunks to one subscriber.
//!
//! Chunks arrive in production order from the job's broadcast channel. The
//! stream ends when the job reaches a terminal status or the channel closes
//! (eviction). A subscriber that falls more than the channel capacity
//! behind skips the overflowed chunks; it never sees them out of order or
//! twice. There is no replay: latecomers read the snapshot.

use std::sync::Arc;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use manimate_core::{JobId, StoreError};

use crate::store::JobStore;
use crate::subscription::{SubscriberTracker, SubscriptionKind};
use crate::watcher::StatusWatcher;

/// Open a content subscription for `job_id`, counted in `tracker` until the
/// returned stream is dropped.
pub async fn subscribe_content(
    store: &dyn JobStore,
    watcher: &dyn StatusWatcher,
    tracker: &Arc<SubscriberTracker>,
    job_id: &JobId,
) -> Result<BoxStream<'static, String>, StoreError> {
    let mut rx = store.subscribe_content(job_id).await?;
    let mut statuses = watcher.watch(job_id).await?;
    let guard = tracker.connect(job_id, SubscriptionKind::Content);
    let job_id = job_id.clone();

    Ok(Box::pin(async_stream::stream! {
        let _guard = guard;
        loop {
            tokio::select! {
                biased;
                chunk = rx.recv() => {
                    match chunk {
                        Ok(chunk) => yield chunk,
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(job_id = %job_id, skipped, "content subscriber lagged, chunks skipped");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
                update = statuses.next() => {
                    match update {
                        Some(Ok(update)) if update.status.is_terminal() => {
                            // Flush what was published before the terminal write.
                            loop {
                                match rx.try_recv() {
                                    Ok(chunk) => yield chunk,
                                    Err(TryRecvError::Lagged(skipped)) => {
                                        tracing::warn!(job_id = %job_id, skipped, "content subscriber lagged, chunks skipped");
                                    }
                                    Err(_) => break,
                                }
                            }
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!(job_id = %job_id, error = %e, "content subscription aborted");
                            break;
                        }
                        None => break,
                    }
                }
            }
        }
    }))
}
