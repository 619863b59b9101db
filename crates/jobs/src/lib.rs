// crates/jobs/src/lib.rs
//! Job orchestration and real-time delivery.
//!
//! Leaf-first: the [`store`] holds per-job status and result fields plus
//! the status-log and content channels; the [`queue`] hands each job to
//! exactly one worker at a time; [`worker`]s drive generation; the
//! [`notifier`] and [`streamer`] turn store channels into per-subscriber
//! event streams.

pub mod notifier;
pub mod queue;
pub mod store;
pub mod streamer;
pub mod subscription;
pub mod watcher;
pub mod worker;

pub use notifier::{subscribe_status, DeliveryError, StatusEvent};
pub use queue::{Claim, JobQueue, MemoryQueue, QueueConfig, QueueStats};
pub use store::{run_retention_sweeper, JobStore, MemoryJobStore};
pub use streamer::subscribe_content;
pub use subscription::{SubscriberTracker, SubscriptionGuard, SubscriptionKind};
pub use watcher::{NotifyingWatcher, PollingWatcher, StatusStream, StatusWatcher};
pub use worker::{spawn_workers, JobOutcome, Worker, WorkerConfig};
