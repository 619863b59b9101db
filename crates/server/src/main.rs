// crates/server/src/main.rs
//! manimate server binary.
//!
//! Wires the job pipeline together: store, queue, status watcher, worker
//! pool, reaper and retention sweeper, then serves the HTTP API until
//! Ctrl-C. On shutdown the queue stops admitting work, idle workers exit,
//! and jobs already claimed run to completion before the process ends.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use manimate_core::generation::create_provider;
use manimate_jobs::queue::run_reaper;
use manimate_jobs::{
    run_retention_sweeper, spawn_workers, JobQueue, JobStore, MemoryJobStore, MemoryQueue,
    NotifyingWatcher, PollingWatcher, StatusWatcher,
};
use manimate_observability::init_tracing;
use manimate_server::{cors_layer, create_app, init_metrics, AppState, ServerArgs, WatchMode};

/// How often terminal jobs past retention are evicted.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    let args = ServerArgs::parse();
    let _log_guard = init_tracing(&args.logging_config())?;
    init_metrics();

    let provider = create_provider(&args.generation_config())
        .context("generation provider is not usable")?;
    tracing::info!(
        provider = provider.name(),
        model = provider.model(),
        "generation provider ready"
    );

    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let queue_config = args.queue_config();
    let reaper_interval = queue_config.reaper_interval;
    let queue: Arc<dyn JobQueue> = Arc::new(MemoryQueue::new(store.clone(), queue_config));
    let watcher: Arc<dyn StatusWatcher> = match args.status_watch {
        WatchMode::Notify => Arc::new(NotifyingWatcher::new(store.clone())),
        WatchMode::Poll => Arc::new(PollingWatcher::new(store.clone(), args.poll_interval())),
    };

    let shutdown = CancellationToken::new();
    let workers = spawn_workers(
        args.workers.max(1),
        queue.clone(),
        store.clone(),
        provider,
        args.worker_config(),
        shutdown.clone(),
    );
    let reaper = tokio::spawn(run_reaper(queue.clone(), reaper_interval, shutdown.clone()));
    let sweeper = tokio::spawn(run_retention_sweeper(
        store.clone(),
        args.retention(),
        SWEEP_INTERVAL,
        shutdown.clone(),
    ));

    let state = AppState::new(
        store,
        queue.clone(),
        watcher,
        args.default_mode,
        shutdown.clone(),
    );
    let cors = cors_layer(args.cors_origin.as_deref())
        .with_context(|| format!("invalid CORS_ORIGIN {:?}", args.cors_origin))?;
    let app = create_app(state, cors);

    let addr = args.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(
        %addr,
        workers = workers.len(),
        watcher = ?args.status_watch,
        version = env!("CARGO_PKG_VERSION"),
        "manimate listening"
    );

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("shutdown requested");
            signal.cancel();
        })
        .await?;

    // Idle workers see the cancellation; busy ones finish their job first.
    shutdown.cancel();
    queue.close();
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::warn!(error = %e, "worker task ended abnormally");
        }
    }
    let _ = tokio::join!(reaper, sweeper);

    tracing::info!("manimate stopped");
    Ok(())
}
