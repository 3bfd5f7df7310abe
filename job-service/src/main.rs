//! Composition root wiring the State Store, Priority Queue, Worker Pool and
//! Event Bus together and exposing the externally-visible contracts of §6
//! over a small `axum::Router`. No module-level globals: every service is
//! constructed here and threaded through explicitly, per the re-architecture
//! notes on the source's shared managers.

mod config;
mod demo_summarizer;
mod error;
mod handlers;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use config::Config;
use envconfig::Envconfig;
use eyre::Result;
use health::HealthRegistry;
use job_common::metrics::setup_metrics_router;
use job_common::queue::PriorityQueue;
use job_common::store::{flush_loop, retention_sweep_loop, JsonFileStore, StateStore};
use job_events::EventBus;
use job_worker::WorkerPool;

use demo_summarizer::EchoSummarizer;
use handlers::AppState;

async fn listen(app: Router, bind: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!("listening on {bind}");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Periodically ticks the event bus's heartbeat sweep, enqueuing a
/// `heartbeat` event on every open connection and reaping ones that are
/// idle or persistently overflowing.
async fn heartbeat_loop(bus: Arc<EventBus>, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        bus.heartbeat_tick().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("invalid configuration");

    let queue = Arc::new(PriorityQueue::new(&config.queue));

    let persistence = Arc::new(JsonFileStore::new(config.store.persistence_path.clone()));
    let store = Arc::new(StateStore::new(persistence));
    let restored = store.restore().await.unwrap_or_else(|error| {
        tracing::warn!("failed to restore persisted job state: {error}");
        0
    });
    tracing::info!("restored {restored} jobs from persisted state");

    let bus = Arc::new(EventBus::new(config.bus.clone()));

    let liveness = HealthRegistry::new("liveness");
    let readiness = HealthRegistry::new("readiness");

    let summarizer = Arc::new(EchoSummarizer);
    let worker_pool = Arc::new(WorkerPool::new(
        config.worker.clone(),
        queue.clone(),
        store.clone(),
        bus.clone(),
        summarizer,
    ));
    let worker_handles = worker_pool.clone().run(&liveness).await;

    let heartbeat_handle = tokio::spawn(heartbeat_loop(
        bus.clone(),
        config.bus.sse_heartbeat_interval.as_duration(),
    ));
    let flush_handle = tokio::spawn(flush_loop(
        store.clone(),
        config.store.flush_interval.as_duration(),
    ));
    let retention_handle = tokio::spawn(retention_sweep_loop(
        store.clone(),
        config.store.retention.as_chrono(),
        config.store.sweep_interval.as_duration(),
    ));

    let state = AppState {
        queue: queue.clone(),
        store: store.clone(),
        bus: bus.clone(),
    };

    let app = handlers::router(state)
        .route("/_liveness", get(move || std::future::ready(liveness.get_status())))
        .route(
            "/_readiness",
            get(move || std::future::ready(readiness.get_status())),
        )
        .merge(setup_metrics_router());

    let shutdown = shutdown_signal();
    tokio::select! {
        result = listen(app, config.bind()) => {
            if let Err(error) = result {
                tracing::error!("job-service http server exited: {error}");
            }
        }
        _ = shutdown => {
            tracing::info!("shutdown signal received, draining");
        }
    }

    worker_pool.stop();
    let grace = config.worker.shutdown_grace_period.as_duration();
    let _ = tokio::time::timeout(grace, futures::future::join_all(worker_handles)).await;

    let drained = queue.drain().await;
    tracing::info!("drained {drained} pending jobs from the queue");

    bus.broadcast_shutdown().await;

    if let Err(error) = store.flush().await {
        tracing::warn!("final flush on shutdown failed: {error}");
    }

    heartbeat_handle.abort();
    flush_handle.abort();
    retention_handle.abort();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
