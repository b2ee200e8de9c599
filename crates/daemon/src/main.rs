//! Taskforge daemon - composition root (ADR-001).
//!
//! Wires a Redis-backed `QueueStore` to a `Worker` (job processing) and a
//! `QueueScheduler` (delayed-job promotion + stalled-job recovery) for one
//! queue, and runs both until Ctrl+C.

mod telemetry;

use anyhow::{Context, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use taskforge_core::application::worker::{shutdown_channel, Processor};
use taskforge_core::application::{Producer, QueueScheduler, Worker};
use taskforge_core::domain::{Job, WorkerOptions};
use taskforge_core::keys::QueueRef;
use taskforge_core::port::{IdProvider, SystemTimeProvider, TimeProvider, UuidProvider};
use taskforge_redis::RedisStore;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Placeholder processor: echoes the job payload back as its return
/// value. Operators link their own `Processor` in by swapping this type
/// out; the daemon binary exists to prove the wiring, not to prescribe
/// business logic (spec.md 9: job semantics are opaque to the core).
struct EchoProcessor;

#[async_trait::async_trait]
impl Processor for EchoProcessor {
    async fn process(&self, job: &Job) -> std::result::Result<Value, String> {
        Ok(job.data.as_value().clone())
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<()> {
    let log_format = env_or("TASKFORGE_LOG_FORMAT", "pretty");
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("taskforge=info"))
        .expect("failed to build env filter");

    match log_format.as_str() {
        "json" => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init(),
        _ => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty())
            .init(),
    }

    info!("taskforge-daemon v{} starting...", VERSION);

    if let Err(e) = telemetry::init_telemetry() {
        tracing::warn!(error = ?e, "failed to initialize OpenTelemetry (continuing without it)");
    }

    let redis_url = env_or("TASKFORGE_REDIS_URL", "redis://127.0.0.1:6379");
    let prefix = env_or("TASKFORGE_PREFIX", "taskforge");
    let queue_name = env_or("TASKFORGE_QUEUE", "default");
    let queue = QueueRef::with_prefix(prefix, queue_name);

    info!(redis_url = %redis_url, queue = %queue.name(), "connecting to backing store...");
    let store = RedisStore::connect(&redis_url)
        .await
        .context("failed to connect to redis")?;

    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let id_provider: Arc<dyn IdProvider> = Arc::new(UuidProvider);

    let producer = Producer::new(store.clone(), queue.clone(), time_provider.clone());
    let _ = producer; // available to embedders; the daemon itself only runs consumers.

    let worker_opts = WorkerOptions {
        concurrency: env_parse("TASKFORGE_CONCURRENCY", WorkerOptions::default().concurrency),
        lock_duration_ms: env_parse("TASKFORGE_LOCK_DURATION_MS", WorkerOptions::default().lock_duration_ms),
        lock_renew_time_ms: env_parse(
            "TASKFORGE_LOCK_RENEW_TIME_MS",
            WorkerOptions::default().lock_renew_time_ms,
        ),
        stalled_interval_ms: env_parse(
            "TASKFORGE_STALLED_INTERVAL_MS",
            WorkerOptions::default().stalled_interval_ms,
        ),
        max_stalled_count: env_parse("TASKFORGE_MAX_STALLED_COUNT", WorkerOptions::default().max_stalled_count),
        ..WorkerOptions::default()
    };

    let worker = Arc::new(Worker::new(
        queue.clone(),
        store.clone(),
        Arc::new(EchoProcessor),
        worker_opts.clone(),
        id_provider,
        time_provider.clone(),
    ));

    let scheduler = Arc::new(QueueScheduler::new(
        queue.clone(),
        store.clone(),
        time_provider,
        worker_opts.stalled_interval_ms,
        worker_opts.max_stalled_count,
    ));

    let (shutdown_tx, shutdown_rx) = shutdown_channel();

    info!(concurrency = worker_opts.concurrency, "starting worker...");
    let worker_handle = tokio::spawn({
        let worker = Arc::clone(&worker);
        let shutdown_rx = shutdown_rx.clone();
        async move { worker.run(shutdown_rx).await }
    });

    info!("starting scheduler...");
    let scheduler_handle = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        async move { scheduler.run(shutdown_rx).await }
    });

    info!("ready. press Ctrl+C to shut down.");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining...");

    shutdown_tx.shutdown();
    let _ = tokio::time::timeout(std::time::Duration::from_secs(10), worker_handle).await;
    let _ = tokio::time::timeout(std::time::Duration::from_secs(10), scheduler_handle).await;

    info!("shutdown complete.");
    Ok(())
}
