//! Rate-limiter timing laws (spec.md 8: P10, P11, P12 / scenario 4),
//! driven through a real `Worker` + `QueueScheduler` pair so a
//! rate-limited job's round trip through `delayed` and back is exercised
//! exactly as it would be in production (spec.md 4.4).

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;

use taskforge_core::application::worker::shutdown_channel;
use taskforge_core::application::{QueueScheduler, Worker};
use taskforge_core::domain::{JobOptions, JobState, LimiterOptions, WorkerOptions};
use taskforge_core::keys::QueueRef;
use taskforge_core::port::{QueueStore, SystemTimeProvider, UuidProvider};
use taskforge_core::test_support::InMemoryStore;

use common::{ProcessorOutcome, ScriptedProcessor};

fn queue(name: &str) -> QueueRef {
    QueueRef::with_prefix("it", name)
}

async fn run_to_completion(
    store: Arc<InMemoryStore>,
    q: QueueRef,
    worker_opts: WorkerOptions,
    expected_completions: i64,
    timeout: Duration,
) {
    let processor = Arc::new(ScriptedProcessor::new(5, ProcessorOutcome::Succeed));
    let worker = Arc::new(Worker::new(
        q.clone(),
        store.clone(),
        processor,
        worker_opts.clone(),
        Arc::new(UuidProvider),
        Arc::new(SystemTimeProvider),
    ));
    let scheduler = Arc::new(QueueScheduler::new(
        q.clone(),
        store.clone(),
        Arc::new(SystemTimeProvider),
        worker_opts.stalled_interval_ms,
        worker_opts.max_stalled_count,
    ));

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let worker_handle = tokio::spawn({
        let worker = Arc::clone(&worker);
        let rx = shutdown_rx.clone();
        async move { worker.run(rx).await }
    });
    let scheduler_handle = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        async move { scheduler.run(shutdown_rx).await }
    });

    let step = Duration::from_millis(10);
    let mut waited = Duration::ZERO;
    loop {
        let counts = store.get_job_counts(&q, &[JobState::Completed]).await.unwrap();
        if *counts.get("completed").unwrap_or(&0) >= expected_completions {
            break;
        }
        tokio::time::sleep(step).await;
        waited += step;
        assert!(waited < timeout, "jobs did not finish completing within {timeout:?}");
    }

    shutdown_tx.shutdown();
    let _ = tokio::time::timeout(Duration::from_secs(2), worker_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(2), scheduler_handle).await;
}

/// P10/scenario 4: with `max=1, duration=D` and N jobs, total wall time
/// is at least `(N-1)*D` - the limiter forces them through one at a time.
#[tokio::test]
async fn ungrouped_limiter_serializes_jobs_to_one_per_window() {
    let store = InMemoryStore::new();
    let q = queue("ratelimit-ungrouped");
    for i in 0..4 {
        store
            .add_job(&q, "job", json!({"i": i}), JobOptions::default(), 0)
            .await
            .unwrap();
    }

    const DURATION_MS: i64 = 100;
    let worker_opts = WorkerOptions {
        concurrency: 1,
        limiter: Some(LimiterOptions {
            max: 1,
            duration_ms: DURATION_MS,
            group_key: None,
            worker_delay: false,
        }),
        ..WorkerOptions::default()
    };

    let start = Instant::now();
    run_to_completion(store.clone(), q.clone(), worker_opts, 4, Duration::from_secs(10)).await;
    let elapsed = start.elapsed();

    assert!(
        elapsed >= Duration::from_millis(3 * DURATION_MS as u64 - 30),
        "expected >= 3*{DURATION_MS}ms under the 1/{DURATION_MS}ms limiter, got {elapsed:?}"
    );
}

/// P12: a configured `groupKey` with the field absent from every job's
/// data silently falls back to the shared default bucket - grouping is
/// skipped, not an error, and all jobs still serialize together.
#[tokio::test]
async fn missing_group_field_shares_the_default_bucket() {
    let store = InMemoryStore::new();
    let q = queue("ratelimit-missing-group-field");
    for i in 0..3 {
        // None of these carry a `tenant` field.
        store
            .add_job(&q, "job", json!({"i": i}), JobOptions::default(), 0)
            .await
            .unwrap();
    }

    const DURATION_MS: i64 = 80;
    let worker_opts = WorkerOptions {
        concurrency: 1,
        limiter: Some(LimiterOptions {
            max: 1,
            duration_ms: DURATION_MS,
            group_key: Some("tenant".into()),
            worker_delay: false,
        }),
        ..WorkerOptions::default()
    };

    let start = Instant::now();
    run_to_completion(store.clone(), q.clone(), worker_opts, 3, Duration::from_secs(10)).await;
    let elapsed = start.elapsed();

    assert!(
        elapsed >= Duration::from_millis(2 * DURATION_MS as u64 - 30),
        "jobs lacking the group field must still share one bucket, got {elapsed:?}"
    );
}

/// P11: distinct group values get independent buckets - two single-job
/// groups under the same limiter proceed without waiting on each other.
#[tokio::test]
async fn distinct_groups_do_not_serialize_against_each_other() {
    let store = InMemoryStore::new();
    let q = queue("ratelimit-distinct-groups");
    store
        .add_job(&q, "job", json!({"tenant": "acme"}), JobOptions::default(), 0)
        .await
        .unwrap();
    store
        .add_job(&q, "job", json!({"tenant": "globex"}), JobOptions::default(), 0)
        .await
        .unwrap();

    const DURATION_MS: i64 = 500;
    let worker_opts = WorkerOptions {
        concurrency: 1,
        limiter: Some(LimiterOptions {
            max: 1,
            duration_ms: DURATION_MS,
            group_key: Some("tenant".into()),
            worker_delay: false,
        }),
        ..WorkerOptions::default()
    };

    let start = Instant::now();
    run_to_completion(store.clone(), q.clone(), worker_opts, 2, Duration::from_secs(10)).await;
    let elapsed = start.elapsed();

    // If these shared one bucket, the second job would have to wait out
    // most of DURATION_MS; independent buckets let both finish quickly.
    assert!(
        elapsed < Duration::from_millis(DURATION_MS as u64),
        "distinct groups should not serialize against one another, got {elapsed:?}"
    );
}
