//! Retry round-tripping (spec.md 8: P8) and stall recovery (scenario 6),
//! driven through a real `Worker` + `QueueScheduler` pair against the
//! in-memory store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use taskforge_core::application::worker::shutdown_channel;
use taskforge_core::application::{QueueScheduler, Worker};
use taskforge_core::domain::{BackoffPolicy, JobOptions, JobState, WorkerOptions};
use taskforge_core::keys::QueueRef;
use taskforge_core::port::{FailOutcome, MoveToActiveOutcome, QueueStore, SystemTimeProvider, UuidProvider};
use taskforge_core::test_support::InMemoryStore;

use common::{ProcessorOutcome, ScriptedProcessor};

fn queue(name: &str) -> QueueRef {
    QueueRef::with_prefix("it", name)
}

/// P8: moveToFailed -> retry -> moveToActive -> moveToCompleted
/// terminates successfully, without the job ever appearing in `failed`
/// since it was retried before exhausting its attempts.
#[tokio::test]
async fn failed_job_retried_then_completed() {
    let store = InMemoryStore::new();
    let q = queue("retry-round-trip");
    let opts = JobOptions {
        attempts: 2,
        backoff: Some(BackoffPolicy::Fixed { delay_ms: 0 }),
        ..JobOptions::default()
    };
    let added = store.add_job(&q, "job", json!({}), opts, 0).await.unwrap();
    let job_id = added.into_job().id;

    let worker_opts = WorkerOptions::default();
    store.move_to_active(&q, "w1", &worker_opts, 0).await.unwrap();

    let outcome = store
        .move_to_failed(&q, &job_id, "transient error", None, "w1", 1)
        .await
        .unwrap();
    assert!(matches!(outcome, FailOutcome::Retrying { delay_ms: 0 }));

    let job = store.get_job(&q, &job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Waiting);
    assert_eq!(job.attempts_made, 1);

    let claimed = match store.move_to_active(&q, "w2", &worker_opts, 2).await.unwrap() {
        MoveToActiveOutcome::Claimed(job) => job,
        other => panic!("expected the retried job to be claimable, got {other:?}"),
    };
    assert_eq!(claimed.id, job_id);

    store
        .move_to_completed(&q, &job_id, json!("ok"), "w2", 3)
        .await
        .unwrap();

    let job = store.get_job(&q, &job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
    let counts = store
        .get_job_counts(&q, &[JobState::Failed, JobState::Completed])
        .await
        .unwrap();
    assert_eq!(*counts.get("failed").unwrap(), 0);
    assert_eq!(*counts.get("completed").unwrap(), 1);
}

/// Exhausting every attempt moves the job to `failed` instead of
/// retrying - the other branch of moveToFailed's decision.
#[tokio::test]
async fn retries_exhausted_moves_job_to_failed() {
    let store = InMemoryStore::new();
    let q = queue("retry-exhaustion");
    let opts = JobOptions { attempts: 1, ..JobOptions::default() };
    let added = store.add_job(&q, "job", json!({}), opts, 0).await.unwrap();
    let job_id = added.into_job().id;

    store.move_to_active(&q, "w1", &WorkerOptions::default(), 0).await.unwrap();
    let outcome = store
        .move_to_failed(&q, &job_id, "fatal error", Some("trace line"), "w1", 1)
        .await
        .unwrap();
    assert!(matches!(outcome, FailOutcome::Failed));

    let job = store.get_job(&q, &job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.failed_reason.as_deref(), Some("fatal error"));
}

/// Scenario 6: a worker crashes holding a job (no lock renewal, no
/// completion report ever arrives). The scheduler's periodic stall sweep
/// notices the lock has lapsed and reinserts the job into `wait` so
/// another worker can pick it up, rather than leaving it active forever.
#[tokio::test]
async fn stalled_job_is_recovered_out_of_active() {
    let store = InMemoryStore::new();
    let q = queue("stall-recovery");
    store
        .add_job(&q, "job", json!({}), JobOptions::default(), 0)
        .await
        .unwrap();

    // Claim it with an explicit past `now_millis` so its lock (opts
    // lock_duration_ms out from that point) has already lapsed relative
    // to the scheduler's real wall-clock sweeps below - standing in for
    // a worker that crashed without ever renewing it.
    let worker_opts = WorkerOptions::default();
    store.move_to_active(&q, "crashed-worker", &worker_opts, 0).await.unwrap();

    let scheduler = Arc::new(QueueScheduler::new(
        q.clone(),
        store.clone(),
        Arc::new(SystemTimeProvider),
        50,
        1,
    ));
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let handle = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        async move { scheduler.run(shutdown_rx).await }
    });

    // Two sweeps: the first snapshots the active set, the second diffs
    // against it and recovers the job (spec.md 4.1's one-interval lag).
    tokio::time::sleep(Duration::from_millis(250)).await;

    shutdown_tx.shutdown();
    let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;

    let counts = store
        .get_job_counts(&q, &[JobState::Active, JobState::Waiting])
        .await
        .unwrap();
    assert_eq!(*counts.get("active").unwrap(), 0, "the stalled job must not remain active forever");
    assert_eq!(*counts.get("waiting").unwrap(), 1, "it should be back in wait for another worker");
}

/// A processor that panics is treated as a failed attempt, not a crashed
/// process - the worker loop itself keeps running afterward (spec.md
/// 4.3's panic guard).
#[tokio::test]
async fn processor_panic_is_reported_as_a_failure_not_a_worker_crash() {
    let store = InMemoryStore::new();
    let q = queue("panic-guard");
    store
        .add_job(&q, "job", json!({}), JobOptions { attempts: 1, ..JobOptions::default() }, 0)
        .await
        .unwrap();

    let processor = Arc::new(ScriptedProcessor::new(0, ProcessorOutcome::Panic));
    let worker = Arc::new(Worker::new(
        q.clone(),
        store.clone(),
        processor,
        WorkerOptions { concurrency: 1, ..WorkerOptions::default() },
        Arc::new(UuidProvider),
        Arc::new(SystemTimeProvider),
    ));

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let handle = tokio::spawn({
        let worker = Arc::clone(&worker);
        async move { worker.run(shutdown_rx).await }
    });

    tokio::time::sleep(Duration::from_millis(400)).await;
    shutdown_tx.shutdown();
    let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;

    let counts = store.get_job_counts(&q, &[JobState::Failed]).await.unwrap();
    assert_eq!(*counts.get("failed").unwrap(), 1, "the failing job should have terminated in failed");
}
