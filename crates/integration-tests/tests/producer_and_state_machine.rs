//! Producer-facing state machine properties (spec.md 8: P1, P4, P6, P7,
//! P9) plus flow/dependency gating (spec.md 4.6), exercised against the
//! in-memory store so they run without a live Redis.

mod common;

use std::sync::Arc;

use serde_json::json;

use taskforge_core::application::{FlowNode, FlowProducer, Producer};
use taskforge_core::domain::{JobOptions, JobState};
use taskforge_core::keys::QueueRef;
use taskforge_core::port::{QueueStore, Range, TimeProvider, UuidProvider};
use taskforge_core::test_support::InMemoryStore;

fn queue() -> QueueRef {
    QueueRef::with_prefix("it", "producer-suite")
}

/// P7: add -> getJob(id) returns the same data and opts back.
#[tokio::test]
async fn add_then_get_job_round_trips_data_and_opts() {
    let store = InMemoryStore::new();
    let q = queue();
    let time: Arc<dyn TimeProvider> = Arc::new(common::ManualClock::new(0));
    let producer = Producer::new(store.clone(), q.clone(), time);

    let opts = JobOptions {
        priority: Some(5),
        attempts: 3,
        ..JobOptions::default()
    };
    let payload = json!({"path": "/repo/main.rs"});
    let job_id = producer.add("index", payload.clone(), opts.clone()).await.unwrap();

    let fetched = store.get_job(&q, &job_id).await.unwrap().unwrap();
    assert_eq!(fetched.data.as_value(), &payload);
    assert_eq!(fetched.opts.priority, opts.priority);
    assert_eq!(fetched.opts.attempts, opts.attempts);
}

/// P6: addJob with a fixed jobId is idempotent - repeated calls neither
/// create duplicates nor mutate the existing job.
#[tokio::test]
async fn add_with_fixed_job_id_is_idempotent() {
    let store = InMemoryStore::new();
    let q = queue();
    let time: Arc<dyn TimeProvider> = Arc::new(common::ManualClock::new(0));
    let producer = Producer::new(store.clone(), q.clone(), time);

    let opts = JobOptions {
        job_id: Some("fixed-1".into()),
        ..JobOptions::default()
    };

    let first = producer.add("index", json!({"n": 1}), opts.clone()).await.unwrap();
    let second = producer.add("index", json!({"n": 999}), opts).await.unwrap();

    assert_eq!(first, second);
    let job = store.get_job(&q, &first).await.unwrap().unwrap();
    // The second call's (different) payload must not have overwritten the first.
    assert_eq!(job.data.as_value(), &json!({"n": 1}));

    let counts = store
        .get_job_counts(&q, &[JobState::Waiting, JobState::Active])
        .await
        .unwrap();
    assert_eq!(*counts.get("waiting").unwrap(), 1);
}

/// P1: a job id is in at most one state container at a time - moving a
/// job from waiting to active must not leave it double-booked.
#[tokio::test]
async fn job_occupies_exactly_one_state_container() {
    let store = InMemoryStore::new();
    let q = queue();
    let opts = JobOptions::default();
    let added = store.add_job(&q, "job", json!({}), opts, 0).await.unwrap();
    let job_id = added.into_job().id;

    let worker_opts = taskforge_core::domain::WorkerOptions::default();
    store.move_to_active(&q, "w1", &worker_opts, 0).await.unwrap();

    let counts = store
        .get_job_counts(&q, &[JobState::Waiting, JobState::Active, JobState::Completed])
        .await
        .unwrap();
    assert_eq!(*counts.get("waiting").unwrap(), 0);
    assert_eq!(*counts.get("active").unwrap(), 1);

    store
        .move_to_completed(&q, &job_id, json!("done"), "w1", 10)
        .await
        .unwrap();

    let counts = store
        .get_job_counts(&q, &[JobState::Waiting, JobState::Active, JobState::Completed])
        .await
        .unwrap();
    assert_eq!(*counts.get("active").unwrap(), 0);
    assert_eq!(*counts.get("completed").unwrap(), 1);
}

/// P4: a job completed with removeOnComplete=false (the default) stays
/// present in `completed`.
#[tokio::test]
async fn completed_job_with_default_retention_survives_in_completed_set() {
    let store = InMemoryStore::new();
    let q = queue();
    let added = store
        .add_job(&q, "job", json!({}), JobOptions::default(), 0)
        .await
        .unwrap();
    let job_id = added.into_job().id;

    let worker_opts = taskforge_core::domain::WorkerOptions::default();
    store.move_to_active(&q, "w1", &worker_opts, 0).await.unwrap();
    store
        .move_to_completed(&q, &job_id, json!("ok"), "w1", 5)
        .await
        .unwrap();

    let completed = store
        .get_jobs(
            &q,
            JobState::Completed,
            Range {
                start: 0,
                end: -1,
                ascending: true,
            },
        )
        .await
        .unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].id, job_id);
}

/// P9: obliterate leaves no observable state behind in the queue's
/// namespace - every state container reports zero afterward.
#[tokio::test]
async fn obliterate_clears_every_state_container() {
    let store = InMemoryStore::new();
    let q = queue();
    for i in 0..5 {
        store
            .add_job(&q, "job", json!({"i": i}), JobOptions::default(), 0)
            .await
            .unwrap();
    }

    store.obliterate(&q, false).await.unwrap();

    let states = [
        JobState::Waiting,
        JobState::Active,
        JobState::Delayed,
        JobState::WaitingChildren,
        JobState::Completed,
        JobState::Failed,
    ];
    let counts = store.get_job_counts(&q, &states).await.unwrap();
    for state in states {
        assert_eq!(*counts.get(&state.to_string()).unwrap(), 0, "{state} should be empty");
    }
}

/// obliterate refuses to run while jobs are active unless forced
/// (spec.md 4.1).
#[tokio::test]
async fn obliterate_refuses_with_active_jobs_unless_forced() {
    let store = InMemoryStore::new();
    let q = queue();
    store
        .add_job(&q, "job", json!({}), JobOptions::default(), 0)
        .await
        .unwrap();
    store
        .move_to_active(&q, "w1", &taskforge_core::domain::WorkerOptions::default(), 0)
        .await
        .unwrap();

    assert!(store.obliterate(&q, false).await.is_err());
    assert!(store.obliterate(&q, true).await.is_ok());
}

/// A flow's parent is gated into waiting-children until every child
/// resolves, then released into wait once the last one completes
/// (spec.md 4.6, I4).
#[tokio::test]
async fn flow_parent_waits_for_children_then_becomes_runnable() {
    let store = InMemoryStore::new();
    let q = queue();
    let time: Arc<dyn TimeProvider> = Arc::new(common::ManualClock::new(0));
    let producer = Producer::new(store.clone(), q.clone(), time);
    let id_provider = Arc::new(UuidProvider);
    let flow = FlowProducer::new(producer, id_provider);

    let root = FlowNode::new("parent", json!({}), JobOptions::default()).with_children(vec![
        FlowNode::new("child-a", json!({}), JobOptions::default()),
        FlowNode::new("child-b", json!({}), JobOptions::default()),
    ]);

    let result = flow.add_flow(root).await.unwrap();
    assert_eq!(result.children.len(), 2);

    let parent = store.get_job(&q, &result.job_id).await.unwrap().unwrap();
    assert_eq!(parent.state, JobState::WaitingChildren);

    let worker_opts = taskforge_core::domain::WorkerOptions::default();
    for _ in &result.children {
        let outcome = store.move_to_active(&q, "w1", &worker_opts, 0).await.unwrap();
        let claimed = match outcome {
            taskforge_core::port::MoveToActiveOutcome::Claimed(job) => job,
            other => panic!("expected a claimable child, got {other:?}"),
        };
        store
            .move_to_completed(&q, &claimed.id, json!("done"), "w1", 1)
            .await
            .unwrap();
    }

    let parent = store.get_job(&q, &result.job_id).await.unwrap().unwrap();
    assert_eq!(parent.state, JobState::Waiting);
}
