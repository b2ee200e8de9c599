// QueueStore Port (Interface) - the Script Library contract (spec.md 4.1)
//
// Every non-trivial state change is a single atomic operation against the
// backing store. This trait is the seam: `taskforge-core` depends only on
// it, never on a concrete driver (ADR-001). `taskforge-redis` is the one
// production implementation, executing each method as a `redis::Script`
// (Lua) so the transition is atomic under contention from any number of
// concurrent workers/schedulers (spec.md 5).

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use std::collections::HashMap;

use crate::domain::{Job, JobEvent, JobId, JobOptions, JobState, QueueName, WorkerOptions};
use crate::error::Result;
use crate::keys::QueueRef;

/// Result of `addJob` (spec.md 4.1). A caller-supplied `jobId` makes the
/// operation idempotent: a repeat call returns `Existing` without
/// mutating anything (P6).
#[derive(Debug, Clone)]
pub enum AddJobOutcome {
    Created(Job),
    Existing(Job),
}

impl AddJobOutcome {
    pub fn into_job(self) -> Job {
        match self {
            AddJobOutcome::Created(j) | AddJobOutcome::Existing(j) => j,
        }
    }
}

/// Result of `moveToActive` (spec.md 4.1).
#[derive(Debug, Clone)]
pub enum MoveToActiveOutcome {
    /// A job was claimed and leased to the caller's token.
    Claimed(Job),
    /// The queue is paused; the worker should wait for `resumed`/`drain`.
    Paused,
    /// The rate limiter is over quota; retry after `delay_ms`.
    RateLimited { delay_ms: i64 },
    /// Nothing was runnable.
    Empty,
}

/// Result of `moveToFailed` (spec.md 4.1).
#[derive(Debug, Clone)]
pub enum FailOutcome {
    /// Reinserted for another attempt, after `delay_ms` (0 = immediate).
    Retrying { delay_ms: i64 },
    /// Terminal: moved into `failed`.
    Failed,
}

/// Result of `promoteDelayed` (spec.md 4.1).
#[derive(Debug, Clone, Copy, Default)]
pub struct PromoteOutcome {
    pub promoted: u64,
    /// Score (absolute fire-time ms) of the next-soonest delayed job, if
    /// any remain, so the scheduler can re-arm its timer precisely.
    pub next_score: Option<i64>,
}

/// Result of `moveStalledJobs` (spec.md 4.1, 8 scenario 6).
#[derive(Debug, Clone, Default)]
pub struct StalledOutcome {
    /// Ids reinserted at the head of `wait`.
    pub recovered: Vec<JobId>,
    /// Ids moved to `failed` with reason "job stalled more than allowable limit".
    pub failed: Vec<JobId>,
}

/// A range of ids to page through state containers (spec.md 6, `getJobs`).
#[derive(Debug, Clone, Copy)]
pub struct Range {
    pub start: i64,
    pub end: i64,
    pub ascending: bool,
}

#[async_trait]
pub trait QueueStore: Send + Sync {
    // --- Producer-facing scripts ---

    async fn add_job(
        &self,
        queue: &QueueRef,
        name: &str,
        data: Value,
        opts: JobOptions,
        now_millis: i64,
    ) -> Result<AddJobOutcome>;

    /// Remove a job id from whichever container holds it. No-op (but not
    /// an error) if the id is already gone.
    async fn remove(&self, queue: &QueueRef, job_id: &JobId) -> Result<()>;

    /// Remove every id from `wait`/`delayed`, leaving `active` untouched.
    async fn drain(&self, queue: &QueueRef) -> Result<()>;

    /// Remove up to `limit` ids from `completed`/`failed` older than
    /// `now - grace_ms`.
    async fn clean(
        &self,
        queue: &QueueRef,
        grace_ms: i64,
        limit: u64,
        status: JobState,
        now_millis: i64,
    ) -> Result<Vec<JobId>>;

    /// Delete every key under the queue's namespace. Refuses unless
    /// `force` when `active` is non-empty.
    async fn obliterate(&self, queue: &QueueRef, force: bool) -> Result<()>;

    async fn pause(&self, queue: &QueueRef) -> Result<()>;
    async fn resume(&self, queue: &QueueRef) -> Result<()>;
    async fn is_paused(&self, queue: &QueueRef) -> Result<bool>;

    // --- Worker-facing scripts ---

    async fn move_to_active(
        &self,
        queue: &QueueRef,
        worker_token: &str,
        opts: &WorkerOptions,
        now_millis: i64,
    ) -> Result<MoveToActiveOutcome>;

    async fn move_to_completed(
        &self,
        queue: &QueueRef,
        job_id: &JobId,
        returnvalue: Value,
        worker_token: &str,
        now_millis: i64,
    ) -> Result<()>;

    async fn move_to_failed(
        &self,
        queue: &QueueRef,
        job_id: &JobId,
        reason: &str,
        stacktrace: Option<&str>,
        worker_token: &str,
        now_millis: i64,
    ) -> Result<FailOutcome>;

    async fn retry_job(&self, queue: &QueueRef, job_id: &JobId, reset_attempts: bool) -> Result<()>;

    async fn extend_lock(
        &self,
        queue: &QueueRef,
        job_id: &JobId,
        worker_token: &str,
        duration_ms: i64,
    ) -> Result<()>;

    async fn update_progress(&self, queue: &QueueRef, job_id: &JobId, progress: Value) -> Result<()>;

    async fn log(&self, queue: &QueueRef, job_id: &JobId, line: &str) -> Result<()>;

    // --- Scheduler-facing scripts ---

    async fn promote_delayed(&self, queue: &QueueRef, now_millis: i64) -> Result<PromoteOutcome>;

    async fn move_stalled_jobs(
        &self,
        queue: &QueueRef,
        max_stalled_count: u32,
        stalled_interval_ms: i64,
        now_millis: i64,
    ) -> Result<StalledOutcome>;

    // --- Read-only queries (spec.md 6) ---

    async fn get_job(&self, queue: &QueueRef, job_id: &JobId) -> Result<Option<Job>>;

    async fn get_job_logs(&self, queue: &QueueRef, job_id: &JobId, range: Range) -> Result<Vec<String>>;

    async fn get_job_counts(&self, queue: &QueueRef, types: &[JobState]) -> Result<HashMap<String, i64>>;

    async fn get_jobs(&self, queue: &QueueRef, state: JobState, range: Range) -> Result<Vec<Job>>;

    /// Subscribe to this queue's event channel (spec.md 4.7). Routing
    /// these raw envelopes to named user handlers is an external
    /// listener facade, out of scope for the core (spec.md 1).
    async fn subscribe_events(&self, queue: &QueueRef) -> Result<BoxStream<'static, JobEvent>>;

    /// Name of the queue this store handle targets; used for log context.
    fn queue_name(&self, queue: &QueueRef) -> QueueName {
        queue.name().to_string()
    }
}
