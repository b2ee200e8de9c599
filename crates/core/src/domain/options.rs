// Job and worker option bags (spec.md 9: dynamic option bags as explicit records)

use serde::{Deserialize, Serialize};

/// Backoff policy applied on retryable failure (spec.md 4.1, moveToFailed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// Constant delay between attempts.
    Fixed { delay_ms: i64 },
    /// `base * 2^(attemptsMade - 1)`.
    Exponential { base_delay_ms: i64 },
}

impl BackoffPolicy {
    /// Compute the delay in ms before the next attempt, given the attempt
    /// count already made (1-indexed, i.e. the attempt that just failed).
    pub fn delay_ms(&self, attempts_made: u32) -> i64 {
        match self {
            BackoffPolicy::Fixed { delay_ms } => *delay_ms,
            BackoffPolicy::Exponential { base_delay_ms } => {
                let exponent = attempts_made.saturating_sub(1);
                base_delay_ms.saturating_mul(1i64 << exponent.min(32))
            }
        }
    }
}

/// Retention policy for a finished job (spec.md 3.2: removeOnComplete/removeOnFail).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RemovePolicy {
    /// Keep the job hash and its entry in `completed`/`failed` forever
    /// (until an explicit `clean`).
    #[default]
    Keep,
    /// Delete the job hash immediately on transition.
    Always,
    /// Keep at most `count` ids (oldest trimmed) and/or ids newer than
    /// `max_age_ms`.
    Bounded {
        count: Option<u64>,
        max_age_ms: Option<i64>,
    },
}

/// Repeat-schedule specification (spec.md 4.2: producer resolves repeat
/// specs into a deterministic jobId).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepeatSpec {
    /// Cron-like or fixed-period expression; opaque to the core beyond
    /// being hashed into the repeat-job key.
    pub pattern: String,
    pub timezone: Option<String>,
    pub limit: Option<u32>,
}

/// Options accepted by `Producer::add`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOptions {
    /// Lower value = more urgent. Must be >= 1 (validated by the producer).
    pub priority: Option<u32>,
    /// Delay, in ms, before the job becomes runnable.
    pub delay: i64,
    /// Maximum attempts (>= 1).
    pub attempts: u32,
    pub backoff: Option<BackoffPolicy>,
    /// Caller-supplied job id; makes `add` idempotent (spec.md 4.1, I6/P6).
    pub job_id: Option<String>,
    pub remove_on_complete: RemovePolicy,
    pub remove_on_fail: RemovePolicy,
    /// Parent job id, when this job is a child in a flow.
    pub parent_key: Option<String>,
    pub repeat: Option<RepeatSpec>,
    /// Insert at the head of `wait` instead of the tail.
    pub lifo: bool,
    /// Caller-supplied creation timestamp override (ms); defaults to now.
    pub timestamp: Option<i64>,
    /// Number of stacktrace lines retained on failure.
    pub stack_trace_limit: u32,
    /// Whether a failing child should fail its waiting-children parent
    /// too (default) or leave it untouched (spec.md 4.1, moveToFailed).
    pub ignore_dependency_on_failure: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            priority: None,
            delay: 0,
            attempts: 1,
            backoff: None,
            job_id: None,
            remove_on_complete: RemovePolicy::default(),
            remove_on_fail: RemovePolicy::default(),
            parent_key: None,
            repeat: None,
            lifo: false,
            timestamp: None,
            stack_trace_limit: 10,
            ignore_dependency_on_failure: false,
        }
    }
}

/// Options accepted by a `Worker`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerOptions {
    pub concurrency: usize,
    pub lock_duration_ms: i64,
    pub lock_renew_time_ms: i64,
    pub stalled_interval_ms: i64,
    pub max_stalled_count: u32,
    pub drain_delay_ms: i64,
    pub limiter: Option<LimiterOptions>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        let lock_duration_ms = 30_000;
        Self {
            concurrency: 1,
            lock_duration_ms,
            lock_renew_time_ms: lock_duration_ms / 2,
            stalled_interval_ms: 30_000,
            max_stalled_count: 1,
            drain_delay_ms: 5,
            limiter: None,
        }
    }
}

/// Rate-limiter configuration (spec.md 4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterOptions {
    pub max: u64,
    pub duration_ms: i64,
    /// Field name in job `data` used to bucket the limiter per group.
    pub group_key: Option<String>,
    /// When true, the worker locally sleeps out the limiter window
    /// instead of returning the job to `delayed`.
    pub worker_delay: bool,
}
