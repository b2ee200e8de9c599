// Job Domain Model (spec.md 3.2)

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{DomainError, Result};
use super::options::JobOptions;
use super::state::JobState;

/// Job ID, unique within a queue. For grouped rate-limited jobs the id
/// is suffixed `:{groupKey}` (spec.md 3.2).
pub type JobId = String;

/// Queue identifier (name only; the `{prefix}` lives in `QueueRef`).
pub type QueueName = String;

/// Opaque job payload. The core never interprets this beyond passing it
/// to the user processor and, for rate-limit grouping, reading one
/// top-level field named by `LimiterOptions::group_key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload(Value);

impl JobPayload {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Extract a group-key field for rate-limiter bucketing (spec.md 4.4).
    /// Absent field => no grouping, per the documented contract (spec.md
    /// 9, open question (b)): callers must not treat `None` as an error.
    pub fn group_value(&self, field: &str) -> Option<String> {
        match &self.0 {
            Value::Object(map) => map.get(field).map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
            _ => None,
        }
    }
}

/// Job Entity (spec.md 3.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub queue: QueueName,
    pub data: JobPayload,
    pub opts: JobOptions,

    pub state: JobState,

    pub progress: Value,
    pub attempts_made: u32,
    pub returnvalue: Option<Value>,
    pub failed_reason: Option<String>,
    pub stacktrace: Vec<String>,

    pub timestamp: i64,
    pub delay: i64,
    pub processed_on: Option<i64>,
    pub finished_on: Option<i64>,

    /// Parent's job id, when this job belongs to a flow.
    pub parent_key: Option<String>,
    /// Repeat-job key, when created by a repeat-schedule tick.
    pub rjk: Option<String>,

    /// Number of consecutive times this job has been recovered by the
    /// stall detector (spec.md 4.1, moveStalledJobs's `stalledCounter`).
    pub stalled_counter: u32,
}

impl Job {
    /// Construct a freshly-enqueued job. Id and timestamp are injected
    /// (never generated here) so producers stay deterministic under test.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        queue: impl Into<String>,
        data: JobPayload,
        opts: JobOptions,
        now_millis: i64,
    ) -> Self {
        let timestamp = opts.timestamp.unwrap_or(now_millis);
        let delay = opts.delay;
        let parent_key = opts.parent_key.clone();
        // Child jobs start waiting regardless of their parent's state;
        // waiting-children gating applies only to the *parent* (spec.md 4.6).
        let state = if delay > 0 { JobState::Delayed } else { JobState::Waiting };

        Self {
            id: id.into(),
            name: name.into(),
            queue: queue.into(),
            data,
            opts,
            state,
            progress: Value::Null,
            attempts_made: 0,
            returnvalue: None,
            failed_reason: None,
            stacktrace: Vec::new(),
            timestamp,
            delay,
            processed_on: None,
            finished_on: None,
            parent_key,
            rjk: None,
            stalled_counter: 0,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state == JobState::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.state == JobState::Failed
    }

    pub fn is_delayed(&self) -> bool {
        self.state == JobState::Delayed
    }

    pub fn is_active(&self) -> bool {
        self.state == JobState::Active
    }

    pub fn is_waiting(&self) -> bool {
        self.state == JobState::Waiting
    }

    pub fn is_waiting_children(&self) -> bool {
        self.state == JobState::WaitingChildren
    }

    pub fn get_state(&self) -> JobState {
        self.state
    }

    /// Transition to Active with explicit timestamp (moveToActive).
    pub fn start(&mut self, now_millis: i64) -> Result<()> {
        if !matches!(self.state, JobState::Waiting | JobState::Delayed) {
            return Err(DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: JobState::Active.to_string(),
            });
        }
        self.state = JobState::Active;
        self.processed_on = Some(now_millis);
        Ok(())
    }

    /// Transition to Completed (moveToCompleted).
    pub fn complete(&mut self, returnvalue: Value, now_millis: i64) -> Result<()> {
        if self.state != JobState::Active {
            return Err(DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: JobState::Completed.to_string(),
            });
        }
        self.state = JobState::Completed;
        self.returnvalue = Some(returnvalue);
        self.finished_on = Some(now_millis);
        Ok(())
    }

    /// Transition to Failed, recording reason and a bounded stacktrace
    /// (moveToFailed, terminal case).
    pub fn fail(&mut self, reason: impl Into<String>, trace: Option<String>, now_millis: i64) {
        self.note_attempt(reason, trace);
        self.state = JobState::Failed;
        self.finished_on = Some(now_millis);
    }

    /// Record a failed attempt's reason and stacktrace without changing
    /// state (moveToFailed writes these on every failure, retryable or
    /// not, before branching on whether the job retries or terminates).
    pub fn note_attempt(&mut self, reason: impl Into<String>, trace: Option<String>) {
        self.failed_reason = Some(reason.into());
        if let Some(line) = trace {
            self.stacktrace.insert(0, line);
            let limit = self.opts.stack_trace_limit.max(1) as usize;
            self.stacktrace.truncate(limit);
        }
    }

    /// Move back to Delayed for backoff-scheduled retry.
    pub fn requeue_delayed(&mut self, delay_ms: i64) {
        self.state = JobState::Delayed;
        self.delay = delay_ms;
        self.processed_on = None;
    }

    /// Move back to Waiting for immediate retry.
    pub fn requeue_waiting(&mut self) {
        self.state = JobState::Waiting;
        self.delay = 0;
        self.processed_on = None;
    }

    /// Gate behind unmet children (addJob / addFlow).
    pub fn block_on_children(&mut self) {
        self.state = JobState::WaitingChildren;
    }

    /// Release from Failed back to Waiting (retryJob).
    pub fn retry(&mut self, reset_attempts: bool) -> Result<()> {
        if self.state != JobState::Failed {
            return Err(DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: JobState::Waiting.to_string(),
            });
        }
        if reset_attempts {
            self.attempts_made = 0;
        }
        self.state = JobState::Waiting;
        self.failed_reason = None;
        self.finished_on = None;
        Ok(())
    }

    pub fn update_progress(&mut self, progress: Value) {
        self.progress = progress;
    }
}
