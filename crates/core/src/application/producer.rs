// Producer API (spec.md 4.2)

use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::domain::{Job, JobId, JobOptions, RepeatSpec};
use crate::error::{AppError, Result};
use crate::keys::QueueRef;
use crate::port::{AddJobOutcome, QueueStore, TimeProvider};

// Validation constants (no magic numbers scattered through the body).
const MAX_NAME_LEN: usize = 128;
const MAX_PAYLOAD_DEPTH: usize = 32;

/// Validated, atomic-enqueue facade over a `QueueStore` (spec.md 4.2).
///
/// Bulk-add wraps N calls without requiring cross-job atomicity (spec.md
/// 4.2).
pub struct Producer {
    store: Arc<dyn QueueStore>,
    queue: QueueRef,
    time_provider: Arc<dyn TimeProvider>,
}

impl Producer {
    pub fn new(store: Arc<dyn QueueStore>, queue: QueueRef, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            store,
            queue,
            time_provider,
        }
    }

    /// Enqueue a single job. Returns the resolved job id (stable across
    /// repeated calls when `opts.job_id` is set - P6).
    pub async fn add(&self, name: &str, data: Value, opts: JobOptions) -> Result<JobId> {
        validate_name(name)?;
        validate_opts(&opts)?;
        validate_payload_depth(&data, 0)?;

        let now = self.time_provider.now_millis();
        let outcome = self.store.add_job(&self.queue, name, data, opts, now).await?;
        let job = outcome.into_job();
        Ok(job.id)
    }

    /// Resolve a repeat-schedule spec into a deterministic job id (hash
    /// of pattern + timezone + name) and enqueue idempotently, so
    /// repeated scheduler ticks for the same schedule never duplicate
    /// (spec.md 4.2).
    pub async fn add_repeatable(
        &self,
        name: &str,
        data: Value,
        mut opts: JobOptions,
        repeat: RepeatSpec,
    ) -> Result<JobId> {
        let rjk = repeat_job_key(name, &repeat);
        opts.job_id = Some(rjk);
        opts.repeat = Some(repeat);
        self.add(name, data, opts).await
    }

    /// Bulk-add. Not atomic across jobs - a failure partway through
    /// leaves earlier adds committed (spec.md 4.2).
    pub async fn add_bulk(&self, jobs: Vec<(String, Value, JobOptions)>) -> Result<Vec<JobId>> {
        let mut ids = Vec::with_capacity(jobs.len());
        for (name, data, opts) in jobs {
            ids.push(self.add(&name, data, opts).await?);
        }
        Ok(ids)
    }

    pub async fn remove(&self, job_id: &JobId) -> Result<()> {
        self.store.remove(&self.queue, job_id).await
    }

    pub async fn drain(&self) -> Result<()> {
        self.store.drain(&self.queue).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.store.pause(&self.queue).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.store.resume(&self.queue).await
    }

    pub async fn is_paused(&self) -> Result<bool> {
        self.store.is_paused(&self.queue).await
    }

    pub async fn obliterate(&self, force: bool) -> Result<()> {
        self.store.obliterate(&self.queue, force).await
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(AppError::Validation("job name cannot be empty".into()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(AppError::Validation(format!(
            "job name too long (max {MAX_NAME_LEN} chars, got {})",
            name.len()
        )));
    }
    Ok(())
}

fn validate_opts(opts: &JobOptions) -> Result<()> {
    if let Some(priority) = opts.priority {
        if priority == 0 {
            return Err(AppError::Validation("priority must be >= 1".into()));
        }
    }
    if opts.delay < 0 {
        return Err(AppError::Validation("delay must be >= 0".into()));
    }
    if opts.attempts == 0 {
        return Err(AppError::Validation("attempts must be >= 1".into()));
    }
    Ok(())
}

/// Prevents stack-overflow-by-payload for deeply nested JSON.
fn validate_payload_depth(value: &Value, depth: usize) -> Result<()> {
    if depth > MAX_PAYLOAD_DEPTH {
        return Err(AppError::Validation(format!(
            "payload too deeply nested (max depth {MAX_PAYLOAD_DEPTH})"
        )));
    }
    match value {
        Value::Array(items) => {
            for item in items {
                validate_payload_depth(item, depth + 1)?;
            }
        }
        Value::Object(map) => {
            for v in map.values() {
                validate_payload_depth(v, depth + 1)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Deterministic job id for a repeat-schedule tick: same pattern + tz +
/// name always hashes to the same id, so re-resolving a schedule is
/// idempotent (spec.md 4.2).
fn repeat_job_key(name: &str, repeat: &RepeatSpec) -> String {
    let seed = format!(
        "{name}:{}:{}",
        repeat.pattern,
        repeat.timezone.as_deref().unwrap_or("UTC")
    );
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    format!("repeat:{:x}", hasher.finish())
}
