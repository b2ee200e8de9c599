//! In-memory `QueueStore` for exercising the state-machine contract
//! without a live Redis (spec.md 8: the testable properties P1-P12 are
//! store-agnostic - anything implementing `QueueStore` must satisfy
//! them). Gated behind the `test-util` feature, following the same
//! self-dependency pattern tokio's own `test-util` feature uses: the
//! crate depends on itself with the feature enabled so `#[cfg(test)]`
//! code elsewhere in the workspace can pull it in as an ordinary
//! dev-dependency.
//!
//! This is NOT a second implementation to keep in sync by hand: every
//! transition below mirrors the corresponding Lua script in
//! `taskforge-redis::scripts` one-to-one (same key containers, same
//! tie-breaking, same event names), just against `parking_lot`-guarded
//! Rust collections instead of a `redis::Script`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::domain::{EventKind, Job, JobEvent, JobId, JobOptions, JobPayload, JobState, QueueName, WorkerOptions};
use crate::error::{AppError, Result};
use crate::keys::QueueRef;
use crate::port::{
    AddJobOutcome, FailOutcome, MoveToActiveOutcome, PromoteOutcome, QueueStore, Range, StalledOutcome,
};

const EVENTS_CAPACITY: usize = 1024;

#[derive(Default)]
struct QueueData {
    wait: VecDeque<JobId>,
    paused_list: VecDeque<JobId>,
    active: VecDeque<JobId>,
    /// `(fire_time_ms, job_id)`, kept sorted ascending by score.
    delayed: Vec<(i64, JobId)>,
    /// `(priority, job_id)`, kept sorted ascending (lower = more urgent).
    priority: Vec<(u32, JobId)>,
    completed: Vec<(i64, JobId)>,
    failed: Vec<(i64, JobId)>,
    waiting_children: HashSet<JobId>,
    /// Snapshot of `active` at the last stall sweep (mirrors the Redis
    /// `stalled` set moveStalledJobs diffs against).
    stalled_snapshot: HashSet<JobId>,
    /// CAS bucket for the stall-check interval.
    stalled_check_bucket: Option<i64>,
    id_counter: u64,
    paused: bool,
    /// bucket key (`""` = default, else group value) -> (count, expires_at_ms)
    limiter_buckets: HashMap<String, (u64, i64)>,
    jobs: HashMap<JobId, Job>,
    /// job id -> (worker token, expires_at_ms)
    locks: HashMap<JobId, (String, i64)>,
    logs: HashMap<JobId, Vec<String>>,
    /// parent job id -> unresolved child ids
    dependencies: HashMap<JobId, HashSet<JobId>>,
    metrics_completed: u64,
    metrics_failed: u64,
}

impl QueueData {
    fn lock_alive(&self, job_id: &JobId, now_millis: i64) -> bool {
        self.locks
            .get(job_id)
            .map(|(_, expires_at)| *expires_at > now_millis)
            .unwrap_or(false)
    }

    /// Mirrors the Lua `push_ready` helper shared by every script that
    /// reinserts a job into the runnable set: priority wins outright
    /// over plain FIFO/LIFO (spec.md 4.1).
    fn push_ready(&mut self, job_id: &JobId, priority: u32, lifo: bool) {
        if priority > 0 {
            let pos = self.priority.partition_point(|(p, _)| *p <= priority);
            self.priority.insert(pos, (priority, job_id.clone()));
        } else if lifo {
            self.wait.push_front(job_id.clone());
        } else {
            self.wait.push_back(job_id.clone());
        }
    }

    fn remove_everywhere(&mut self, job_id: &JobId) {
        self.wait.retain(|id| id != job_id);
        self.paused_list.retain(|id| id != job_id);
        self.active.retain(|id| id != job_id);
        self.delayed.retain(|(_, id)| id != job_id);
        self.priority.retain(|(_, id)| id != job_id);
        self.completed.retain(|(_, id)| id != job_id);
        self.failed.retain(|(_, id)| id != job_id);
        self.waiting_children.remove(job_id);
    }
}

/// One in-process `QueueStore`: every queue name gets its own
/// `Mutex<QueueData>`, so contention across queues never serializes
/// (mirrors the Redis `{name}` hash-tag: each queue is its own shard).
pub struct InMemoryStore {
    queues: DashMap<QueueRef, Arc<Mutex<QueueData>>>,
    events: DashMap<QueueRef, broadcast::Sender<JobEvent>>,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            queues: DashMap::new(),
            events: DashMap::new(),
        })
    }

    fn data(&self, queue: &QueueRef) -> Arc<Mutex<QueueData>> {
        self.queues
            .entry(queue.clone())
            .or_insert_with(|| Arc::new(Mutex::new(QueueData::default())))
            .clone()
    }

    fn publish(&self, queue: &QueueRef, event: JobEvent) {
        let tx = self
            .events
            .entry(queue.clone())
            .or_insert_with(|| broadcast::channel(EVENTS_CAPACITY).0);
        let _ = tx.send(event);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            queues: DashMap::new(),
            events: DashMap::new(),
        }
    }
}

#[async_trait]
impl QueueStore for InMemoryStore {
    async fn add_job(
        &self,
        queue: &QueueRef,
        name: &str,
        data: Value,
        opts: JobOptions,
        now_millis: i64,
    ) -> Result<AddJobOutcome> {
        let data = JobPayload::new(data);
        let lock = self.data(queue);
        let mut q = lock.lock();

        if let Some(job_id) = &opts.job_id {
            if let Some(existing) = q.jobs.get(job_id) {
                return Ok(AddJobOutcome::Existing(existing.clone()));
            }
        }

        let job_id = opts.job_id.clone().unwrap_or_else(|| {
            q.id_counter += 1;
            q.id_counter.to_string()
        });

        let mut job = Job::new(job_id.clone(), name, queue.name(), data, opts.clone(), now_millis);

        if let Some(parent_key) = &opts.parent_key {
            q.dependencies
                .entry(parent_key.clone())
                .or_default()
                .insert(job_id.clone());
        }

        let event = if opts.delay > 0 {
            q.delayed.push((now_millis + opts.delay, job_id.clone()));
            q.delayed.sort_by_key(|(score, _)| *score);
            EventKind::Delayed
        } else {
            let pending_children = q
                .dependencies
                .get(&job_id)
                .map(|set| !set.is_empty())
                .unwrap_or(false);
            if pending_children {
                job.block_on_children();
                q.waiting_children.insert(job_id.clone());
                EventKind::Waiting
            } else {
                let priority = opts.priority.unwrap_or(0);
                q.push_ready(&job_id, priority, opts.lifo);
                EventKind::Waiting
            }
        };

        q.jobs.insert(job_id.clone(), job.clone());
        drop(q);
        self.publish(queue, JobEvent::new(event, job_id));
        Ok(AddJobOutcome::Created(job))
    }

    async fn remove(&self, queue: &QueueRef, job_id: &JobId) -> Result<()> {
        let lock = self.data(queue);
        let mut q = lock.lock();
        q.remove_everywhere(job_id);
        q.jobs.remove(job_id);
        q.locks.remove(job_id);
        q.logs.remove(job_id);
        q.dependencies.remove(job_id);
        Ok(())
    }

    async fn drain(&self, queue: &QueueRef) -> Result<()> {
        let lock = self.data(queue);
        let mut q = lock.lock();
        for id in q.wait.drain(..).collect::<Vec<_>>() {
            q.jobs.remove(&id);
        }
        for (_, id) in q.delayed.drain(..).collect::<Vec<_>>() {
            q.jobs.remove(&id);
        }
        q.priority.clear();
        drop(q);
        self.publish(queue, JobEvent::queue_level(EventKind::Drained));
        Ok(())
    }

    async fn clean(
        &self,
        queue: &QueueRef,
        grace_ms: i64,
        limit: u64,
        status: JobState,
        now_millis: i64,
    ) -> Result<Vec<JobId>> {
        let lock = self.data(queue);
        let mut q = lock.lock();
        let cutoff = now_millis - grace_ms;

        let set = match status {
            JobState::Completed => &mut q.completed,
            JobState::Failed => &mut q.failed,
            other => {
                return Err(AppError::Validation(format!(
                    "clean only supports completed/failed, got {other}"
                )))
            }
        };

        let mut removed = Vec::new();
        set.retain(|(score, id)| {
            if removed.len() < limit as usize && *score <= cutoff {
                removed.push(id.clone());
                false
            } else {
                true
            }
        });
        for id in &removed {
            q.jobs.remove(id);
        }
        drop(q);
        if !removed.is_empty() {
            self.publish(
                queue,
                JobEvent::queue_level(EventKind::Cleaned).with_metadata(serde_json::json!({
                    "count": removed.len(),
                    "status": status.keyspace_suffix(),
                })),
            );
        }
        Ok(removed)
    }

    async fn obliterate(&self, queue: &QueueRef, force: bool) -> Result<()> {
        let lock = self.data(queue);
        let q = lock.lock();
        if !q.active.is_empty() && !force {
            return Err(AppError::Validation(
                "cannot obliterate a queue with active jobs unless force=true".into(),
            ));
        }
        drop(q);
        self.queues.remove(queue);
        self.events.remove(queue);
        Ok(())
    }

    async fn pause(&self, queue: &QueueRef) -> Result<()> {
        let lock = self.data(queue);
        let mut q = lock.lock();
        if q.paused {
            return Ok(());
        }
        q.paused = true;
        q.paused_list = std::mem::take(&mut q.wait);
        drop(q);
        self.publish(queue, JobEvent::queue_level(EventKind::Paused));
        Ok(())
    }

    async fn resume(&self, queue: &QueueRef) -> Result<()> {
        let lock = self.data(queue);
        let mut q = lock.lock();
        if !q.paused {
            return Ok(());
        }
        q.paused = false;
        q.wait = std::mem::take(&mut q.paused_list);
        drop(q);
        self.publish(queue, JobEvent::queue_level(EventKind::Resumed));
        Ok(())
    }

    async fn is_paused(&self, queue: &QueueRef) -> Result<bool> {
        Ok(self.data(queue).lock().paused)
    }

    async fn move_to_active(
        &self,
        queue: &QueueRef,
        worker_token: &str,
        opts: &WorkerOptions,
        now_millis: i64,
    ) -> Result<MoveToActiveOutcome> {
        let lock = self.data(queue);
        let mut q = lock.lock();

        if q.paused {
            return Ok(MoveToActiveOutcome::Paused);
        }

        let job_id = if !q.priority.is_empty() {
            Some(q.priority.remove(0).1)
        } else {
            q.wait.pop_front()
        };
        let Some(job_id) = job_id else {
            return Ok(MoveToActiveOutcome::Empty);
        };

        if let Some(limiter) = &opts.limiter {
            let bucket_key = match &limiter.group_key {
                Some(field) => q
                    .jobs
                    .get(&job_id)
                    .and_then(|j| j.data.group_value(field))
                    .unwrap_or_default(),
                None => String::new(),
            };

            let entry = q.limiter_buckets.entry(bucket_key).or_insert((0, 0));
            if entry.1 <= now_millis {
                *entry = (0, now_millis + limiter.duration_ms);
            }
            entry.0 += 1;

            if entry.0 > limiter.max {
                let delay = (entry.1 - now_millis).max(0);
                q.delayed.push((now_millis + delay, job_id.clone()));
                q.delayed.sort_by_key(|(score, _)| *score);
                if let Some(job) = q.jobs.get_mut(&job_id) {
                    job.requeue_delayed(delay);
                }
                drop(q);
                self.publish(queue, JobEvent::new(EventKind::Delayed, job_id));
                return Ok(MoveToActiveOutcome::RateLimited { delay_ms: delay });
            }
        }

        q.active.push_back(job_id.clone());
        q.locks
            .insert(job_id.clone(), (worker_token.to_string(), now_millis + opts.lock_duration_ms));
        let job = q
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| AppError::Internal(format!("moveToActive: job {job_id} vanished")))?;
        job.start(now_millis)?;
        let claimed = job.clone();
        drop(q);
        self.publish(queue, JobEvent::new(EventKind::Active, job_id));
        Ok(MoveToActiveOutcome::Claimed(claimed))
    }

    async fn move_to_completed(
        &self,
        queue: &QueueRef,
        job_id: &JobId,
        returnvalue: Value,
        worker_token: &str,
        now_millis: i64,
    ) -> Result<()> {
        let lock = self.data(queue);
        let mut q = lock.lock();

        match q.locks.get(job_id) {
            Some((owner, _)) if owner == worker_token => {}
            _ => return Err(AppError::LockMismatch),
        }

        q.active.retain(|id| id != job_id);
        q.locks.remove(job_id);

        let remove_policy = q
            .jobs
            .get(job_id)
            .map(|j| j.opts.remove_on_complete.clone())
            .unwrap_or_default();

        {
            let job = q
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| AppError::NotFound(job_id.clone()))?;
            job.complete(returnvalue, now_millis)?;
        }

        use crate::domain::RemovePolicy;
        match remove_policy {
            RemovePolicy::Always => {
                q.jobs.remove(job_id);
            }
            RemovePolicy::Keep => {
                q.completed.push((now_millis, job_id.clone()));
            }
            RemovePolicy::Bounded { count, .. } => {
                q.completed.push((now_millis, job_id.clone()));
                if let Some(keep) = count {
                    q.completed.sort_by_key(|(score, _)| *score);
                    while q.completed.len() as u64 > keep {
                        let (_, trimmed) = q.completed.remove(0);
                        q.jobs.remove(&trimmed);
                    }
                }
            }
        }

        let parent_key = q.jobs.get(job_id).and_then(|j| j.parent_key.clone());
        let mut resolved_parent = None;
        if let Some(parent) = &parent_key {
            if let Some(deps) = q.dependencies.get_mut(parent) {
                deps.remove(job_id);
                if deps.is_empty() && q.waiting_children.remove(parent) {
                    if let Some(parent_job) = q.jobs.get_mut(parent) {
                        parent_job.requeue_waiting();
                        let priority = parent_job.opts.priority.unwrap_or(0);
                        let lifo = parent_job.opts.lifo;
                        q.push_ready(parent, priority, lifo);
                        resolved_parent = Some(parent.clone());
                    }
                }
            }
        }

        q.metrics_completed += 1;
        drop(q);
        self.publish(queue, JobEvent::new(EventKind::Completed, job_id.clone()));
        if let Some(parent) = resolved_parent {
            self.publish(queue, JobEvent::new(EventKind::Waiting, parent));
        }
        Ok(())
    }

    async fn move_to_failed(
        &self,
        queue: &QueueRef,
        job_id: &JobId,
        reason: &str,
        stacktrace: Option<&str>,
        worker_token: &str,
        now_millis: i64,
    ) -> Result<FailOutcome> {
        let lock = self.data(queue);
        let mut q = lock.lock();

        match q.locks.get(job_id) {
            Some((owner, _)) if owner == worker_token => {}
            _ => return Err(AppError::LockMismatch),
        }

        q.active.retain(|id| id != job_id);
        q.locks.remove(job_id);

        let (decision, ignore_dep, remove_policy) = {
            let job = q
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| AppError::NotFound(job_id.clone()))?;
            job.attempts_made += 1;
            let decision = crate::application::RetryPolicy::should_retry(job);
            (decision, job.opts.ignore_dependency_on_failure, job.opts.remove_on_fail.clone())
        };

        match decision {
            crate::application::RetryDecision::Retry { delay_ms } => {
                let job = q.jobs.get_mut(job_id).expect("job present");
                job.note_attempt(reason, stacktrace.map(str::to_string));
                if delay_ms > 0 {
                    job.requeue_delayed(delay_ms);
                    q.delayed.push((now_millis + delay_ms, job_id.clone()));
                    q.delayed.sort_by_key(|(score, _)| *score);
                } else {
                    let priority = job.opts.priority.unwrap_or(0);
                    let lifo = job.opts.lifo;
                    job.requeue_waiting();
                    q.push_ready(job_id, priority, lifo);
                }
                drop(q);
                let event = if delay_ms > 0 { EventKind::Delayed } else { EventKind::Waiting };
                self.publish(queue, JobEvent::new(event, job_id.clone()));
                Ok(FailOutcome::Retrying { delay_ms })
            }
            crate::application::RetryDecision::Exhausted => {
                {
                    let job = q.jobs.get_mut(job_id).expect("job present");
                    job.fail(reason, stacktrace.map(str::to_string), now_millis);
                }

                use crate::domain::RemovePolicy;
                if remove_policy == RemovePolicy::Always {
                    q.jobs.remove(job_id);
                } else {
                    q.failed.push((now_millis, job_id.clone()));
                }

                let parent_key = q.jobs.get(job_id).and_then(|j| j.parent_key.clone());
                let mut propagated = None;
                if let Some(parent) = parent_key.filter(|_| !ignore_dep) {
                    if q.waiting_children.remove(&parent) {
                        q.dependencies.remove(&parent);
                        if let Some(parent_job) = q.jobs.get_mut(&parent) {
                            parent_job.fail("parent failed", None, now_millis);
                        }
                        q.failed.push((now_millis, parent.clone()));
                        propagated = Some(parent);
                    }
                }

                q.metrics_failed += 1;
                drop(q);
                self.publish(
                    queue,
                    JobEvent::new(EventKind::Failed, job_id.clone())
                        .with_metadata(serde_json::json!({ "reason": reason })),
                );
                if let Some(parent) = propagated {
                    self.publish(
                        queue,
                        JobEvent::new(EventKind::Failed, parent)
                            .with_metadata(serde_json::json!({ "reason": "parent failed" })),
                    );
                }
                Ok(FailOutcome::Failed)
            }
        }
    }

    async fn retry_job(&self, queue: &QueueRef, job_id: &JobId, reset_attempts: bool) -> Result<()> {
        let lock = self.data(queue);
        let mut q = lock.lock();

        if !q.failed.iter().any(|(_, id)| id == job_id) {
            return Err(AppError::Domain(crate::domain::DomainError::InvalidStateTransition {
                from: "non-failed".into(),
                to: "waiting".into(),
            }));
        }
        q.failed.retain(|(_, id)| id != job_id);

        let (priority, lifo) = {
            let job = q
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| AppError::NotFound(job_id.clone()))?;
            job.retry(reset_attempts)?;
            (job.opts.priority.unwrap_or(0), job.opts.lifo)
        };
        q.push_ready(job_id, priority, lifo);
        drop(q);
        self.publish(queue, JobEvent::new(EventKind::Waiting, job_id.clone()));
        Ok(())
    }

    async fn extend_lock(
        &self,
        queue: &QueueRef,
        job_id: &JobId,
        worker_token: &str,
        duration_ms: i64,
    ) -> Result<()> {
        let lock = self.data(queue);
        let mut q = lock.lock();
        match q.locks.get_mut(job_id) {
            Some((owner, expires_at)) if owner == worker_token => {
                *expires_at = expires_at.max(0) + duration_ms;
                Ok(())
            }
            _ => Err(AppError::LockMismatch),
        }
    }

    async fn update_progress(&self, queue: &QueueRef, job_id: &JobId, progress: Value) -> Result<()> {
        let lock = self.data(queue);
        let mut q = lock.lock();
        let job = q.jobs.get_mut(job_id).ok_or_else(|| AppError::NotFound(job_id.clone()))?;
        job.update_progress(progress.clone());
        drop(q);
        self.publish(
            queue,
            JobEvent::new(EventKind::Progress, job_id.clone()).with_metadata(serde_json::json!({ "progress": progress })),
        );
        Ok(())
    }

    async fn log(&self, queue: &QueueRef, job_id: &JobId, line: &str) -> Result<()> {
        let lock = self.data(queue);
        let mut q = lock.lock();
        q.logs.entry(job_id.clone()).or_default().push(line.to_string());
        Ok(())
    }

    async fn promote_delayed(&self, queue: &QueueRef, now_millis: i64) -> Result<PromoteOutcome> {
        let lock = self.data(queue);
        let mut q = lock.lock();

        let split_at = q.delayed.partition_point(|(score, _)| *score <= now_millis);
        let ready: Vec<JobId> = q.delayed.drain(..split_at).map(|(_, id)| id).collect();
        let promoted = ready.len() as u64;

        for job_id in &ready {
            let (priority, lifo) = {
                let job = q.jobs.get_mut(job_id).expect("delayed job must exist");
                job.requeue_waiting();
                (job.opts.priority.unwrap_or(0), job.opts.lifo)
            };
            q.push_ready(job_id, priority, lifo);
        }

        let next_score = q.delayed.first().map(|(score, _)| *score);
        drop(q);
        for job_id in ready {
            self.publish(queue, JobEvent::new(EventKind::Waiting, job_id));
        }
        Ok(PromoteOutcome { promoted, next_score })
    }

    async fn move_stalled_jobs(
        &self,
        queue: &QueueRef,
        max_stalled_count: u32,
        stalled_interval_ms: i64,
        now_millis: i64,
    ) -> Result<StalledOutcome> {
        let lock = self.data(queue);
        let mut q = lock.lock();

        let bucket = now_millis / stalled_interval_ms.max(1);
        if q.stalled_check_bucket == Some(bucket) {
            return Ok(StalledOutcome::default());
        }
        q.stalled_check_bucket = Some(bucket);

        let candidates: Vec<JobId> = q.stalled_snapshot.iter().cloned().collect();
        let mut recovered = Vec::new();
        let mut failed = Vec::new();

        for job_id in candidates {
            if !q.active.contains(&job_id) {
                continue;
            }
            if q.lock_alive(&job_id, now_millis) {
                continue;
            }

            let counter = {
                let job = q.jobs.get_mut(&job_id).expect("stalled job must exist");
                job.stalled_counter += 1;
                job.stalled_counter
            };

            q.active.retain(|id| id != &job_id);
            if counter <= max_stalled_count {
                let job = q.jobs.get_mut(&job_id).expect("stalled job must exist");
                job.requeue_waiting();
                q.wait.push_front(job_id.clone());
                recovered.push(job_id.clone());
            } else {
                let job = q.jobs.get_mut(&job_id).expect("stalled job must exist");
                job.fail("job stalled more than allowable limit", None, now_millis);
                q.failed.push((now_millis, job_id.clone()));
                failed.push(job_id.clone());
            }
        }

        q.stalled_snapshot = q.active.iter().cloned().collect();
        drop(q);

        for job_id in &recovered {
            self.publish(queue, JobEvent::new(EventKind::Stalled, job_id.clone()));
        }
        for job_id in &failed {
            self.publish(
                queue,
                JobEvent::new(EventKind::Failed, job_id.clone())
                    .with_metadata(serde_json::json!({ "reason": "job stalled more than allowable limit" })),
            );
        }
        Ok(StalledOutcome { recovered, failed })
    }

    async fn get_job(&self, queue: &QueueRef, job_id: &JobId) -> Result<Option<Job>> {
        let lock = self.data(queue);
        let q = lock.lock();
        Ok(q.jobs.get(job_id).cloned())
    }

    async fn get_job_logs(&self, queue: &QueueRef, job_id: &JobId, range: Range) -> Result<Vec<String>> {
        let lock = self.data(queue);
        let q = lock.lock();
        let lines = q.logs.get(job_id).cloned().unwrap_or_default();
        let mut slice = slice_range(&lines, range.start, range.end);
        if !range.ascending {
            slice.reverse();
        }
        Ok(slice)
    }

    async fn get_job_counts(&self, queue: &QueueRef, types: &[JobState]) -> Result<HashMap<String, i64>> {
        let lock = self.data(queue);
        let q = lock.lock();
        let mut counts = HashMap::with_capacity(types.len());
        for state in types {
            let count = match state {
                JobState::Waiting => q.wait.len(),
                JobState::Active => q.active.len(),
                JobState::Delayed => q.delayed.len(),
                JobState::WaitingChildren => q.waiting_children.len(),
                JobState::Completed => q.completed.len(),
                JobState::Failed => q.failed.len(),
            };
            counts.insert(state.to_string(), count as i64);
        }
        Ok(counts)
    }

    async fn get_jobs(&self, queue: &QueueRef, state: JobState, range: Range) -> Result<Vec<Job>> {
        let lock = self.data(queue);
        let q = lock.lock();
        let mut ids: Vec<JobId> = match state {
            JobState::Waiting => q.wait.iter().cloned().collect(),
            JobState::Active => q.active.iter().cloned().collect(),
            JobState::Delayed => q.delayed.iter().map(|(_, id)| id.clone()).collect(),
            JobState::WaitingChildren => q.waiting_children.iter().cloned().collect(),
            JobState::Completed => q.completed.iter().map(|(_, id)| id.clone()).collect(),
            JobState::Failed => q.failed.iter().map(|(_, id)| id.clone()).collect(),
        };
        ids = slice_range(&ids, range.start, range.end);
        if !range.ascending {
            ids.reverse();
        }
        Ok(ids.into_iter().filter_map(|id| q.jobs.get(&id).cloned()).collect())
    }

    async fn subscribe_events(&self, queue: &QueueRef) -> Result<BoxStream<'static, JobEvent>> {
        let tx = self
            .events
            .entry(queue.clone())
            .or_insert_with(|| broadcast::channel(EVENTS_CAPACITY).0)
            .clone();
        let rx = tx.subscribe();
        let stream = stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(Box::pin(stream))
    }

    fn queue_name(&self, queue: &QueueRef) -> QueueName {
        queue.name().to_string()
    }
}

fn slice_range<T: Clone>(items: &[T], start: i64, end: i64) -> Vec<T> {
    let len = items.len() as i64;
    if len == 0 {
        return Vec::new();
    }
    let norm = |i: i64| -> i64 {
        if i < 0 {
            (len + i).max(0)
        } else {
            i.min(len - 1).max(0)
        }
    };
    let start = norm(start);
    let end = if end < 0 { (len + end).max(-1) } else { end.min(len - 1) };
    if end < start {
        return Vec::new();
    }
    items[start as usize..=(end as usize)].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BackoffPolicy, JobOptions, LimiterOptions};
    use serde_json::json;

    fn queue() -> QueueRef {
        QueueRef::with_prefix("test", "q")
    }

    #[tokio::test]
    async fn add_then_get_round_trips_data_and_opts() {
        let store = InMemoryStore::new();
        let q = queue();
        let opts = JobOptions {
            priority: Some(5),
            ..JobOptions::default()
        };
        let outcome = store
            .add_job(&q, "email", json!({"to": "a@b.com"}), opts.clone(), 1_000)
            .await
            .unwrap();
        let job = outcome.into_job();
        let fetched = store.get_job(&q, &job.id).await.unwrap().unwrap();
        assert_eq!(fetched.data.as_value(), &json!({"to": "a@b.com"}));
        assert_eq!(fetched.opts.priority, Some(5));
    }

    #[tokio::test]
    async fn add_job_with_fixed_id_is_idempotent() {
        let store = InMemoryStore::new();
        let q = queue();
        let opts = JobOptions {
            job_id: Some("fixed-1".into()),
            ..JobOptions::default()
        };
        let first = store.add_job(&q, "job", json!({"n": 1}), opts.clone(), 0).await.unwrap();
        let second = store.add_job(&q, "job", json!({"n": 2}), opts, 0).await.unwrap();
        assert!(matches!(first, AddJobOutcome::Created(_)));
        assert!(matches!(second, AddJobOutcome::Existing(_)));
        let job = second.into_job();
        // Second call must not have mutated the stored payload (P6).
        assert_eq!(job.data.as_value(), &json!({"n": 1}));
    }

    #[tokio::test]
    async fn move_to_active_then_complete_removes_job_from_active() {
        let store = InMemoryStore::new();
        let q = queue();
        let added = store.add_job(&q, "job", json!({}), JobOptions::default(), 0).await.unwrap();
        let job_id = added.into_job().id;

        let opts = WorkerOptions::default();
        let outcome = store.move_to_active(&q, "token-1", &opts, 100).await.unwrap();
        let claimed = match outcome {
            MoveToActiveOutcome::Claimed(job) => job,
            other => panic!("expected Claimed, got {other:?}"),
        };
        assert_eq!(claimed.id, job_id);

        store
            .move_to_completed(&q, &job_id, json!("ok"), "token-1", 200)
            .await
            .unwrap();

        let counts = store.get_job_counts(&q, &[JobState::Active, JobState::Completed]).await.unwrap();
        assert_eq!(counts["active"], 0);
        assert_eq!(counts["completed"], 1);
    }

    #[tokio::test]
    async fn completing_with_wrong_token_is_lock_mismatch() {
        let store = InMemoryStore::new();
        let q = queue();
        let added = store.add_job(&q, "job", json!({}), JobOptions::default(), 0).await.unwrap();
        let job_id = added.into_job().id;
        store
            .move_to_active(&q, "owner", &WorkerOptions::default(), 0)
            .await
            .unwrap();

        let err = store
            .move_to_completed(&q, &job_id, json!(null), "impostor", 10)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::LockMismatch));
    }

    #[tokio::test]
    async fn failed_job_retries_then_exhausts_to_failed() {
        let store = InMemoryStore::new();
        let q = queue();
        let opts = JobOptions {
            attempts: 2,
            backoff: Some(BackoffPolicy::Fixed { delay_ms: 0 }),
            ..JobOptions::default()
        };
        let added = store.add_job(&q, "job", json!({}), opts, 0).await.unwrap();
        let job_id = added.into_job().id;

        store.move_to_active(&q, "w", &WorkerOptions::default(), 0).await.unwrap();
        let first = store.move_to_failed(&q, &job_id, "boom", None, "w", 1).await.unwrap();
        assert!(matches!(first, FailOutcome::Retrying { .. }));

        store.move_to_active(&q, "w", &WorkerOptions::default(), 2).await.unwrap();
        let second = store.move_to_failed(&q, &job_id, "boom again", None, "w", 3).await.unwrap();
        assert!(matches!(second, FailOutcome::Failed));

        let job = store.get_job(&q, &job_id).await.unwrap().unwrap();
        assert!(job.is_failed());
        assert_eq!(job.failed_reason.as_deref(), Some("boom again"));
    }

    #[tokio::test]
    async fn retry_job_moves_failed_job_back_to_waiting() {
        let store = InMemoryStore::new();
        let q = queue();
        let opts = JobOptions {
            attempts: 1,
            ..JobOptions::default()
        };
        let added = store.add_job(&q, "job", json!({}), opts, 0).await.unwrap();
        let job_id = added.into_job().id;
        store.move_to_active(&q, "w", &WorkerOptions::default(), 0).await.unwrap();
        store.move_to_failed(&q, &job_id, "boom", None, "w", 1).await.unwrap();

        store.retry_job(&q, &job_id, false).await.unwrap();
        let job = store.get_job(&q, &job_id).await.unwrap().unwrap();
        assert!(job.is_waiting());
    }

    #[tokio::test]
    async fn priority_jobs_are_claimed_before_fifo_jobs() {
        let store = InMemoryStore::new();
        let q = queue();
        store.add_job(&q, "low", json!({}), JobOptions::default(), 0).await.unwrap();
        let urgent_opts = JobOptions {
            priority: Some(1),
            ..JobOptions::default()
        };
        let urgent = store.add_job(&q, "urgent", json!({}), urgent_opts, 0).await.unwrap().into_job();

        let claimed = store.move_to_active(&q, "w", &WorkerOptions::default(), 0).await.unwrap();
        match claimed {
            MoveToActiveOutcome::Claimed(job) => assert_eq!(job.id, urgent.id),
            other => panic!("expected Claimed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delayed_job_is_not_runnable_until_promoted() {
        let store = InMemoryStore::new();
        let q = queue();
        let opts = JobOptions {
            delay: 500,
            ..JobOptions::default()
        };
        store.add_job(&q, "job", json!({}), opts, 1_000).await.unwrap();

        let empty = store.move_to_active(&q, "w", &WorkerOptions::default(), 1_100).await.unwrap();
        assert!(matches!(empty, MoveToActiveOutcome::Empty));

        let promoted = store.promote_delayed(&q, 1_600).await.unwrap();
        assert_eq!(promoted.promoted, 1);

        let claimed = store.move_to_active(&q, "w", &WorkerOptions::default(), 1_700).await.unwrap();
        assert!(matches!(claimed, MoveToActiveOutcome::Claimed(_)));
    }

    #[tokio::test]
    async fn rate_limiter_defers_jobs_over_quota() {
        let store = InMemoryStore::new();
        let q = queue();
        store.add_job(&q, "a", json!({}), JobOptions::default(), 0).await.unwrap();
        store.add_job(&q, "b", json!({}), JobOptions::default(), 0).await.unwrap();

        let opts = WorkerOptions {
            limiter: Some(LimiterOptions {
                max: 1,
                duration_ms: 1_000,
                group_key: None,
                worker_delay: false,
            }),
            ..WorkerOptions::default()
        };

        let first = store.move_to_active(&q, "w", &opts, 0).await.unwrap();
        assert!(matches!(first, MoveToActiveOutcome::Claimed(_)));
        let second = store.move_to_active(&q, "w", &opts, 0).await.unwrap();
        assert!(matches!(second, MoveToActiveOutcome::RateLimited { .. }));
    }

    #[tokio::test]
    async fn missing_group_field_shares_default_bucket() {
        let store = InMemoryStore::new();
        let q = queue();
        store.add_job(&q, "a", json!({"other": 1}), JobOptions::default(), 0).await.unwrap();
        store.add_job(&q, "b", json!({"other": 2}), JobOptions::default(), 0).await.unwrap();

        let opts = WorkerOptions {
            limiter: Some(LimiterOptions {
                max: 1,
                duration_ms: 1_000,
                group_key: Some("tenant".into()),
                worker_delay: false,
            }),
            ..WorkerOptions::default()
        };

        let first = store.move_to_active(&q, "w", &opts, 0).await.unwrap();
        assert!(matches!(first, MoveToActiveOutcome::Claimed(_)));
        // Neither job carries `tenant`, so both share the default bucket
        // and the second is limited too (spec.md 4.4/9, open question b).
        let second = store.move_to_active(&q, "w", &opts, 0).await.unwrap();
        assert!(matches!(second, MoveToActiveOutcome::RateLimited { .. }));
    }

    #[tokio::test]
    async fn stalled_job_is_recovered_then_eventually_failed() {
        // Mirrors moveStalledJobs's one-interval detection lag (spec.md
        // 4.1): a sweep only flags jobs the *previous* sweep saw still
        // active, so catching the same job stalled twice takes four
        // sweeps, not two.
        let store = InMemoryStore::new();
        let q = queue();
        let added = store.add_job(&q, "job", json!({}), JobOptions::default(), 0).await.unwrap();
        let job_id = added.into_job().id;

        store.move_to_active(&q, "worker-1", &WorkerOptions::default(), 0).await.unwrap();

        // Sweep 1: establishes the baseline snapshot (job still locked).
        let sweep1 = store.move_stalled_jobs(&q, 1, 1_000, 1_000).await.unwrap();
        assert!(sweep1.recovered.is_empty() && sweep1.failed.is_empty());

        // Worker crashes without renewing the lock.
        {
            let lock = store.data(&q);
            lock.lock().locks.remove(&job_id);
        }

        // Sweep 2: job was in sweep 1's snapshot and its lock is gone - recovered.
        let sweep2 = store.move_stalled_jobs(&q, 1, 1_000, 2_000).await.unwrap();
        assert_eq!(sweep2.recovered, vec![job_id.clone()]);

        // Another worker reclaims it, then also crashes.
        store.move_to_active(&q, "worker-2", &WorkerOptions::default(), 2_000).await.unwrap();

        // Sweep 3: sweep 2's snapshot didn't include this job (it had just
        // been pulled out of `active`); nothing flagged, but this sweep's
        // own ending snapshot now captures the reclaim.
        let sweep3 = store.move_stalled_jobs(&q, 1, 1_000, 3_000).await.unwrap();
        assert!(sweep3.recovered.is_empty() && sweep3.failed.is_empty());

        {
            let lock = store.data(&q);
            lock.lock().locks.remove(&job_id);
        }

        // Sweep 4: second stall for the same job exceeds maxStalledCount=1.
        let sweep4 = store.move_stalled_jobs(&q, 1, 1_000, 4_000).await.unwrap();
        assert_eq!(sweep4.failed, vec![job_id]);
    }

    #[tokio::test]
    async fn pause_then_resume_restores_wait_order() {
        let store = InMemoryStore::new();
        let q = queue();
        store.add_job(&q, "a", json!({}), JobOptions::default(), 0).await.unwrap();
        store.pause(&q).await.unwrap();
        assert!(store.is_paused(&q).await.unwrap());

        let blocked = store.move_to_active(&q, "w", &WorkerOptions::default(), 0).await.unwrap();
        assert!(matches!(blocked, MoveToActiveOutcome::Paused));

        store.resume(&q).await.unwrap();
        assert!(!store.is_paused(&q).await.unwrap());
        let claimed = store.move_to_active(&q, "w", &WorkerOptions::default(), 0).await.unwrap();
        assert!(matches!(claimed, MoveToActiveOutcome::Claimed(_)));
    }

    #[tokio::test]
    async fn obliterate_refuses_when_active_non_empty_without_force() {
        let store = InMemoryStore::new();
        let q = queue();
        store.add_job(&q, "a", json!({}), JobOptions::default(), 0).await.unwrap();
        store.move_to_active(&q, "w", &WorkerOptions::default(), 0).await.unwrap();

        let err = store.obliterate(&q, false).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        store.obliterate(&q, true).await.unwrap();
        let counts = store.get_job_counts(&q, &[JobState::Active]).await.unwrap();
        assert_eq!(counts["active"], 0);
    }

    #[tokio::test]
    async fn child_completion_releases_waiting_children_parent() {
        let store = InMemoryStore::new();
        let q = queue();
        let parent_opts = JobOptions {
            job_id: Some("parent".into()),
            ..JobOptions::default()
        };
        // Parent is added after its child wires a dependency onto it, as
        // `FlowProducer` does (spec.md 4.6): pre-register the dependency,
        // then add the parent so `addJob` observes it non-empty.
        {
            let lock = store.data(&q);
            let mut data = lock.lock();
            data.dependencies.entry("parent".into()).or_default().insert("child".into());
        }
        store.add_job(&q, "parent-job", json!({}), parent_opts, 0).await.unwrap();

        let parent = store.get_job(&q, "parent").await.unwrap().unwrap();
        assert!(parent.is_waiting_children());

        let child_opts = JobOptions {
            job_id: Some("child".into()),
            parent_key: Some("parent".into()),
            ..JobOptions::default()
        };
        store.add_job(&q, "child-job", json!({}), child_opts, 0).await.unwrap();
        store.move_to_active(&q, "w", &WorkerOptions::default(), 0).await.unwrap();
        store
            .move_to_completed(&q, &"child".to_string(), json!(null), "w", 1)
            .await
            .unwrap();

        let parent = store.get_job(&q, "parent").await.unwrap().unwrap();
        assert!(parent.is_waiting());
    }
}
