// RedisStore: the production `QueueStore` (spec.md 4.1, 6).
//
// One store handle is shared (via `Arc`) across a `Producer`, any number
// of `Worker`s, and a `QueueScheduler` for a given queue - they reach it
// only through the `QueueStore` trait object, never concretely (ADR-001).
// Every state-mutating method below delegates to one compiled Lua
// script; only the read-only queries (`get_job`, `get_jobs`, ...) issue
// plain commands directly, since they touch no invariant a concurrent
// writer could race.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;
use taskforge_core::domain::{Job, JobEvent, JobId, JobOptions, JobState, QueueName, WorkerOptions};
use taskforge_core::error::{AppError, Result};
use taskforge_core::keys::QueueRef;
use taskforge_core::port::{
    AddJobOutcome, FailOutcome, MoveToActiveOutcome, PromoteOutcome, QueueStore, Range,
    StalledOutcome,
};

use crate::job_codec::decode_job;
use crate::scripts::{
    AddJobScript, CleanScript, DrainScript, ExtendLockScript, FailReply, MoveStalledJobsScript,
    MoveToActiveReply, MoveToActiveScript, MoveToCompletedScript, MoveToFailedScript,
    ObliterateScript, PauseScript, PromoteDelayedScript, RemoveScript, ResumeScript,
    RetryJobScript, UpdateProgressScript,
};

const DELAYED_PROMOTE_BATCH: u64 = 1000;

/// Shared-connection `QueueStore` backed by Redis. Cheap to clone: the
/// inner `ConnectionManager` multiplexes over one TCP connection and
/// auto-reconnects.
pub struct RedisStore {
    conn: ConnectionManager,
    pubsub_client: redis::Client,
    add_job: AddJobScript,
    remove: RemoveScript,
    drain: DrainScript,
    clean: CleanScript,
    obliterate: ObliterateScript,
    pause: PauseScript,
    resume: ResumeScript,
    move_to_active: MoveToActiveScript,
    move_to_completed: MoveToCompletedScript,
    move_to_failed: MoveToFailedScript,
    retry_job: RetryJobScript,
    extend_lock: ExtendLockScript,
    update_progress: UpdateProgressScript,
    promote_delayed: PromoteDelayedScript,
    move_stalled_jobs: MoveStalledJobsScript,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Arc<Self>> {
        let conn = crate::connection::connect(url).await?;
        let pubsub_client =
            redis::Client::open(url).map_err(|e| AppError::Store(format!("invalid redis url: {e}")))?;
        Ok(Arc::new(Self {
            conn,
            pubsub_client,
            add_job: AddJobScript::new(),
            remove: RemoveScript::new(),
            drain: DrainScript::new(),
            clean: CleanScript::new(),
            obliterate: ObliterateScript::new(),
            pause: PauseScript::new(),
            resume: ResumeScript::new(),
            move_to_active: MoveToActiveScript::new(),
            move_to_completed: MoveToCompletedScript::new(),
            move_to_failed: MoveToFailedScript::new(),
            retry_job: RetryJobScript::new(),
            extend_lock: ExtendLockScript::new(),
            update_progress: UpdateProgressScript::new(),
            promote_delayed: PromoteDelayedScript::new(),
            move_stalled_jobs: MoveStalledJobsScript::new(),
        }))
    }

    fn limiter_args(opts: &WorkerOptions) -> (u64, i64, String) {
        match &opts.limiter {
            Some(limiter) => (
                limiter.max,
                limiter.duration_ms,
                limiter.group_key.clone().unwrap_or_default(),
            ),
            None => (0, 0, String::new()),
        }
    }

    fn remove_policy_arg(policy: &taskforge_core::domain::RemovePolicy) -> String {
        use taskforge_core::domain::RemovePolicy;
        match policy {
            RemovePolicy::Keep => "keep".to_string(),
            RemovePolicy::Always => "always".to_string(),
            RemovePolicy::Bounded { count, .. } => count
                .map(|c| c.to_string())
                .unwrap_or_else(|| "keep".to_string()),
        }
    }
}

#[async_trait]
impl QueueStore for RedisStore {
    async fn add_job(
        &self,
        queue: &QueueRef,
        name: &str,
        data: Value,
        opts: JobOptions,
        now_millis: i64,
    ) -> Result<AddJobOutcome> {
        let data_json = serde_json::to_string(&data)?;
        let opts_json = serde_json::to_string(&opts)?;
        let job_id_arg = opts.job_id.clone().unwrap_or_default();

        let mut conn = self.conn.clone();
        let (id, created) = self
            .add_job
            .invoke(
                &mut conn,
                &queue.wait(),
                &queue.priority(),
                &queue.delayed(),
                &queue.waiting_children(),
                &queue.meta(),
                &queue.id_counter(),
                &queue.events(),
                &job_id_arg,
                name,
                &data_json,
                &opts_json,
                now_millis,
                &queue.job_key_prefix(),
                queue.name(),
            )
            .await?;
        drop(conn);

        let job = self
            .get_job(queue, &id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("addJob: job {id} missing immediately after write")))?;

        Ok(if created {
            AddJobOutcome::Created(job)
        } else {
            AddJobOutcome::Existing(job)
        })
    }

    async fn remove(&self, queue: &QueueRef, job_id: &JobId) -> Result<()> {
        let mut conn = self.conn.clone();
        self.remove
            .invoke(
                &mut conn,
                &queue.wait(),
                &queue.paused(),
                &queue.active(),
                &queue.delayed(),
                &queue.priority(),
                &queue.completed(),
                &queue.failed(),
                &queue.waiting_children(),
                job_id,
                &queue.job_key_prefix(),
            )
            .await
    }

    async fn drain(&self, queue: &QueueRef) -> Result<()> {
        let mut conn = self.conn.clone();
        self.drain
            .invoke(
                &mut conn,
                &queue.wait(),
                &queue.delayed(),
                &queue.priority(),
                &queue.events(),
                &queue.job_key_prefix(),
            )
            .await?;
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
        let status_key = match status {
            JobState::Completed => queue.completed(),
            JobState::Failed => queue.failed(),
            other => {
                return Err(AppError::Validation(format!(
                    "clean only supports completed/failed, got {other}"
                )))
            }
        };
        let mut conn = self.conn.clone();
        self.clean
            .invoke(
                &mut conn,
                &status_key,
                &queue.events(),
                now_millis - grace_ms,
                limit,
                &queue.job_key_prefix(),
                status.keyspace_suffix(),
            )
            .await
    }

    async fn obliterate(&self, queue: &QueueRef, force: bool) -> Result<()> {
        let keys = [
            queue.wait(),
            queue.paused(),
            queue.active(),
            queue.delayed(),
            queue.priority(),
            queue.completed(),
            queue.failed(),
            queue.waiting_children(),
            queue.stalled(),
            queue.stalled_check(),
            queue.id_counter(),
            queue.events(),
            queue.meta(),
            queue.repeat(),
        ];
        let key_refs: [&str; 14] = std::array::from_fn(|i| keys[i].as_str());
        let mut conn = self.conn.clone();
        self.obliterate
            .invoke(&mut conn, key_refs, force, &queue.key_pattern())
            .await
    }

    async fn pause(&self, queue: &QueueRef) -> Result<()> {
        let mut conn = self.conn.clone();
        self.pause
            .invoke(&mut conn, &queue.wait(), &queue.paused(), &queue.meta(), &queue.events())
            .await
    }

    async fn resume(&self, queue: &QueueRef) -> Result<()> {
        let mut conn = self.conn.clone();
        self.resume
            .invoke(&mut conn, &queue.wait(), &queue.paused(), &queue.meta(), &queue.events())
            .await
    }

    async fn is_paused(&self, queue: &QueueRef) -> Result<bool> {
        let mut conn = self.conn.clone();
        let flag: Option<String> = conn
            .hget(queue.meta(), "paused")
            .await
            .map_err(|e| AppError::Store(format!("is_paused: {e}")))?;
        Ok(flag.as_deref() == Some("1"))
    }

    async fn move_to_active(
        &self,
        queue: &QueueRef,
        worker_token: &str,
        opts: &WorkerOptions,
        now_millis: i64,
    ) -> Result<MoveToActiveOutcome> {
        let (limiter_max, limiter_duration_ms, group_field) = Self::limiter_args(opts);
        let mut conn = self.conn.clone();
        let reply = self
            .move_to_active
            .invoke(
                &mut conn,
                &queue.wait(),
                &queue.priority(),
                &queue.active(),
                &queue.delayed(),
                &queue.meta(),
                &queue.events(),
                &queue.limiter(),
                worker_token,
                opts.lock_duration_ms,
                now_millis,
                limiter_max,
                limiter_duration_ms,
                &group_field,
                &queue.job_key_prefix(),
            )
            .await?;
        drop(conn);

        Ok(match reply {
            MoveToActiveReply::Empty => MoveToActiveOutcome::Empty,
            MoveToActiveReply::Paused => MoveToActiveOutcome::Paused,
            MoveToActiveReply::RateLimited { delay_ms } => MoveToActiveOutcome::RateLimited { delay_ms },
            MoveToActiveReply::Claimed(job_id) => {
                let job = self.get_job(queue, &job_id).await?.ok_or_else(|| {
                    AppError::Internal(format!("moveToActive: job {job_id} missing after claim"))
                })?;
                MoveToActiveOutcome::Claimed(job)
            }
        })
    }

    async fn move_to_completed(
        &self,
        queue: &QueueRef,
        job_id: &JobId,
        returnvalue: Value,
        worker_token: &str,
        now_millis: i64,
    ) -> Result<()> {
        let returnvalue_json = serde_json::to_string(&returnvalue)?;
        let job = self
            .get_job(queue, job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(job_id.clone()))?;
        let remove_policy = Self::remove_policy_arg(&job.opts.remove_on_complete);

        let mut conn = self.conn.clone();
        self.move_to_completed
            .invoke(
                &mut conn,
                &queue.active(),
                &queue.completed(),
                &queue.events(),
                &queue.metrics("completed"),
                &queue.wait(),
                &queue.priority(),
                &queue.waiting_children(),
                job_id,
                &returnvalue_json,
                worker_token,
                now_millis,
                &queue.job_key_prefix(),
                &remove_policy,
            )
            .await?;
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
        let job = self
            .get_job(queue, job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(job_id.clone()))?;
        let remove_policy = Self::remove_policy_arg(&job.opts.remove_on_fail);

        let mut conn = self.conn.clone();
        let reply = self
            .move_to_failed
            .invoke(
                &mut conn,
                &queue.active(),
                &queue.wait(),
                &queue.priority(),
                &queue.delayed(),
                &queue.failed(),
                &queue.waiting_children(),
                &queue.events(),
                &queue.metrics("failed"),
                job_id,
                reason,
                stacktrace,
                worker_token,
                now_millis,
                &queue.job_key_prefix(),
                &remove_policy,
                job.opts.ignore_dependency_on_failure,
            )
            .await?;

        Ok(match reply {
            FailReply::Retrying { delay_ms } => FailOutcome::Retrying { delay_ms },
            FailReply::Failed => FailOutcome::Failed,
        })
    }

    async fn retry_job(&self, queue: &QueueRef, job_id: &JobId, reset_attempts: bool) -> Result<()> {
        let mut conn = self.conn.clone();
        self.retry_job
            .invoke(
                &mut conn,
                &queue.failed(),
                &queue.wait(),
                &queue.priority(),
                &queue.events(),
                job_id,
                &queue.job_key_prefix(),
                reset_attempts,
            )
            .await
    }

    async fn extend_lock(
        &self,
        queue: &QueueRef,
        job_id: &JobId,
        worker_token: &str,
        duration_ms: i64,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        self.extend_lock
            .invoke(&mut conn, &queue.job_lock(job_id), worker_token, duration_ms)
            .await
    }

    async fn update_progress(&self, queue: &QueueRef, job_id: &JobId, progress: Value) -> Result<()> {
        let progress_json = serde_json::to_string(&progress)?;
        let mut conn = self.conn.clone();
        self.update_progress
            .invoke(&mut conn, &queue.job(job_id), &queue.events(), job_id, &progress_json)
            .await
    }

    async fn log(&self, queue: &QueueRef, job_id: &JobId, line: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .rpush(queue.job_logs(job_id), line)
            .await
            .map_err(|e| AppError::Store(format!("log: {e}")))?;
        Ok(())
    }

    async fn promote_delayed(&self, queue: &QueueRef, now_millis: i64) -> Result<PromoteOutcome> {
        let mut conn = self.conn.clone();
        let (promoted, next_score) = self
            .promote_delayed
            .invoke(
                &mut conn,
                &queue.delayed(),
                &queue.wait(),
                &queue.priority(),
                &queue.events(),
                now_millis,
                &queue.job_key_prefix(),
                DELAYED_PROMOTE_BATCH,
            )
            .await?;
        Ok(PromoteOutcome { promoted, next_score })
    }

    async fn move_stalled_jobs(
        &self,
        queue: &QueueRef,
        max_stalled_count: u32,
        stalled_interval_ms: i64,
        now_millis: i64,
    ) -> Result<StalledOutcome> {
        let mut conn = self.conn.clone();
        let reply = self
            .move_stalled_jobs
            .invoke(
                &mut conn,
                &queue.active(),
                &queue.stalled(),
                &queue.stalled_check(),
                &queue.wait(),
                &queue.failed(),
                &queue.events(),
                now_millis,
                stalled_interval_ms,
                max_stalled_count,
                &queue.job_key_prefix(),
            )
            .await?;
        Ok(StalledOutcome {
            recovered: reply.recovered,
            failed: reply.failed,
        })
    }

    async fn get_job(&self, queue: &QueueRef, job_id: &JobId) -> Result<Option<Job>> {
        let mut conn = self.conn.clone();
        let map: HashMap<String, String> = conn
            .hgetall(queue.job(job_id))
            .await
            .map_err(|e| AppError::Store(format!("get_job: {e}")))?;
        if map.is_empty() {
            return Ok(None);
        }
        Ok(Some(decode_job(&map)?))
    }

    async fn get_job_logs(&self, queue: &QueueRef, job_id: &JobId, range: Range) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut lines: Vec<String> = conn
            .lrange(queue.job_logs(job_id), range.start as isize, range.end as isize)
            .await
            .map_err(|e| AppError::Store(format!("get_job_logs: {e}")))?;
        if !range.ascending {
            lines.reverse();
        }
        Ok(lines)
    }

    async fn get_job_counts(&self, queue: &QueueRef, types: &[JobState]) -> Result<HashMap<String, i64>> {
        let mut conn = self.conn.clone();
        let mut counts = HashMap::with_capacity(types.len());
        for state in types {
            let count: i64 = match state {
                JobState::Waiting => conn
                    .llen(queue.wait())
                    .await
                    .map_err(|e| AppError::Store(format!("get_job_counts: {e}")))?,
                JobState::Active => conn
                    .llen(queue.active())
                    .await
                    .map_err(|e| AppError::Store(format!("get_job_counts: {e}")))?,
                JobState::Delayed => conn
                    .zcard(queue.delayed())
                    .await
                    .map_err(|e| AppError::Store(format!("get_job_counts: {e}")))?,
                JobState::WaitingChildren => conn
                    .scard(queue.waiting_children())
                    .await
                    .map_err(|e| AppError::Store(format!("get_job_counts: {e}")))?,
                JobState::Completed => conn
                    .zcard(queue.completed())
                    .await
                    .map_err(|e| AppError::Store(format!("get_job_counts: {e}")))?,
                JobState::Failed => conn
                    .zcard(queue.failed())
                    .await
                    .map_err(|e| AppError::Store(format!("get_job_counts: {e}")))?,
            };
            counts.insert(state.to_string(), count);
        }
        Ok(counts)
    }

    async fn get_jobs(&self, queue: &QueueRef, state: JobState, range: Range) -> Result<Vec<Job>> {
        let mut conn = self.conn.clone();
        let mut ids: Vec<String> = match state {
            JobState::Waiting => {
                conn.lrange(queue.wait(), range.start as isize, range.end as isize)
                    .await
            }
            JobState::Active => {
                conn.lrange(queue.active(), range.start as isize, range.end as isize)
                    .await
            }
            JobState::Delayed => {
                conn.zrange(queue.delayed(), range.start as isize, range.end as isize)
                    .await
            }
            JobState::WaitingChildren => conn.smembers(queue.waiting_children()).await,
            JobState::Completed => {
                conn.zrange(queue.completed(), range.start as isize, range.end as isize)
                    .await
            }
            JobState::Failed => {
                conn.zrange(queue.failed(), range.start as isize, range.end as isize)
                    .await
            }
        }
        .map_err(|e| AppError::Store(format!("get_jobs: {e}")))?;

        if !range.ascending {
            ids.reverse();
        }
        drop(conn);

        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = self.get_job(queue, &id).await? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    async fn subscribe_events(&self, queue: &QueueRef) -> Result<BoxStream<'static, JobEvent>> {
        let channel = queue.events_channel();
        let mut pubsub = self
            .pubsub_client
            .get_async_pubsub()
            .await
            .map_err(|e| AppError::Store(format!("subscribe_events: {e}")))?;
        pubsub
            .subscribe(&channel)
            .await
            .map_err(|e| AppError::Store(format!("subscribe_events: {e}")))?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str::<JobEvent>(&payload).ok()
        });
        Ok(Box::pin(stream))
    }

    fn queue_name(&self, queue: &QueueRef) -> QueueName {
        queue.name().to_string()
    }
}
