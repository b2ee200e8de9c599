// Worker Loop (spec.md 4.3)

pub mod constants;
mod shutdown;

pub use shutdown::{
    pause_channel, shutdown_channel, PauseSender, PauseToken, ShutdownSender, ShutdownToken,
};

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

use constants::{ERROR_RECOVERY_SLEEP, IDLE_POLL_INTERVAL};

use crate::domain::{Job, JobId, WorkerOptions};
use crate::error::{AppError, Result};
use crate::keys::QueueRef;
use crate::port::{FailOutcome, IdProvider, MoveToActiveOutcome, QueueStore, TimeProvider};

use super::limiter::{self, LimiterReaction};

/// The user job-processing function. Returning `Err` drives the job's
/// retry policy (spec.md 7, `UserProcessorError`); the processor is
/// opaque to the core beyond this signature (spec.md 9, generic payload
/// typing is a surface concern).
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, job: &Job) -> std::result::Result<Value, String>;
}

/// Each worker holds one connection-backed store handle, one unique
/// token, a concurrency count, and lock timing (spec.md 4.3).
pub struct Worker {
    queue: QueueRef,
    store: Arc<dyn QueueStore>,
    processor: Arc<dyn Processor>,
    opts: WorkerOptions,
    token: String,
    time_provider: Arc<dyn TimeProvider>,
    pause_tx: PauseSender,
    pause_rx: PauseToken,
}

impl Worker {
    pub fn new(
        queue: QueueRef,
        store: Arc<dyn QueueStore>,
        processor: Arc<dyn Processor>,
        opts: WorkerOptions,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        let (pause_tx, pause_rx) = pause_channel();
        Self {
            queue,
            store,
            processor,
            opts,
            token: id_provider.generate_id(),
            time_provider,
            pause_tx,
            pause_rx,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Local pause: stops slots from claiming new jobs once they next poll
    /// `is_paused` (P2/P3). Returns immediately; any job already claimed
    /// keeps running to completion uninterrupted. Use `close` to actually
    /// wait for in-flight slots to drain.
    pub fn pause(&self) {
        self.pause_tx.pause();
    }

    pub fn resume(&self) {
        self.pause_tx.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.pause_tx.is_paused()
    }

    /// Run `concurrency` fetch/process slots until `shutdown` fires.
    pub async fn run(self: Arc<Self>, shutdown: ShutdownToken) {
        let mut handles = Vec::with_capacity(self.opts.concurrency);
        for slot in 0..self.opts.concurrency.max(1) {
            let worker = Arc::clone(&self);
            let shutdown = shutdown.clone();
            let pause = worker.pause_rx.clone();
            handles.push(tokio::spawn(async move {
                worker.run_slot(slot, shutdown, pause).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
        info!(queue = %self.queue.name(), "worker stopped");
    }

    async fn run_slot(&self, slot: usize, mut shutdown: ShutdownToken, mut pause: PauseToken) {
        info!(queue = %self.queue.name(), slot, "worker slot started");
        loop {
            if shutdown.is_shutdown() {
                break;
            }

            if pause.is_paused() {
                tokio::select! {
                    _ = pause.wait_until(false) => {}
                    _ = shutdown.wait() => break,
                }
                continue;
            }

            match self.fetch_and_process().await {
                Ok(true) => {}
                Ok(false) => {
                    tokio::select! {
                        _ = sleep(IDLE_POLL_INTERVAL) => {}
                        _ = shutdown.wait() => break,
                    }
                }
                Err(e) => {
                    error!(queue = %self.queue.name(), error = %e, "worker fetch/process error");
                    tokio::select! {
                        _ = sleep(ERROR_RECOVERY_SLEEP) => {}
                        _ = shutdown.wait() => break,
                    }
                }
            }
        }
        info!(queue = %self.queue.name(), slot, "worker slot stopped");
    }

    /// One iteration: fetch (or back off on pause/rate-limit), then run
    /// the processor and report the result. Returns `Ok(true)` if a job
    /// was processed.
    async fn fetch_and_process(&self) -> Result<bool> {
        let now = self.time_provider.now_millis();
        let outcome = self
            .store
            .move_to_active(&self.queue, &self.token, &self.opts, now)
            .await?;

        match outcome {
            MoveToActiveOutcome::Empty => Ok(false),
            MoveToActiveOutcome::Paused => {
                // No local blocking primitive across processes here; the
                // poll cadence substitutes for a blocking subscription to
                // `drain`/`resumed` (spec.md 4.3 step 2).
                Ok(false)
            }
            MoveToActiveOutcome::RateLimited { delay_ms } => {
                self.back_off_for_limiter(delay_ms).await;
                Ok(false)
            }
            MoveToActiveOutcome::Claimed(job) => {
                self.execute_claimed(job).await?;
                Ok(true)
            }
        }
    }

    async fn back_off_for_limiter(&self, delay_ms: i64) {
        let reaction = match &self.opts.limiter {
            Some(cfg) => limiter::react(cfg, delay_ms),
            None => LimiterReaction::BackOff { delay_ms },
        };
        match reaction {
            LimiterReaction::HoldSlot { delay_ms } => {
                sleep(Duration::from_millis(delay_ms.max(0) as u64)).await;
            }
            LimiterReaction::BackOff { delay_ms } => {
                let wait = delay_ms.min(self.opts.lock_renew_time_ms).max(0);
                sleep(Duration::from_millis(wait as u64)).await;
            }
        }
    }

    /// Launch the user processor, run a concurrent lock-renewal timer,
    /// and report completion/failure (spec.md 4.3 steps 4-5).
    async fn execute_claimed(&self, job: Job) -> Result<()> {
        let job_id = job.id.clone();
        info!(queue = %self.queue.name(), job_id = %job_id, name = %job.name, "processing job");

        let processor = Arc::clone(&self.processor);
        let job_for_exec = job.clone();
        let mut handle = tokio::spawn(async move { processor.process(&job_for_exec).await });

        let renew_every = Duration::from_millis(self.opts.lock_renew_time_ms.max(1) as u64);
        let mut renew_timer = tokio::time::interval(renew_every);
        renew_timer.tick().await; // lock was just minted; skip the immediate tick.

        let processor_result = loop {
            tokio::select! {
                result = &mut handle => break result,
                _ = renew_timer.tick() => {
                    match self.store.extend_lock(&self.queue, &job_id, &self.token, self.opts.lock_duration_ms).await {
                        Ok(()) => {}
                        Err(err) => {
                            warn!(queue = %self.queue.name(), job_id = %job_id, error = %err, "lock renewal failed, abandoning job to stall recovery");
                            handle.abort();
                            // Cooperative cancellation: we stop claiming
                            // the result. The store-side job is recovered
                            // by the stall detector (spec.md 5).
                            return Ok(());
                        }
                    }
                }
            }
        };

        let now = self.time_provider.now_millis();
        match processor_result {
            Ok(Ok(returnvalue)) => {
                self.store
                    .move_to_completed(&self.queue, &job_id, returnvalue, &self.token, now)
                    .await?;
                info!(queue = %self.queue.name(), job_id = %job_id, "job completed");
            }
            Ok(Err(reason)) => {
                self.report_failure(&job_id, &reason, None, now).await?;
            }
            Err(join_err) => {
                let reason = if join_err.is_panic() {
                    "processor panicked".to_string()
                } else {
                    "processor cancelled".to_string()
                };
                self.report_failure(&job_id, &reason, None, now).await?;
            }
        }
        Ok(())
    }

    async fn report_failure(
        &self,
        job_id: &JobId,
        reason: &str,
        stacktrace: Option<&str>,
        now: i64,
    ) -> Result<()> {
        let outcome = self
            .store
            .move_to_failed(&self.queue, job_id, reason, stacktrace, &self.token, now)
            .await?;
        match outcome {
            FailOutcome::Retrying { delay_ms } => {
                info!(queue = %self.queue.name(), job_id = %job_id, delay_ms, "job scheduled for retry");
            }
            FailOutcome::Failed => {
                warn!(queue = %self.queue.name(), job_id = %job_id, reason = %reason, "job failed permanently");
            }
        }
        Ok(())
    }

    /// Close the worker: stop fetching and wait for in-flight slots to
    /// drain, bounded by `grace`. `run_handle` is the `JoinHandle` returned
    /// by spawning `self.run(..)`, which only resolves once every slot has
    /// finished its current job (spec.md 4.3's Close contract). Returns an
    /// error if it hasn't resolved by the time `grace` elapses (caller
    /// decides whether to force-abort `run_handle`).
    pub async fn close(
        &self,
        shutdown: ShutdownSender,
        run_handle: JoinHandle<()>,
        grace: Duration,
    ) -> Result<()> {
        shutdown.shutdown();
        match tokio::time::timeout(grace, run_handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(join_err)) => Err(AppError::Internal(format!(
                "worker task ended abnormally during close: {join_err}"
            ))),
            Err(_) => Err(AppError::Internal(
                "worker close grace period elapsed with slots still active".into(),
            )),
        }
    }
}
