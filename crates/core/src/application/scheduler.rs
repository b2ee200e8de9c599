// Scheduler Loop (spec.md 4.5)
//
// Any number of scheduler instances may run against the same queue; the
// store-side scripts are the only mutators, so concurrent schedulers
// racing each other is safe by construction rather than by leader
// election (spec.md 5).

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::Result;
use crate::keys::QueueRef;
use crate::port::{PromoteOutcome, QueueStore, StalledOutcome, TimeProvider};

use super::worker::ShutdownToken;

const MAX_PROMOTE_WAIT: Duration = Duration::from_secs(5);

/// Drives two independent timers against a queue: delayed-job promotion
/// and stalled-job recovery.
pub struct QueueScheduler {
    queue: QueueRef,
    store: Arc<dyn QueueStore>,
    time_provider: Arc<dyn TimeProvider>,
    stalled_interval_ms: i64,
    max_stalled_count: u32,
}

impl QueueScheduler {
    pub fn new(
        queue: QueueRef,
        store: Arc<dyn QueueStore>,
        time_provider: Arc<dyn TimeProvider>,
        stalled_interval_ms: i64,
        max_stalled_count: u32,
    ) -> Self {
        Self {
            queue,
            store,
            time_provider,
            stalled_interval_ms,
            max_stalled_count,
        }
    }

    /// Run both timers until `shutdown` fires. On construction-adjacent
    /// startup an immediate stall sweep runs before the periodic loop
    /// begins, recovering jobs orphaned by a crash while no scheduler was
    /// alive to recover them on schedule.
    pub async fn run(self: Arc<Self>, shutdown: ShutdownToken) {
        if let Err(e) = self.sweep_stalled().await {
            warn!(queue = %self.queue.name(), error = %e, "startup stall sweep failed");
        }

        let promote = {
            let scheduler = Arc::clone(&self);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { scheduler.run_promotion_loop(shutdown).await })
        };
        let stall = {
            let scheduler = Arc::clone(&self);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { scheduler.run_stall_loop(shutdown).await })
        };

        let _ = promote.await;
        let _ = stall.await;
    }

    async fn run_promotion_loop(&self, mut shutdown: ShutdownToken) {
        loop {
            if shutdown.is_shutdown() {
                return;
            }

            let next_score = match self.sweep_delayed().await {
                Ok(outcome) => outcome.next_score,
                Err(e) => {
                    warn!(queue = %self.queue.name(), error = %e, "delayed promotion failed");
                    None
                }
            };

            let wait = match next_score {
                Some(score) => {
                    let now = self.time_provider.now_millis();
                    let delta = (score - now).max(0) as u64;
                    Duration::from_millis(delta).min(MAX_PROMOTE_WAIT)
                }
                None => MAX_PROMOTE_WAIT,
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.wait() => return,
            }
        }
    }

    async fn run_stall_loop(&self, mut shutdown: ShutdownToken) {
        let interval = Duration::from_millis(self.stalled_interval_ms.max(1) as u64);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.wait() => return,
            }
            if shutdown.is_shutdown() {
                return;
            }
            if let Err(e) = self.sweep_stalled().await {
                warn!(queue = %self.queue.name(), error = %e, "stalled sweep failed");
            }
        }
    }

    async fn sweep_delayed(&self) -> Result<PromoteOutcome> {
        let now = self.time_provider.now_millis();
        let outcome = self.store.promote_delayed(&self.queue, now).await?;
        if outcome.promoted > 0 {
            info!(queue = %self.queue.name(), promoted = outcome.promoted, "promoted delayed jobs");
        }
        Ok(outcome)
    }

    async fn sweep_stalled(&self) -> Result<StalledOutcome> {
        let now = self.time_provider.now_millis();
        let outcome = self
            .store
            .move_stalled_jobs(&self.queue, self.max_stalled_count, self.stalled_interval_ms, now)
            .await?;
        if !outcome.recovered.is_empty() || !outcome.failed.is_empty() {
            warn!(
                queue = %self.queue.name(),
                recovered = outcome.recovered.len(),
                failed = outcome.failed.len(),
                "stall recovery swept jobs"
            );
        }
        Ok(outcome)
    }
}
