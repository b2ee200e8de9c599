// Worker constants (no magic values scattered through the loop)
use std::time::Duration;

/// Sleep between `moveToActive` polls when nothing is runnable and the
/// store has no blocking-pop primitive wired up (fallback poll cadence).
pub const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Sleep after an unexpected store error before retrying the fetch loop.
pub const ERROR_RECOVERY_SLEEP: Duration = Duration::from_secs(1);

/// Default lock duration (ms) - see `WorkerOptions::default`.
pub const DEFAULT_LOCK_DURATION_MS: i64 = 30_000;

/// Default grace period workers wait for in-flight jobs to finish on
/// `close()` before abandoning them to stall recovery.
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(30);
