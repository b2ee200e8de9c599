// Script Library (spec.md 4.1): one dedicated wrapper per atomic
// operation, each owning its compiled `redis::Script`. Grounded in the
// per-operation script-struct pattern (`EnqueueScript`, `GetJobScript`,
// `StartWorkScript`, ...) rather than one monolithic dispatcher.

mod add_job;
mod clean;
mod drain;
mod extend_lock;
mod move_stalled_jobs;
mod move_to_active;
mod move_to_completed;
mod move_to_failed;
mod obliterate;
mod pause_resume;
mod promote_delayed;
mod remove;
mod retry_job;
mod update_progress;

pub use add_job::AddJobScript;
pub use clean::CleanScript;
pub use drain::DrainScript;
pub use extend_lock::ExtendLockScript;
pub use move_stalled_jobs::{MoveStalledJobsScript, StalledReply};
pub use move_to_active::{MoveToActiveReply, MoveToActiveScript};
pub use move_to_completed::MoveToCompletedScript;
pub use move_to_failed::{FailReply, MoveToFailedScript};
pub use obliterate::ObliterateScript;
pub use pause_resume::{PauseScript, ResumeScript};
pub use promote_delayed::PromoteDelayedScript;
pub use remove::RemoveScript;
pub use retry_job::RetryJobScript;
pub use update_progress::UpdateProgressScript;

/// Lua helper shared by every script that needs to push a ready job into
/// either the priority zset or the plain FIFO/LIFO wait list.
pub(crate) const PUSH_READY_HELPER: &str = r#"
local function push_ready(wait_key, priority_key, job_key, job_id, lifo)
  local priority = tonumber(redis.call('HGET', job_key, 'priority') or '0') or 0
  if priority > 0 then
    redis.call('ZADD', priority_key, priority, job_id)
  elseif lifo then
    redis.call('LPUSH', wait_key, job_id)
  else
    redis.call('RPUSH', wait_key, job_id)
  end
end
"#;
