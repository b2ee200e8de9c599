use redis::aio::ConnectionManager;
use redis::Script;

use taskforge_core::error::{AppError, Result};

const SOURCE: &str = r#"
-- KEYS: [1] wait [2] paused [3] active [4] delayed [5] priority [6] completed
--       [7] failed [8] waitingChildren
-- ARGV: [1] jobId [2] jobKeyPrefix
local wait_key, paused_key, active_key, delayed_key, priority_key, completed_key, failed_key, waiting_children_key =
  KEYS[1], KEYS[2], KEYS[3], KEYS[4], KEYS[5], KEYS[6], KEYS[7], KEYS[8]
local job_id, job_prefix = ARGV[1], ARGV[2]

redis.call('LREM', wait_key, 0, job_id)
redis.call('LREM', paused_key, 0, job_id)
redis.call('LREM', active_key, 0, job_id)
redis.call('ZREM', delayed_key, job_id)
redis.call('ZREM', priority_key, job_id)
redis.call('ZREM', completed_key, job_id)
redis.call('ZREM', failed_key, job_id)
redis.call('SREM', waiting_children_key, job_id)

local job_key = job_prefix .. ':' .. job_id
redis.call('DEL', job_key, job_key .. ':lock', job_key .. ':logs', job_key .. ':dependencies')

return 1
"#;

pub struct RemoveScript(Script);

impl RemoveScript {
    pub fn new() -> Self {
        Self(Script::new(SOURCE))
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn invoke(
        &self,
        conn: &mut ConnectionManager,
        wait: &str,
        paused: &str,
        active: &str,
        delayed: &str,
        priority: &str,
        completed: &str,
        failed: &str,
        waiting_children: &str,
        job_id: &str,
        job_prefix: &str,
    ) -> Result<()> {
        self.0
            .key(wait)
            .key(paused)
            .key(active)
            .key(delayed)
            .key(priority)
            .key(completed)
            .key(failed)
            .key(waiting_children)
            .arg(job_id)
            .arg(job_prefix)
            .invoke_async::<i64>(conn)
            .await
            .map_err(|e| AppError::Script(format!("remove: {e}")))?;
        Ok(())
    }
}

impl Default for RemoveScript {
    fn default() -> Self {
        Self::new()
    }
}
