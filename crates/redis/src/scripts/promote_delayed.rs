use redis::aio::ConnectionManager;
use redis::Script;

use super::PUSH_READY_HELPER;
use taskforge_core::error::{AppError, Result};

const SOURCE_TEMPLATE: &str = r#"
__PUSH_READY_HELPER__
-- KEYS: [1] delayed [2] wait [3] priority [4] events
-- ARGV: [1] nowMs [2] jobKeyPrefix [3] batchSize
local delayed_key, wait_key, priority_key, events_key = KEYS[1], KEYS[2], KEYS[3], KEYS[4]
local now_ms, job_prefix, batch_size = tonumber(ARGV[1]), ARGV[2], tonumber(ARGV[3])

local ids = redis.call('ZRANGEBYSCORE', delayed_key, '-inf', now_ms, 'LIMIT', 0, batch_size)
local promoted = 0

for _, job_id in ipairs(ids) do
  redis.call('ZREM', delayed_key, job_id)
  local job_key = job_prefix .. ':' .. job_id
  local opts_json = redis.call('HGET', job_key, 'opts')
  local lifo = false
  if opts_json then
    local ok, opts = pcall(cjson.decode, opts_json)
    if ok then lifo = opts.lifo and true or false end
  end
  redis.call('HSET', job_key, 'state', 'waiting', 'delay', 0)
  push_ready(wait_key, priority_key, job_key, job_id, lifo)
  redis.call('PUBLISH', events_key, cjson.encode({ event = 'waiting', jobId = job_id }))
  promoted = promoted + 1
end

local next_score = nil
local remaining = redis.call('ZRANGE', delayed_key, 0, 0, 'WITHSCORES')
if #remaining > 0 then
  next_score = tonumber(remaining[2])
end

return { promoted, next_score }
"#;

pub struct PromoteDelayedScript(Script);

impl PromoteDelayedScript {
    pub fn new() -> Self {
        let source = SOURCE_TEMPLATE.replace("__PUSH_READY_HELPER__", PUSH_READY_HELPER);
        Self(Script::new(&source))
    }

    pub async fn invoke(
        &self,
        conn: &mut ConnectionManager,
        delayed: &str,
        wait: &str,
        priority: &str,
        events: &str,
        now_millis: i64,
        job_prefix: &str,
        batch_size: u64,
    ) -> Result<(u64, Option<i64>)> {
        let (promoted, next_score): (u64, Option<i64>) = self
            .0
            .key(delayed)
            .key(wait)
            .key(priority)
            .key(events)
            .arg(now_millis)
            .arg(job_prefix)
            .arg(batch_size)
            .invoke_async(conn)
            .await
            .map_err(|e| AppError::Script(format!("promoteDelayed: {e}")))?;
        Ok((promoted, next_score))
    }
}

impl Default for PromoteDelayedScript {
    fn default() -> Self {
        Self::new()
    }
}
