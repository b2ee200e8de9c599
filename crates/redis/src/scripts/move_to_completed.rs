use redis::aio::ConnectionManager;
use redis::Script;

use super::PUSH_READY_HELPER;
use taskforge_core::error::{AppError, Result};

const SOURCE_TEMPLATE: &str = r#"
__PUSH_READY_HELPER__
-- KEYS: [1] active [2] completed [3] events [4] metricsCompleted [5] wait
--       [6] priority [7] waitingChildren
-- ARGV: [1] jobId [2] returnvalue(json) [3] token [4] nowMs [5] jobKeyPrefix
--       [6] removeOnComplete ('always'|'keep'|count)
local active_key, completed_key, events_key, metrics_key, wait_key, priority_key, waiting_children_key =
  KEYS[1], KEYS[2], KEYS[3], KEYS[4], KEYS[5], KEYS[6], KEYS[7]
local job_id, returnvalue, token, now_ms, job_prefix, remove_policy =
  ARGV[1], ARGV[2], ARGV[3], tonumber(ARGV[4]), ARGV[5], ARGV[6]

local job_key = job_prefix .. ':' .. job_id
local lock_key = job_key .. ':lock'

local owner = redis.call('GET', lock_key)
if owner ~= token then
  return { false, 'lock-mismatch' }
end

redis.call('LREM', active_key, 0, job_id)
redis.call('DEL', lock_key)
redis.call('HSET', job_key, 'state', 'completed', 'returnvalue', returnvalue, 'finishedOn', now_ms)

if remove_policy == 'always' then
  redis.call('DEL', job_key)
else
  redis.call('ZADD', completed_key, now_ms, job_id)
  if remove_policy ~= 'keep' and remove_policy ~= '' then
    local keep = tonumber(remove_policy)
    if keep then
      local total = redis.call('ZCARD', completed_key)
      if total > keep then
        local trim = redis.call('ZRANGE', completed_key, 0, total - keep - 1)
        for _, id in ipairs(trim) do
          redis.call('ZREM', completed_key, id)
          redis.call('DEL', job_prefix .. ':' .. id)
        end
      end
    end
  end
end

-- Resolve any parents waiting on this job (spec.md 4.1 moveToCompleted).
local parent_key = redis.call('HGET', job_key, 'parentKey')
if parent_key and parent_key ~= '' then
  local dep_key = job_prefix .. ':' .. parent_key .. ':dependencies'
  redis.call('SREM', dep_key, job_id)
  if redis.call('SCARD', dep_key) == 0 and redis.call('SREM', waiting_children_key, parent_key) == 1 then
    local parent_job_key = job_prefix .. ':' .. parent_key
    if redis.call('EXISTS', parent_job_key) == 1 then
      local parent_lifo = redis.call('HGET', parent_job_key, 'lifo') == '1'
      redis.call('HSET', parent_job_key, 'state', 'waiting')
      push_ready(wait_key, priority_key, parent_job_key, parent_key, parent_lifo)
      redis.call('PUBLISH', events_key, cjson.encode({ event = 'waiting', jobId = parent_key }))
    end
  end
end

redis.call('INCR', metrics_key)
redis.call('PUBLISH', events_key, cjson.encode({ event = 'completed', jobId = job_id }))

return { true, 'ok' }
"#;

pub struct MoveToCompletedScript(Script);

impl MoveToCompletedScript {
    pub fn new() -> Self {
        let source = SOURCE_TEMPLATE.replace("__PUSH_READY_HELPER__", PUSH_READY_HELPER);
        Self(Script::new(&source))
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn invoke(
        &self,
        conn: &mut ConnectionManager,
        active: &str,
        completed: &str,
        events: &str,
        metrics_completed: &str,
        wait: &str,
        priority: &str,
        waiting_children: &str,
        job_id: &str,
        returnvalue_json: &str,
        token: &str,
        now_millis: i64,
        job_prefix: &str,
        remove_policy: &str,
    ) -> Result<bool> {
        let (ok, _reason): (bool, String) = self
            .0
            .key(active)
            .key(completed)
            .key(events)
            .key(metrics_completed)
            .key(wait)
            .key(priority)
            .key(waiting_children)
            .arg(job_id)
            .arg(returnvalue_json)
            .arg(token)
            .arg(now_millis)
            .arg(job_prefix)
            .arg(remove_policy)
            .invoke_async(conn)
            .await
            .map_err(|e| AppError::Script(format!("moveToCompleted: {e}")))?;
        if !ok {
            return Err(AppError::LockMismatch);
        }
        Ok(ok)
    }
}

impl Default for MoveToCompletedScript {
    fn default() -> Self {
        Self::new()
    }
}
