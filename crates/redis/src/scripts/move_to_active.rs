use redis::aio::ConnectionManager;
use redis::Script;

use taskforge_core::error::{AppError, Result};

const SOURCE: &str = r#"
-- KEYS: [1] wait [2] priority [3] active [4] delayed [5] meta [6] events [7] limiterDefault
-- ARGV: [1] workerToken [2] lockDurationMs [3] nowMs [4] limiterMax (0 = disabled)
--       [5] limiterDurationMs [6] groupKeyField ('' = ungrouped) [7] jobKeyPrefix
local wait_key, priority_key, active_key, delayed_key, meta_key, events_key, limiter_default_key =
  KEYS[1], KEYS[2], KEYS[3], KEYS[4], KEYS[5], KEYS[6], KEYS[7]
local token, lock_duration, now_ms, limiter_max, limiter_duration, group_field, job_prefix =
  ARGV[1], tonumber(ARGV[2]), tonumber(ARGV[3]), tonumber(ARGV[4]), tonumber(ARGV[5]), ARGV[6], ARGV[7]

if redis.call('HGET', meta_key, 'paused') == '1' then
  return { false, 'paused', 0 }
end

local job_id = nil
local ids = redis.call('ZRANGE', priority_key, 0, 0)
if #ids > 0 then
  job_id = ids[1]
  redis.call('ZREM', priority_key, job_id)
else
  job_id = redis.call('LPOP', wait_key)
end

if not job_id then
  return { false, 'empty', 0 }
end

local job_key = job_prefix .. ':' .. job_id

if limiter_max > 0 then
  local bucket_key = limiter_default_key
  if group_field ~= '' then
    local data = redis.call('HGET', job_key, 'data')
    if data then
      local ok, decoded = pcall(cjson.decode, data)
      if ok and decoded[group_field] ~= nil then
        bucket_key = limiter_default_key .. ':' .. tostring(decoded[group_field])
      end
    end
  end

  local count = redis.call('INCR', bucket_key)
  if count == 1 then
    redis.call('PEXPIRE', bucket_key, limiter_duration)
  end

  if count > limiter_max then
    local delay = redis.call('PTTL', bucket_key)
    if delay < 0 then delay = limiter_duration end
    redis.call('ZADD', delayed_key, now_ms + delay, job_id)
    redis.call('HSET', job_key, 'state', 'delayed', 'delay', delay)
    redis.call('PUBLISH', events_key, cjson.encode({ event = 'delayed', jobId = job_id }))
    return { false, 'rate-limited', delay }
  end
end

redis.call('LPUSH', active_key, job_id)
redis.call('SET', job_key .. ':lock', token, 'PX', lock_duration)
redis.call('HSET', job_key, 'state', 'active', 'processedOn', now_ms)
redis.call('PUBLISH', events_key, cjson.encode({ event = 'active', jobId = job_id }))

return { true, job_id, 0 }
"#;

pub struct MoveToActiveScript(Script);

pub enum MoveToActiveReply {
    Claimed(String),
    Paused,
    RateLimited { delay_ms: i64 },
    Empty,
}

impl MoveToActiveScript {
    pub fn new() -> Self {
        Self(Script::new(SOURCE))
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn invoke(
        &self,
        conn: &mut ConnectionManager,
        wait: &str,
        priority: &str,
        active: &str,
        delayed: &str,
        meta: &str,
        events: &str,
        limiter_default: &str,
        token: &str,
        lock_duration_ms: i64,
        now_millis: i64,
        limiter_max: u64,
        limiter_duration_ms: i64,
        group_key_field: &str,
        job_prefix: &str,
    ) -> Result<MoveToActiveReply> {
        let (claimed, payload, delay_ms): (bool, String, i64) = self
            .0
            .key(wait)
            .key(priority)
            .key(active)
            .key(delayed)
            .key(meta)
            .key(events)
            .key(limiter_default)
            .arg(token)
            .arg(lock_duration_ms)
            .arg(now_millis)
            .arg(limiter_max)
            .arg(limiter_duration_ms)
            .arg(group_key_field)
            .arg(job_prefix)
            .invoke_async(conn)
            .await
            .map_err(|e| AppError::Script(format!("moveToActive: {e}")))?;

        Ok(if claimed {
            MoveToActiveReply::Claimed(payload)
        } else {
            match payload.as_str() {
                "paused" => MoveToActiveReply::Paused,
                "rate-limited" => MoveToActiveReply::RateLimited { delay_ms },
                _ => MoveToActiveReply::Empty,
            }
        })
    }
}

impl Default for MoveToActiveScript {
    fn default() -> Self {
        Self::new()
    }
}
