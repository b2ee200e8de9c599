use redis::aio::ConnectionManager;
use redis::Script;

use taskforge_core::error::{AppError, Result};

const SOURCE: &str = r#"
-- KEYS: [1] active [2] stalled [3] stalledCheck [4] wait [5] failed [6] events
-- ARGV: [1] nowMs [2] stalledIntervalMs [3] maxStalledCount [4] jobKeyPrefix
local active_key, stalled_key, stalled_check_key, wait_key, failed_key, events_key =
  KEYS[1], KEYS[2], KEYS[3], KEYS[4], KEYS[5], KEYS[6]
local now_ms, interval, max_stalled, job_prefix =
  tonumber(ARGV[1]), tonumber(ARGV[2]), tonumber(ARGV[3]), ARGV[4]

-- CAS: only the scheduler that flips the bucket performs this round's sweep.
local bucket = math.floor(now_ms / interval)
local last_bucket = tonumber(redis.call('GET', stalled_check_key))
if last_bucket == bucket then
  return { {}, {} }
end
redis.call('SET', stalled_check_key, bucket)

local previously_active = redis.call('SMEMBERS', stalled_key)
local recovered = {}
local failed_ids = {}

for _, job_id in ipairs(previously_active) do
  local job_key = job_prefix .. ':' .. job_id
  if redis.call('SISMEMBER', active_key, job_id) == 0 then
    goto continue
  end
  -- Only active members; LREM-based active list membership check:
  -- (we use a set snapshot, so presence here implies still active.)
  if redis.call('EXISTS', job_key .. ':lock') == 1 then
    goto continue
  end

  local counter = (tonumber(redis.call('HGET', job_key, 'stalledCounter')) or 0) + 1
  redis.call('HSET', job_key, 'stalledCounter', counter)

  if counter <= max_stalled then
    redis.call('LREM', active_key, 0, job_id)
    redis.call('HSET', job_key, 'state', 'waiting')
    -- Head-of-line reinsertion regardless of lifo/fifo: a recovered job
    -- jumps the queue (spec.md 4.1, moveStalledJobs).
    redis.call('LPUSH', wait_key, job_id)
    redis.call('PUBLISH', events_key, cjson.encode({ event = 'stalled', jobId = job_id }))
    table.insert(recovered, job_id)
  else
    redis.call('LREM', active_key, 0, job_id)
    redis.call('HSET', job_key, 'state', 'failed', 'failedReason', 'job stalled more than allowable limit', 'finishedOn', now_ms)
    redis.call('ZADD', failed_key, now_ms, job_id)
    redis.call('PUBLISH', events_key, cjson.encode({ event = 'failed', jobId = job_id, reason = 'job stalled more than allowable limit' }))
    table.insert(failed_ids, job_id)
  end
  ::continue::
end

-- Snapshot current active set for next round's comparison.
redis.call('DEL', stalled_key)
local current_active = redis.call('LRANGE', active_key, 0, -1)
if #current_active > 0 then
  redis.call('SADD', stalled_key, unpack(current_active))
end

return { recovered, failed_ids }
"#;

#[derive(Debug, Default)]
pub struct StalledReply {
    pub recovered: Vec<String>,
    pub failed: Vec<String>,
}

pub struct MoveStalledJobsScript(Script);

impl MoveStalledJobsScript {
    pub fn new() -> Self {
        Self(Script::new(SOURCE))
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn invoke(
        &self,
        conn: &mut ConnectionManager,
        active: &str,
        stalled: &str,
        stalled_check: &str,
        wait: &str,
        failed: &str,
        events: &str,
        now_millis: i64,
        stalled_interval_ms: i64,
        max_stalled_count: u32,
        job_prefix: &str,
    ) -> Result<StalledReply> {
        let (recovered, failed_ids): (Vec<String>, Vec<String>) = self
            .0
            .key(active)
            .key(stalled)
            .key(stalled_check)
            .key(wait)
            .key(failed)
            .key(events)
            .arg(now_millis)
            .arg(stalled_interval_ms)
            .arg(max_stalled_count)
            .arg(job_prefix)
            .invoke_async(conn)
            .await
            .map_err(|e| AppError::Script(format!("moveStalledJobs: {e}")))?;
        Ok(StalledReply {
            recovered,
            failed: failed_ids,
        })
    }
}

impl Default for MoveStalledJobsScript {
    fn default() -> Self {
        Self::new()
    }
}
