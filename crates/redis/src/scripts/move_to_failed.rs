use redis::aio::ConnectionManager;
use redis::Script;

use super::PUSH_READY_HELPER;
use taskforge_core::error::{AppError, Result};

const SOURCE_TEMPLATE: &str = r#"
__PUSH_READY_HELPER__
-- KEYS: [1] active [2] wait [3] priority [4] delayed [5] failed [6] waitingChildren
--       [7] events [8] metricsFailed
-- ARGV: [1] jobId [2] reason [3] stacktrace (may be '') [4] token [5] nowMs
--       [6] jobKeyPrefix [7] removeOnFail [8] ignoreDependencyOnFailure ('1'/'0')
local active_key, wait_key, priority_key, delayed_key, failed_key, waiting_children_key, events_key, metrics_key =
  KEYS[1], KEYS[2], KEYS[3], KEYS[4], KEYS[5], KEYS[6], KEYS[7], KEYS[8]
local job_id, reason, stacktrace, token, now_ms, job_prefix, remove_policy, ignore_dep =
  ARGV[1], ARGV[2], ARGV[3], ARGV[4], tonumber(ARGV[5]), ARGV[6], ARGV[7], ARGV[8]

local job_key = job_prefix .. ':' .. job_id
local lock_key = job_key .. ':lock'

local owner = redis.call('GET', lock_key)
if owner ~= token then
  return { false, 'lock-mismatch', 0 }
end

redis.call('LREM', active_key, 0, job_id)
redis.call('DEL', lock_key)

local attempts_made = (tonumber(redis.call('HGET', job_key, 'attemptsMade')) or 0) + 1
redis.call('HSET', job_key, 'attemptsMade', attempts_made, 'failedReason', reason)

if stacktrace and stacktrace ~= '' then
  local existing = redis.call('HGET', job_key, 'stacktrace')
  local trace = {}
  if existing then
    local ok, decoded = pcall(cjson.decode, existing)
    if ok then trace = decoded end
  end
  table.insert(trace, 1, stacktrace)
  redis.call('HSET', job_key, 'stacktrace', cjson.encode(trace))
end

local opts_json = redis.call('HGET', job_key, 'opts')
local opts = cjson.decode(opts_json)
local attempts = opts.attempts or 1

local will_retry = attempts_made < attempts
local delay = 0

if will_retry then
  if opts.backoff then
    if opts.backoff.type == 'fixed' then
      delay = opts.backoff.delay_ms or 0
    elseif opts.backoff.type == 'exponential' then
      local base = opts.backoff.base_delay_ms or 0
      local exponent = math.min(attempts_made - 1, 32)
      delay = base * (2 ^ exponent)
    end
  end

  if delay > 0 then
    redis.call('ZADD', delayed_key, now_ms + delay, job_id)
    redis.call('HSET', job_key, 'state', 'delayed', 'delay', delay)
    redis.call('PUBLISH', events_key, cjson.encode({ event = 'delayed', jobId = job_id }))
  else
    redis.call('HSET', job_key, 'state', 'waiting', 'delay', 0)
    push_ready(wait_key, priority_key, job_key, job_id, opts.lifo and true or false)
    redis.call('PUBLISH', events_key, cjson.encode({ event = 'waiting', jobId = job_id }))
  end
  return { true, 'retrying', delay }
end

redis.call('HSET', job_key, 'state', 'failed', 'finishedOn', now_ms)
if remove_policy == 'always' then
  redis.call('DEL', job_key)
else
  redis.call('ZADD', failed_key, now_ms, job_id)
end

-- Propagate failure to a waiting-children parent unless opted out.
local parent_key = redis.call('HGET', job_key, 'parentKey')
if parent_key and parent_key ~= '' and ignore_dep ~= '1' then
  local parent_job_key = job_prefix .. ':' .. parent_key
  if redis.call('SISMEMBER', waiting_children_key, parent_key) == 1 then
    redis.call('SREM', waiting_children_key, parent_key)
    redis.call('HSET', parent_job_key, 'state', 'failed', 'failedReason', 'parent failed', 'finishedOn', now_ms)
    redis.call('ZADD', failed_key, now_ms, parent_key)
    redis.call('PUBLISH', events_key, cjson.encode({ event = 'failed', jobId = parent_key, reason = 'parent failed' }))
  end
end

redis.call('INCR', metrics_key)
redis.call('PUBLISH', events_key, cjson.encode({ event = 'failed', jobId = job_id, reason = reason }))

return { true, 'failed', 0 }
"#;

pub enum FailReply {
    Retrying { delay_ms: i64 },
    Failed,
}

pub struct MoveToFailedScript(Script);

impl MoveToFailedScript {
    pub fn new() -> Self {
        let source = SOURCE_TEMPLATE.replace("__PUSH_READY_HELPER__", PUSH_READY_HELPER);
        Self(Script::new(&source))
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn invoke(
        &self,
        conn: &mut ConnectionManager,
        active: &str,
        wait: &str,
        priority: &str,
        delayed: &str,
        failed: &str,
        waiting_children: &str,
        events: &str,
        metrics_failed: &str,
        job_id: &str,
        reason: &str,
        stacktrace: Option<&str>,
        token: &str,
        now_millis: i64,
        job_prefix: &str,
        remove_policy: &str,
        ignore_dependency_on_failure: bool,
    ) -> Result<FailReply> {
        let (ok, status, delay_ms): (bool, String, i64) = self
            .0
            .key(active)
            .key(wait)
            .key(priority)
            .key(delayed)
            .key(failed)
            .key(waiting_children)
            .key(events)
            .key(metrics_failed)
            .arg(job_id)
            .arg(reason)
            .arg(stacktrace.unwrap_or(""))
            .arg(token)
            .arg(now_millis)
            .arg(job_prefix)
            .arg(remove_policy)
            .arg(if ignore_dependency_on_failure { "1" } else { "0" })
            .invoke_async(conn)
            .await
            .map_err(|e| AppError::Script(format!("moveToFailed: {e}")))?;

        if !ok {
            return Err(AppError::LockMismatch);
        }
        Ok(match status.as_str() {
            "retrying" => FailReply::Retrying { delay_ms },
            _ => FailReply::Failed,
        })
    }
}

impl Default for MoveToFailedScript {
    fn default() -> Self {
        Self::new()
    }
}
