use redis::aio::ConnectionManager;
use redis::Script;

use taskforge_core::error::{AppError, Result};

use super::PUSH_READY_HELPER;

const SOURCE_TEMPLATE: &str = r#"
__PUSH_READY_HELPER__
-- KEYS: [1] wait [2] priority [3] delayed [4] waitingChildren [5] meta [6] idCounter [7] events
-- ARGV: [1] jobId ('' = autogenerate) [2] name [3] data(json) [4] opts(json)
--       [5] nowMs [6] prefix [7] queueName
local wait_key, priority_key, delayed_key, waiting_children_key, meta_key, id_counter_key, events_key =
  KEYS[1], KEYS[2], KEYS[3], KEYS[4], KEYS[5], KEYS[6], KEYS[7]
local job_id, name, data, opts_json, now_ms, prefix, queue_name =
  ARGV[1], ARGV[2], ARGV[3], ARGV[4], tonumber(ARGV[5]), ARGV[6], ARGV[7]

if job_id == '' then
  job_id = tostring(redis.call('INCR', id_counter_key))
end

local job_key = prefix .. ':' .. job_id

if redis.call('EXISTS', job_key) == 1 then
  return { job_id, 0 }
end

local opts = cjson.decode(opts_json)
local priority = opts.priority or 0
local lifo = opts.lifo and true or false
local delay = opts.delay or 0
local parent_key = opts.parent_key or ''
local rjk = opts.repeat and job_id or ''

redis.call('HSET', job_key,
  'id', job_id,
  'name', name,
  'queueName', queue_name,
  'data', data,
  'opts', opts_json,
  'progress', 'null',
  'attemptsMade', '0',
  'stacktrace', '[]',
  'timestamp', tostring(now_ms),
  'delay', tostring(delay),
  'stalledCounter', '0',
  'parentKey', parent_key,
  'rjk', rjk,
  'failedReason', '',
  'priority', tostring(priority),
  'lifo', lifo and '1' or '0'
)

if parent_key ~= '' then
  redis.call('SADD', prefix .. ':' .. parent_key .. ':dependencies', job_id)
end

local state
if delay > 0 then
  state = 'delayed'
  redis.call('ZADD', delayed_key, now_ms + delay, job_id)
else
  local pending_children = redis.call('SCARD', job_key .. ':dependencies')
  if pending_children > 0 then
    state = 'waiting-children'
    redis.call('SADD', waiting_children_key, job_id)
  else
    state = 'waiting'
    push_ready(wait_key, priority_key, job_key, job_id, lifo)
  end
end

redis.call('HSET', job_key, 'state', state)
redis.call('PUBLISH', events_key, cjson.encode({ event = state, jobId = job_id }))

return { job_id, 1 }
"#;

pub struct AddJobScript(Script);

impl AddJobScript {
    pub fn new() -> Self {
        let source = SOURCE_TEMPLATE.replace("__PUSH_READY_HELPER__", PUSH_READY_HELPER);
        Self(Script::new(&source))
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn invoke(
        &self,
        conn: &mut ConnectionManager,
        wait: &str,
        priority: &str,
        delayed: &str,
        waiting_children: &str,
        meta: &str,
        id_counter: &str,
        events: &str,
        job_id: &str,
        name: &str,
        data_json: &str,
        opts_json: &str,
        now_millis: i64,
        prefix: &str,
        queue_name: &str,
    ) -> Result<(String, bool)> {
        let (id, created): (String, i64) = self
            .0
            .key(wait)
            .key(priority)
            .key(delayed)
            .key(waiting_children)
            .key(meta)
            .key(id_counter)
            .key(events)
            .arg(job_id)
            .arg(name)
            .arg(data_json)
            .arg(opts_json)
            .arg(now_millis)
            .arg(prefix)
            .arg(queue_name)
            .invoke_async(conn)
            .await
            .map_err(|e| AppError::Script(format!("addJob: {e}")))?;
        Ok((id, created == 1))
    }
}

impl Default for AddJobScript {
    fn default() -> Self {
        Self::new()
    }
}
