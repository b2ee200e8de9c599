use redis::aio::ConnectionManager;
use redis::Script;

use super::PUSH_READY_HELPER;
use taskforge_core::error::{AppError, Result};

const SOURCE_TEMPLATE: &str = r#"
__PUSH_READY_HELPER__
-- KEYS: [1] failed [2] wait [3] priority [4] events
-- ARGV: [1] jobId [2] jobKeyPrefix [3] resetAttempts ('1'/'0')
local failed_key, wait_key, priority_key, events_key = KEYS[1], KEYS[2], KEYS[3], KEYS[4]
local job_id, job_prefix, reset_attempts = ARGV[1], ARGV[2], ARGV[3]

local job_key = job_prefix .. ':' .. job_id

if redis.call('ZSCORE', failed_key, job_id) == false then
  return { false, 'not-failed' }
end

redis.call('ZREM', failed_key, job_id)
if reset_attempts == '1' then
  redis.call('HSET', job_key, 'attemptsMade', '0')
end
redis.call('HSET', job_key, 'state', 'waiting', 'failedReason', '', 'finishedOn', '')

local opts_json = redis.call('HGET', job_key, 'opts')
local opts = cjson.decode(opts_json)
push_ready(wait_key, priority_key, job_key, job_id, opts.lifo and true or false)
redis.call('PUBLISH', events_key, cjson.encode({ event = 'waiting', jobId = job_id }))

return { true, 'ok' }
"#;

pub struct RetryJobScript(Script);

impl RetryJobScript {
    pub fn new() -> Self {
        let source = SOURCE_TEMPLATE.replace("__PUSH_READY_HELPER__", PUSH_READY_HELPER);
        Self(Script::new(&source))
    }

    pub async fn invoke(
        &self,
        conn: &mut ConnectionManager,
        failed: &str,
        wait: &str,
        priority: &str,
        events: &str,
        job_id: &str,
        job_prefix: &str,
        reset_attempts: bool,
    ) -> Result<()> {
        let (ok, _reason): (bool, String) = self
            .0
            .key(failed)
            .key(wait)
            .key(priority)
            .key(events)
            .arg(job_id)
            .arg(job_prefix)
            .arg(if reset_attempts { "1" } else { "0" })
            .invoke_async(conn)
            .await
            .map_err(|e| AppError::Script(format!("retryJob: {e}")))?;
        if !ok {
            return Err(AppError::Domain(
                taskforge_core::domain::DomainError::InvalidStateTransition {
                    from: "non-failed".into(),
                    to: "waiting".into(),
                },
            ));
        }
        Ok(())
    }
}

impl Default for RetryJobScript {
    fn default() -> Self {
        Self::new()
    }
}
