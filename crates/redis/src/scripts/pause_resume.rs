use redis::aio::ConnectionManager;
use redis::Script;

use taskforge_core::error::{AppError, Result};

// `RENAME` errors when the source key doesn't exist (an empty queue has
// no `wait` list yet); guard it so pause/resume on an empty queue still
// flips the `meta` flag atomically.
const PAUSE_SOURCE: &str = r#"
-- KEYS: [1] wait [2] paused [3] meta [4] events
if redis.call('HGET', KEYS[3], 'paused') == '1' then
  return 0
end
if redis.call('EXISTS', KEYS[1]) == 1 then
  redis.call('RENAME', KEYS[1], KEYS[2])
end
redis.call('HSET', KEYS[3], 'paused', '1')
redis.call('PUBLISH', KEYS[4], cjson.encode({ event = 'paused' }))
return 1
"#;

const RESUME_SOURCE: &str = r#"
-- KEYS: [1] wait [2] paused [3] meta [4] events
if redis.call('HGET', KEYS[3], 'paused') ~= '1' then
  return 0
end
if redis.call('EXISTS', KEYS[2]) == 1 then
  redis.call('RENAME', KEYS[2], KEYS[1])
end
redis.call('HSET', KEYS[3], 'paused', '0')
redis.call('PUBLISH', KEYS[4], cjson.encode({ event = 'resumed' }))
return 1
"#;

pub struct PauseScript(Script);

impl PauseScript {
    pub fn new() -> Self {
        Self(Script::new(PAUSE_SOURCE))
    }

    pub async fn invoke(
        &self,
        conn: &mut ConnectionManager,
        wait: &str,
        paused: &str,
        meta: &str,
        events: &str,
    ) -> Result<()> {
        self.0
            .key(wait)
            .key(paused)
            .key(meta)
            .key(events)
            .invoke_async::<i64>(conn)
            .await
            .map_err(|e| AppError::Script(format!("pause: {e}")))?;
        Ok(())
    }
}

impl Default for PauseScript {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ResumeScript(Script);

impl ResumeScript {
    pub fn new() -> Self {
        Self(Script::new(RESUME_SOURCE))
    }

    pub async fn invoke(
        &self,
        conn: &mut ConnectionManager,
        wait: &str,
        paused: &str,
        meta: &str,
        events: &str,
    ) -> Result<()> {
        self.0
            .key(wait)
            .key(paused)
            .key(meta)
            .key(events)
            .invoke_async::<i64>(conn)
            .await
            .map_err(|e| AppError::Script(format!("resume: {e}")))?;
        Ok(())
    }
}

impl Default for ResumeScript {
    fn default() -> Self {
        Self::new()
    }
}
