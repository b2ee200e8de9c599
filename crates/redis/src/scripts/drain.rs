use redis::aio::ConnectionManager;
use redis::Script;

use taskforge_core::error::{AppError, Result};

const SOURCE: &str = r#"
-- KEYS: [1] wait [2] delayed [3] priority [4] events [5] jobKeyPrefix(as plain string via ARGV)
-- ARGV: [1] jobKeyPrefix
local wait_key, delayed_key, priority_key, events_key = KEYS[1], KEYS[2], KEYS[3], KEYS[4]
local job_prefix = ARGV[1]

local waiting_ids = redis.call('LRANGE', wait_key, 0, -1)
local delayed_ids = redis.call('ZRANGE', delayed_key, 0, -1)

for _, id in ipairs(waiting_ids) do
  redis.call('DEL', job_prefix .. ':' .. id)
end
for _, id in ipairs(delayed_ids) do
  redis.call('DEL', job_prefix .. ':' .. id)
end

redis.call('DEL', wait_key)
redis.call('DEL', delayed_key)
redis.call('DEL', priority_key)
redis.call('PUBLISH', events_key, cjson.encode({ event = 'drained' }))

return #waiting_ids + #delayed_ids
"#;

pub struct DrainScript(Script);

impl DrainScript {
    pub fn new() -> Self {
        Self(Script::new(SOURCE))
    }

    pub async fn invoke(
        &self,
        conn: &mut ConnectionManager,
        wait: &str,
        delayed: &str,
        priority: &str,
        events: &str,
        job_prefix: &str,
    ) -> Result<u64> {
        self.0
            .key(wait)
            .key(delayed)
            .key(priority)
            .key(events)
            .arg(job_prefix)
            .invoke_async(conn)
            .await
            .map_err(|e| AppError::Script(format!("drain: {e}")))
    }
}

impl Default for DrainScript {
    fn default() -> Self {
        Self::new()
    }
}
