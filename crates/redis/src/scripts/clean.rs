use redis::aio::ConnectionManager;
use redis::Script;

use taskforge_core::error::{AppError, Result};

const SOURCE: &str = r#"
-- KEYS: [1] statusSet [2] events
-- ARGV: [1] cutoffMs (now - grace) [2] limit [3] jobKeyPrefix [4] statusName
local status_key, events_key = KEYS[1], KEYS[2]
local cutoff, limit, job_prefix, status_name = tonumber(ARGV[1]), tonumber(ARGV[2]), ARGV[3], ARGV[4]

local ids = redis.call('ZRANGEBYSCORE', status_key, '-inf', cutoff, 'LIMIT', 0, limit)
for _, id in ipairs(ids) do
  redis.call('ZREM', status_key, id)
  redis.call('DEL', job_prefix .. ':' .. id)
end

if #ids > 0 then
  redis.call('PUBLISH', events_key, cjson.encode({ event = 'cleaned', count = #ids, status = status_name }))
end

return ids
"#;

pub struct CleanScript(Script);

impl CleanScript {
    pub fn new() -> Self {
        Self(Script::new(SOURCE))
    }

    pub async fn invoke(
        &self,
        conn: &mut ConnectionManager,
        status_set: &str,
        events: &str,
        cutoff_ms: i64,
        limit: u64,
        job_prefix: &str,
        status_name: &str,
    ) -> Result<Vec<String>> {
        self.0
            .key(status_set)
            .key(events)
            .arg(cutoff_ms)
            .arg(limit)
            .arg(job_prefix)
            .arg(status_name)
            .invoke_async(conn)
            .await
            .map_err(|e| AppError::Script(format!("clean: {e}")))
    }
}

impl Default for CleanScript {
    fn default() -> Self {
        Self::new()
    }
}
