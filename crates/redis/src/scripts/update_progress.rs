use redis::aio::ConnectionManager;
use redis::Script;

use taskforge_core::error::{AppError, Result};

const SOURCE: &str = r#"
-- KEYS: [1] job [2] events
-- ARGV: [1] jobId [2] progress (json)
local job_key, events_key = KEYS[1], KEYS[2]
local job_id, progress = ARGV[1], ARGV[2]

if redis.call('EXISTS', job_key) == 0 then
  return 0
end

redis.call('HSET', job_key, 'progress', progress)
redis.call('PUBLISH', events_key, cjson.encode({ event = 'progress', jobId = job_id, progress = cjson.decode(progress) }))
return 1
"#;

pub struct UpdateProgressScript(Script);

impl UpdateProgressScript {
    pub fn new() -> Self {
        Self(Script::new(SOURCE))
    }

    pub async fn invoke(
        &self,
        conn: &mut ConnectionManager,
        job: &str,
        events: &str,
        job_id: &str,
        progress_json: &str,
    ) -> Result<()> {
        let found: i64 = self
            .0
            .key(job)
            .key(events)
            .arg(job_id)
            .arg(progress_json)
            .invoke_async(conn)
            .await
            .map_err(|e| AppError::Script(format!("updateProgress: {e}")))?;
        if found == 0 {
            return Err(AppError::NotFound(job_id.to_string()));
        }
        Ok(())
    }
}

impl Default for UpdateProgressScript {
    fn default() -> Self {
        Self::new()
    }
}
