use redis::aio::ConnectionManager;
use redis::Script;

use taskforge_core::error::{AppError, Result};

// `KEYS[1..]` must enumerate every non-job-hash container key for the
// queue; job hashes and their `:lock`/`:logs`/`:dependencies` satellites
// are discovered via `KEYS pattern` since their ids are unbounded.
const SOURCE: &str = r#"
-- KEYS: [1] wait [2] paused [3] active [4] delayed [5] priority [6] completed
--       [7] failed [8] waitingChildren [9] stalled [10] stalledCheck
--       [11] idCounter [12] events [13] meta [14] repeat
-- ARGV: [1] force ('1'/'0') [2] jobKeyPattern
if redis.call('EXISTS', KEYS[3]) == 1 and redis.call('LLEN', KEYS[3]) > 0 and ARGV[1] ~= '1' then
  return 0
end

for i = 1, 14 do
  redis.call('DEL', KEYS[i])
end

local cursor = '0'
repeat
  local result = redis.call('SCAN', cursor, 'MATCH', ARGV[2], 'COUNT', 200)
  cursor = result[1]
  local keys = result[2]
  if #keys > 0 then
    redis.call('DEL', unpack(keys))
  end
until cursor == '0'

return 1
"#;

pub struct ObliterateScript(Script);

impl ObliterateScript {
    pub fn new() -> Self {
        Self(Script::new(SOURCE))
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn invoke(
        &self,
        conn: &mut ConnectionManager,
        keys: [&str; 14],
        force: bool,
        job_key_pattern: &str,
    ) -> Result<()> {
        let mut invocation = self.0.prepare_invoke();
        for key in keys {
            invocation.key(key);
        }
        let ok: i64 = invocation
            .arg(if force { "1" } else { "0" })
            .arg(job_key_pattern)
            .invoke_async(conn)
            .await
            .map_err(|e| AppError::Script(format!("obliterate: {e}")))?;
        if ok == 0 {
            return Err(AppError::Validation(
                "cannot obliterate a queue with active jobs unless force=true".into(),
            ));
        }
        Ok(())
    }
}

impl Default for ObliterateScript {
    fn default() -> Self {
        Self::new()
    }
}
