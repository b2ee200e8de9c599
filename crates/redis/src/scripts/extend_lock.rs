use redis::aio::ConnectionManager;
use redis::Script;

use taskforge_core::error::{AppError, Result};

const SOURCE: &str = r#"
-- KEYS: [1] lock
-- ARGV: [1] token [2] durationMs
local lock_key = KEYS[1]
local token, duration = ARGV[1], tonumber(ARGV[2])

local owner = redis.call('GET', lock_key)
if owner ~= token then
  return 0
end

redis.call('PEXPIRE', lock_key, duration)
return 1
"#;

pub struct ExtendLockScript(Script);

impl ExtendLockScript {
    pub fn new() -> Self {
        Self(Script::new(SOURCE))
    }

    pub async fn invoke(
        &self,
        conn: &mut ConnectionManager,
        lock: &str,
        token: &str,
        duration_ms: i64,
    ) -> Result<()> {
        let renewed: i64 = self
            .0
            .key(lock)
            .arg(token)
            .arg(duration_ms)
            .invoke_async(conn)
            .await
            .map_err(|e| AppError::Script(format!("extendLock: {e}")))?;
        if renewed == 0 {
            return Err(AppError::LockMismatch);
        }
        Ok(())
    }
}

impl Default for ExtendLockScript {
    fn default() -> Self {
        Self::new()
    }
}
