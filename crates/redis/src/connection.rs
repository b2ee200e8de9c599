// Connection management (spec.md 9: one shared multiplexed connection
// per store handle).

use redis::aio::ConnectionManager;
use redis::Client;

use taskforge_core::error::{AppError, Result};

/// Opens a multiplexed, auto-reconnecting connection to Redis. Cheap to
/// clone; every `RedisStore` method borrows one of these rather than
/// checking a connection in/out of a pool (BRPOPLPUSH-style blocking
/// calls are deliberately not used here - see `RedisStore::move_to_active`
/// and its polling worker caller).
pub async fn connect(url: &str) -> Result<ConnectionManager> {
    let client = Client::open(url).map_err(|e| AppError::Store(format!("invalid redis url: {e}")))?;
    client
        .get_connection_manager()
        .await
        .map_err(|e| AppError::Store(format!("failed to connect to redis: {e}")))
}
