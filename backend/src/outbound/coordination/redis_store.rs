//! Redis-backed coordination store.
//!
//! Each port method is one Redis round trip. Conditional writes use
//! `SET NX PX`; increment-with-expiry and compare-and-delete run as Lua
//! scripts so the read and the write happen atomically on the server.

use std::time::Duration;

use async_trait::async_trait;
use bb8_redis::{RedisConnectionManager, bb8, redis};
use tracing::debug;

use crate::domain::ports::{CoordinationStore, CoordinationStoreError};

/// Increment a counter and set its expiry when this increment created it.
const INCR_WITH_EXPIRY: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
";

/// Delete a key only while it still holds the expected value.
const COMPARE_AND_DELETE: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
";

/// Pool of multiplexed Redis connections.
pub type RedisPool = bb8::Pool<RedisConnectionManager>;

/// Connection settings for [`RedisCoordinationStore`].
#[derive(Debug, Clone)]
pub struct RedisConfig {
    url: String,
    max_size: u32,
    connection_timeout: Duration,
}

impl RedisConfig {
    /// Settings for `url` with 16 pooled connections and a 2 second
    /// checkout timeout.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_size: 16,
            connection_timeout: Duration::from_secs(2),
        }
    }

    /// Set the maximum number of pooled connections.
    pub fn with_max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size.max(1);
        self
    }

    /// Set the checkout timeout.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }
}

/// Coordination store backed by a Redis server.
#[derive(Clone)]
pub struct RedisCoordinationStore {
    pool: RedisPool,
    incr_with_expiry: redis::Script,
    compare_and_delete: redis::Script,
}

impl RedisCoordinationStore {
    /// Build a lazily connecting pool for `config`.
    ///
    /// The server is not contacted until the first command, so an outage at
    /// startup surfaces as `Unavailable` per request rather than aborting
    /// the process.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinationStoreError::Command`] when the URL is invalid.
    pub fn connect(config: &RedisConfig) -> Result<Self, CoordinationStoreError> {
        let manager = RedisConnectionManager::new(config.url.as_str())
            .map_err(|err| CoordinationStoreError::command(format!("invalid redis url: {err}")))?;
        let pool = bb8::Pool::builder()
            .max_size(config.max_size)
            .connection_timeout(config.connection_timeout)
            .build_unchecked(manager);
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: RedisPool) -> Self {
        Self {
            pool,
            incr_with_expiry: redis::Script::new(INCR_WITH_EXPIRY),
            compare_and_delete: redis::Script::new(COMPARE_AND_DELETE),
        }
    }

    async fn connection(
        &self,
    ) -> Result<bb8::PooledConnection<'_, RedisConnectionManager>, CoordinationStoreError> {
        self.pool
            .get()
            .await
            .map_err(|err| CoordinationStoreError::unavailable(err.to_string()))
    }
}

fn map_redis_error(error: &redis::RedisError) -> CoordinationStoreError {
    debug!(error = %error, "redis command failed");
    if error.is_io_error()
        || error.is_connection_dropped()
        || error.is_connection_refusal()
        || error.is_timeout()
    {
        CoordinationStoreError::unavailable(error.to_string())
    } else {
        CoordinationStoreError::command(error.to_string())
    }
}

fn expiry_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl CoordinationStore for RedisCoordinationStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CoordinationStoreError> {
        let mut conn = self.connection().await?;
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut *conn)
            .await
            .map_err(|err| map_redis_error(&err))?;
        Ok(value)
    }

    async fn set_if_absent_with_expiry(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, CoordinationStoreError> {
        let mut conn = self.connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(expiry_millis(ttl))
            .query_async(&mut *conn)
            .await
            .map_err(|err| map_redis_error(&err))?;
        Ok(reply.is_some())
    }

    async fn incr_with_expiry(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<u64, CoordinationStoreError> {
        let mut conn = self.connection().await?;
        let count: i64 = self
            .incr_with_expiry
            .key(key)
            .arg(expiry_millis(ttl))
            .invoke_async(&mut *conn)
            .await
            .map_err(|err| {
                // INCR on a non-integer value is a server-side script error.
                if err.to_string().contains("not an integer") {
                    CoordinationStoreError::corrupt(key)
                } else {
                    map_redis_error(&err)
                }
            })?;
        u64::try_from(count).map_err(|_| CoordinationStoreError::corrupt(key))
    }

    async fn compare_and_delete(
        &self,
        key: &str,
        expected: &[u8],
    ) -> Result<bool, CoordinationStoreError> {
        let mut conn = self.connection().await?;
        let deleted: i64 = self
            .compare_and_delete
            .key(key)
            .arg(expected)
            .invoke_async(&mut *conn)
            .await
            .map_err(|err| map_redis_error(&err))?;
        Ok(deleted == 1)
    }
}
