use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::Duration;

use crate::{Client, CustomRedisError};

/// Adds a member to a set and extends the set's expiry without ever shortening it.
///
/// `TTL` answers -1 for a set without expiry and -2 for a set that did not
/// exist, so both fall below any positive requested TTL.
pub(crate) const SADD_EXTEND_TTL_SCRIPT: &str = r"
local tag_key = KEYS[1]
local member = ARGV[1]
local ttl = tonumber(ARGV[2])

redis.call('SADD', tag_key, member)

local current_ttl = redis.call('TTL', tag_key)
if current_ttl < ttl then
    redis.call('EXPIRE', tag_key, ttl)
end

return 1
";

/// Reads a set's members and deletes them together with the set in one step.
///
/// Returns how many member keys existed. `unpack` is bounded by the Lua
/// stack, so members are deleted in chunks.
pub(crate) const DRAIN_SET_SCRIPT: &str = r"
local set_key = KEYS[1]
local members = redis.call('SMEMBERS', set_key)
local deleted = 0

for i = 1, #members, 1000 do
    local last = math.min(i + 999, #members)
    deleted = deleted + redis.call('DEL', unpack(members, i, last))
end

redis.call('DEL', set_key)
return deleted
";

pub struct RedisClient {
    connection: MultiplexedConnection,
}

impl RedisClient {
    /// Create a new RedisClient with default settings
    ///
    /// Defaults:
    /// - Timeouts: None (blocks indefinitely)
    ///
    /// For timeout configuration, use `with_config()` and specify `response_timeout` and `connection_timeout`.
    pub async fn new(addr: String) -> Result<RedisClient, CustomRedisError> {
        Self::with_config(addr, None, None).await
    }

    /// Create a new RedisClient with timeout control
    ///
    /// # Arguments
    /// * `addr` - Redis connection string
    /// * `response_timeout` - Optional timeout for Redis command responses. `None` means no timeout.
    /// * `connection_timeout` - Optional timeout for establishing connections. `None` means no timeout.
    ///
    /// # Errors
    /// Returns `CustomRedisError::InvalidConfiguration` if `Some(Duration::ZERO)` is passed - use `None` for no timeout instead.
    ///
    /// # Examples
    /// ```no_run
    /// use common_redis::RedisClient;
    /// use std::time::Duration;
    ///
    /// # async fn example() {
    /// let client = RedisClient::with_config(
    ///     "redis://localhost:6379".to_string(),
    ///     Some(Duration::from_millis(100)),
    ///     Some(Duration::from_millis(5000)),
    /// ).await.unwrap();
    /// # }
    /// ```
    pub async fn with_config(
        addr: String,
        response_timeout: Option<Duration>,
        connection_timeout: Option<Duration>,
    ) -> Result<RedisClient, CustomRedisError> {
        Self::validate_timeouts(response_timeout, connection_timeout)?;

        let client = redis::Client::open(addr)?;

        let mut config = redis::AsyncConnectionConfig::new();

        if let Some(timeout) = response_timeout {
            config = config.set_response_timeout(timeout);
        }

        if let Some(timeout) = connection_timeout {
            config = config.set_connection_timeout(timeout);
        }

        let connection = client
            .get_multiplexed_async_connection_with_config(&config)
            .await?;

        Ok(RedisClient { connection })
    }

    fn validate_timeouts(
        response_timeout: Option<Duration>,
        connection_timeout: Option<Duration>,
    ) -> Result<(), CustomRedisError> {
        if response_timeout.is_some_and(|t| t.is_zero()) {
            return Err(CustomRedisError::InvalidConfiguration(
                "Redis response timeout cannot be Duration::ZERO - use None for no timeout"
                    .to_string(),
            ));
        }
        if connection_timeout.is_some_and(|t| t.is_zero()) {
            return Err(CustomRedisError::InvalidConfiguration(
                "Redis connection timeout cannot be Duration::ZERO - use None for no timeout"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Client for RedisClient {
    async fn get_raw_bytes(&self, k: String) -> Result<Vec<u8>, CustomRedisError> {
        let mut conn = self.connection.clone();
        let raw_bytes: Option<Vec<u8>> = conn.get(k).await?;

        raw_bytes.ok_or(CustomRedisError::NotFound)
    }

    async fn set_bytes(
        &self,
        k: String,
        v: Vec<u8>,
        ttl_seconds: Option<u64>,
    ) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        match ttl_seconds {
            Some(seconds) => conn.set_ex::<_, _, ()>(k, v, seconds).await?,
            None => conn.set::<_, _, ()>(k, v).await?,
        }
        Ok(())
    }

    async fn del(&self, k: String) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(k).await?;
        Ok(())
    }

    fn supports_set_operations(&self) -> bool {
        true
    }

    async fn sadd_extend_ttl(
        &self,
        k: String,
        member: String,
        ttl_seconds: u64,
    ) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        redis::Script::new(SADD_EXTEND_TTL_SCRIPT)
            .key(k)
            .arg(member)
            .arg(ttl_seconds)
            .invoke_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn srem(&self, k: String, member: String) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        conn.srem::<_, _, ()>(k, member).await?;
        Ok(())
    }

    async fn smembers(&self, k: String) -> Result<Vec<String>, CustomRedisError> {
        let mut conn = self.connection.clone();
        let members: Vec<String> = conn.smembers(k).await?;
        Ok(members)
    }

    async fn drain_set(&self, k: String) -> Result<u64, CustomRedisError> {
        let mut conn = self.connection.clone();
        let deleted: u64 = redis::Script::new(DRAIN_SET_SCRIPT)
            .key(k)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted)
    }
}
