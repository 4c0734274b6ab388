use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::{Client, CustomRedisError, RedisClient};

/// Configuration for creating a ReadWriteClient with separate primary and replica URLs.
///
/// # Examples
///
/// ```no_run
/// use common_redis::ReadWriteClientConfig;
///
/// # async fn example() {
/// let config = ReadWriteClientConfig::new(
///     "redis://primary:6379".to_string(),
///     "redis://replica:6379".to_string(),
///     None, // No response timeout
///     None, // No connection timeout
/// );
///
/// let client = config.build().await.unwrap();
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ReadWriteClientConfig {
    pub primary_url: String,
    pub replica_url: String,
    pub response_timeout: Option<Duration>,
    pub connection_timeout: Option<Duration>,
}

impl ReadWriteClientConfig {
    pub fn new(
        primary_url: String,
        replica_url: String,
        response_timeout: Option<Duration>,
        connection_timeout: Option<Duration>,
    ) -> Self {
        Self {
            primary_url,
            replica_url,
            response_timeout,
            connection_timeout,
        }
    }

    pub async fn build(self) -> Result<ReadWriteClient, CustomRedisError> {
        ReadWriteClient::with_config(self).await
    }
}

/// A Redis client that routes cache entry reads to a replica and everything else to the primary.
///
/// Only `get_raw_bytes` goes to the reader, falling back to the writer when the replica fails
/// with a recoverable error. Tag sets are always read from the primary: a lagging replica would
/// return a partial member list and feature invalidation would leave live keys behind.
pub struct ReadWriteClient {
    reader: Arc<dyn Client + Send + Sync>,
    writer: Arc<dyn Client + Send + Sync>,
}

impl Clone for ReadWriteClient {
    fn clone(&self) -> Self {
        Self {
            reader: Arc::clone(&self.reader),
            writer: Arc::clone(&self.writer),
        }
    }
}

impl std::fmt::Debug for ReadWriteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadWriteClient")
            .field("reader", &"<Redis Client>")
            .field("writer", &"<Redis Client>")
            .finish()
    }
}

impl ReadWriteClient {
    pub fn new(
        reader: Arc<dyn Client + Send + Sync>,
        writer: Arc<dyn Client + Send + Sync>,
    ) -> Self {
        Self { reader, writer }
    }

    pub async fn with_config(config: ReadWriteClientConfig) -> Result<Self, CustomRedisError> {
        let reader = Arc::new(
            RedisClient::with_config(
                config.replica_url,
                config.response_timeout,
                config.connection_timeout,
            )
            .await?,
        );
        let writer = Arc::new(
            RedisClient::with_config(
                config.primary_url,
                config.response_timeout,
                config.connection_timeout,
            )
            .await?,
        );

        Ok(Self::new(reader, writer))
    }
}

#[async_trait]
impl Client for ReadWriteClient {
    async fn get_raw_bytes(&self, k: String) -> Result<Vec<u8>, CustomRedisError> {
        match self.reader.get_raw_bytes(k.clone()).await {
            Ok(value) => Ok(value),
            Err(err) if !err.is_unrecoverable_error() => {
                warn!(
                    "Replica read failed for key '{}', falling back to primary: {}",
                    k, err
                );
                self.writer.get_raw_bytes(k).await
            }
            Err(err) => Err(err),
        }
    }

    async fn set_bytes(
        &self,
        k: String,
        v: Vec<u8>,
        ttl_seconds: Option<u64>,
    ) -> Result<(), CustomRedisError> {
        self.writer.set_bytes(k, v, ttl_seconds).await
    }

    async fn del(&self, k: String) -> Result<(), CustomRedisError> {
        self.writer.del(k).await
    }

    fn supports_set_operations(&self) -> bool {
        self.writer.supports_set_operations()
    }

    async fn sadd_extend_ttl(
        &self,
        k: String,
        member: String,
        ttl_seconds: u64,
    ) -> Result<(), CustomRedisError> {
        self.writer.sadd_extend_ttl(k, member, ttl_seconds).await
    }

    async fn srem(&self, k: String, member: String) -> Result<(), CustomRedisError> {
        self.writer.srem(k, member).await
    }

    async fn smembers(&self, k: String) -> Result<Vec<String>, CustomRedisError> {
        self.writer.smembers(k).await
    }

    async fn drain_set(&self, k: String) -> Result<u64, CustomRedisError> {
        self.writer.drain_set(k).await
    }
}
