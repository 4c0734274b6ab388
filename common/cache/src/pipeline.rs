use common_redis::{Client as RedisClient, ReadWriteClientConfig};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::codec::Codec;
use crate::config::{CacheConfig, SettingsHandle};
use crate::errors::CacheError;
use crate::invalidation::InvalidationBehavior;
use crate::read_through::CachingBehavior;
use crate::store::CacheStore;
use crate::types::{CachePolicy, InvalidationTargets};

/// An inbound operation as seen by the cache layer.
///
/// Reads return a [`CachePolicy`] to have their result cached, writes return
/// [`InvalidationTargets`] to drop what they make stale. Both default to `None`.
pub trait PipelineOperation {
    fn cache_policy(&self) -> Option<CachePolicy> {
        None
    }

    fn invalidation_targets(&self) -> Option<InvalidationTargets> {
        None
    }
}

/// Both cache behaviors around one pipeline step, sharing a store and lock table.
#[derive(Debug, Clone)]
pub struct CacheLayer {
    caching: CachingBehavior,
    invalidation: InvalidationBehavior,
}

impl CacheLayer {
    pub fn new(store: CacheStore) -> Self {
        Self {
            caching: CachingBehavior::new(store.clone()),
            invalidation: InvalidationBehavior::new(store),
        }
    }

    /// Connects to Redis as configured. With `REDIS_READER_URL` set, entry reads
    /// go to the replica.
    pub async fn from_config(config: &CacheConfig) -> Result<Self, CacheError> {
        let client: Arc<dyn RedisClient + Send + Sync> = if config.redis_reader_url.is_empty() {
            Arc::new(
                common_redis::RedisClient::with_config(
                    config.redis_url.clone(),
                    config.redis_response_timeout(),
                    config.redis_connection_timeout(),
                )
                .await?,
            )
        } else {
            Arc::new(
                ReadWriteClientConfig::new(
                    config.redis_url.clone(),
                    config.redis_reader_url.clone(),
                    config.redis_response_timeout(),
                    config.redis_connection_timeout(),
                )
                .build()
                .await?,
            )
        };

        info!(
            replica = !config.redis_reader_url.is_empty(),
            format = ?config.payload_format,
            "cache layer connected"
        );

        let store = CacheStore::new(client, SettingsHandle::new(config.settings()))
            .with_codec(Codec::new(config.payload_format));
        Ok(Self::new(store))
    }

    pub fn caching(&self) -> &CachingBehavior {
        &self.caching
    }

    pub fn invalidation(&self) -> &InvalidationBehavior {
        &self.invalidation
    }

    pub fn settings_handle(&self) -> &SettingsHandle {
        self.caching.store().settings_handle()
    }

    /// Runs `next` for `operation`, cached and/or followed by invalidation
    /// according to what the operation declares.
    pub async fn run<O, V, E, F, Fut>(
        &self,
        operation: &O,
        cancel: &CancellationToken,
        next: F,
    ) -> Result<V, E>
    where
        O: PipelineOperation + ?Sized,
        V: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let policy = operation.cache_policy();
        let targets = operation.invalidation_targets();

        let cached = || self.caching.handle(policy.as_ref(), cancel, next);
        self.invalidation
            .handle(targets.as_ref(), cancel, cached)
            .await
    }
}
