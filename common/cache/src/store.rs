//! Typed cache operations on top of a raw [`common_redis::Client`].
//!
//! Every write registers its wire key in the feature's tag set (`tag:{feature}`)
//! so a whole feature can be dropped with one server-side script that reads the
//! set and deletes its members together with it.

use common_redis::{Client as RedisClient, CustomRedisError};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::codec::{Codec, SerializationResult};
use crate::config::{CacheSettings, SettingsHandle};
use crate::errors::CacheError;
use crate::key::{validate_feature, CacheKey};
use crate::telemetry::{CacheOperation, CacheTelemetry, MetricsTelemetry};
use crate::types::CacheEntry;

/// Races a store call against `cancel`.
async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, CacheError>
where
    F: Future<Output = Result<T, CustomRedisError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CacheError::Cancelled),
        res = fut => res.map_err(CacheError::from),
    }
}

#[derive(Clone)]
pub struct CacheStore {
    client: Arc<dyn RedisClient + Send + Sync>,
    codec: Codec,
    settings: SettingsHandle,
    telemetry: Arc<dyn CacheTelemetry>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("client", &"<Redis Client>")
            .field("codec", &self.codec)
            .field("settings", &self.settings)
            .finish()
    }
}

impl CacheStore {
    /// A store using the JSON codec and [`MetricsTelemetry`].
    pub fn new(client: Arc<dyn RedisClient + Send + Sync>, settings: SettingsHandle) -> Self {
        Self {
            client,
            codec: Codec::default(),
            settings,
            telemetry: Arc::new(MetricsTelemetry::new()),
        }
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn CacheTelemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn settings(&self) -> Arc<CacheSettings> {
        self.settings.current()
    }

    pub fn settings_handle(&self) -> &SettingsHandle {
        &self.settings
    }

    pub fn telemetry(&self) -> &Arc<dyn CacheTelemetry> {
        &self.telemetry
    }

    /// `Ok(None)` is a miss. A blob that no longer decodes is also a miss: it is
    /// deleted and dropped from its tag set before returning.
    pub async fn get<T>(
        &self,
        key: &CacheKey,
        version: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Option<CacheEntry<T>>, CacheError>
    where
        T: DeserializeOwned,
    {
        let start = Instant::now();
        let wire_key = key.wire_key(version);

        let bytes = match cancellable(cancel, self.client.get_raw_bytes(wire_key.clone())).await {
            Ok(bytes) => bytes,
            Err(CacheError::Store(CustomRedisError::NotFound)) => {
                debug!(key = %wire_key, "cache miss");
                self.telemetry.record_miss(key.feature());
                self.finish(CacheOperation::Get, key.feature(), start, true);
                return Ok(None);
            }
            Err(err) => {
                self.finish(CacheOperation::Get, key.feature(), start, false);
                return Err(err);
            }
        };

        let result = match self.codec.deserialize::<CacheEntry<T>>(&bytes) {
            Ok(entry) => {
                debug!(key = %wire_key, "cache hit");
                self.telemetry.record_hit(key.feature());
                Some(entry)
            }
            Err(err) => {
                warn!(
                    key = %wire_key,
                    error = %err,
                    "Corrupted cache entry, removing it"
                );
                self.telemetry.record_corrupted_entry(key.feature());
                self.telemetry.record_miss(key.feature());
                self.discard_corrupted(key, &wire_key, cancel).await;
                None
            }
        };

        self.finish(CacheOperation::Get, key.feature(), start, true);
        Ok(result)
    }

    async fn discard_corrupted(
        &self,
        key: &CacheKey,
        wire_key: &str,
        cancel: &CancellationToken,
    ) {
        if let Err(err) = cancellable(cancel, self.client.del(wire_key.to_string())).await {
            warn!(key = %wire_key, error = %err, "Failed to delete corrupted cache entry");
            return;
        }
        self.untag(key, wire_key, cancel).await;
    }

    /// Writes `entry` under the wire key with `ttl` and registers it in the
    /// feature's tag set. The tag set expiry is only ever extended, to `ttl`
    /// plus the configured margin.
    pub async fn set<T>(
        &self,
        key: &CacheKey,
        entry: &CacheEntry<T>,
        ttl: Duration,
        version: Option<&str>,
        use_compression: bool,
        cancel: &CancellationToken,
    ) -> Result<SerializationResult, CacheError>
    where
        T: Serialize,
    {
        let start = Instant::now();
        let result = self.write(key, entry, ttl, version, use_compression, cancel).await;
        self.finish(CacheOperation::Set, key.feature(), start, result.is_ok());

        if let Ok(serialized) = &result {
            self.telemetry.record_entry_size(
                key.feature(),
                serialized.final_size,
                serialized.is_compressed,
            );
            if serialized.is_compressed {
                self.telemetry
                    .record_compression_ratio(key.feature(), serialized.compression_ratio());
            }
        }
        result
    }

    async fn write<T>(
        &self,
        key: &CacheKey,
        entry: &CacheEntry<T>,
        ttl: Duration,
        version: Option<&str>,
        use_compression: bool,
        cancel: &CancellationToken,
    ) -> Result<SerializationResult, CacheError>
    where
        T: Serialize,
    {
        let settings = self.settings.current();
        let serialized =
            self.codec
                .serialize(entry, use_compression, settings.compression_threshold_bytes)?;

        let wire_key = key.wire_key(version);
        // SETEX rejects a zero expiry
        let ttl_seconds = ttl.as_secs().max(1);

        cancellable(
            cancel,
            self.client
                .set_bytes(wire_key.clone(), serialized.bytes.clone(), Some(ttl_seconds)),
        )
        .await?;

        if !self.client.supports_set_operations() {
            return Ok(serialized);
        }

        let tag_ttl = ttl_seconds + settings.effective_tag_ttl_margin().as_secs();
        if let Err(err) = cancellable(
            cancel,
            self.client
                .sadd_extend_ttl(key.tag_key(), wire_key.clone(), tag_ttl),
        )
        .await
        {
            // An untagged entry would survive feature invalidation
            warn!(
                key = %wire_key,
                error = %err,
                "Failed to tag cache entry, removing it"
            );
            if let Err(del_err) = self.client.del(wire_key.clone()).await {
                warn!(key = %wire_key, error = %del_err, "Failed to remove untagged cache entry");
            }
            return Err(err);
        }

        Ok(serialized)
    }

    /// Deletes one entry and drops it from its tag set. The tag cleanup is best-effort.
    pub async fn remove(
        &self,
        key: &CacheKey,
        version: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), CacheError> {
        let start = Instant::now();
        let wire_key = key.wire_key(version);

        let result = cancellable(cancel, self.client.del(wire_key.clone())).await;
        if result.is_ok() {
            self.untag(key, &wire_key, cancel).await;
        }

        self.finish(CacheOperation::Remove, key.feature(), start, result.is_ok());
        result
    }

    /// Drops every entry ever written for `feature` together with its tag set.
    ///
    /// Returns how many entries were actually deleted. Members whose entries
    /// already expired are not counted. Without set support this is a logged no-op.
    pub async fn remove_by_feature(
        &self,
        feature: &str,
        cancel: &CancellationToken,
    ) -> Result<u64, CacheError> {
        validate_feature(feature)?;

        if !self.client.supports_set_operations() {
            warn!(
                feature = %feature,
                "Store client has no set operations, feature invalidation skipped"
            );
            return Ok(0);
        }

        let start = Instant::now();
        let result = self.drop_feature(feature, cancel).await;
        self.finish(CacheOperation::RemoveByFeature, feature, start, result.is_ok());
        result
    }

    async fn drop_feature(
        &self,
        feature: &str,
        cancel: &CancellationToken,
    ) -> Result<u64, CacheError> {
        let tag_key = common_redis::tag_key(feature);
        let removed = cancellable(cancel, self.client.drain_set(tag_key)).await?;
        debug!(feature = %feature, removed, "feature cache invalidated");
        Ok(removed)
    }

    async fn untag(&self, key: &CacheKey, wire_key: &str, cancel: &CancellationToken) {
        if !self.client.supports_set_operations() {
            return;
        }
        if let Err(err) = cancellable(
            cancel,
            self.client.srem(key.tag_key(), wire_key.to_string()),
        )
        .await
        {
            warn!(key = %wire_key, error = %err, "Failed to remove cache key from tag set");
        }
    }

    fn finish(&self, operation: CacheOperation, feature: &str, start: Instant, success: bool) {
        self.telemetry
            .record_operation(operation, feature, start.elapsed(), success);
    }
}
