//! Read-path caching with stampede protection
//!
//! [`CachingBehavior`] wraps one pipeline step:
//! 1. Without a cache policy the step runs untouched
//! 2. A stored entry carrying a value is returned without locking
//! 3. On a miss the caller takes the per-key lock and checks again
//! 4. Still missing, the step runs once and a successful result is stored
//!
//! Concurrent callers missing on the same wire key queue on the lock and find
//! the entry on their second check, so the step runs once per key per expiry.

use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::CacheError;
use crate::locks::KeyLocks;
use crate::store::CacheStore;
use crate::types::{CacheEntry, CacheOutcome, CachePolicy, CacheSource};
use crate::version::VersionResolver;

#[derive(Debug, Clone)]
pub struct CachingBehavior {
    store: CacheStore,
    resolver: VersionResolver,
    locks: Arc<KeyLocks>,
}

impl CachingBehavior {
    pub fn new(store: CacheStore) -> Self {
        let resolver = VersionResolver::new(store.settings_handle().clone());
        Self {
            store,
            resolver,
            locks: Arc::new(KeyLocks::new()),
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Runs `next` through the cache and returns its value.
    ///
    /// Store failures reach the caller converted into `E`. A failed `next` is
    /// returned as is and nothing is cached.
    pub async fn handle<V, E, F, Fut>(
        &self,
        policy: Option<&CachePolicy>,
        cancel: &CancellationToken,
        next: F,
    ) -> Result<V, E>
    where
        V: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        self.handle_with_source(policy, cancel, next)
            .await
            .map(|outcome| outcome.value)
    }

    /// Like [`handle`](Self::handle) but also reports where the value came from.
    pub async fn handle_with_source<V, E, F, Fut>(
        &self,
        policy: Option<&CachePolicy>,
        cancel: &CancellationToken,
        next: F,
    ) -> Result<CacheOutcome<V>, E>
    where
        V: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let Some(policy) = policy else {
            return next()
                .await
                .map(|value| CacheOutcome::new(value, CacheSource::Bypassed));
        };

        let version = self.resolver.resolve(policy);
        let version = version.as_deref();

        if let Some(value) = self.lookup(policy, version, cancel).await? {
            return Ok(CacheOutcome::new(value, CacheSource::Hit));
        }

        let wire_key = policy.key.wire_key(version);
        let _guard = self.locks.acquire(&wire_key, cancel).await?;

        if let Some(value) = self.lookup(policy, version, cancel).await? {
            debug!(key = %wire_key, "cache filled while waiting for lock");
            return Ok(CacheOutcome::new(value, CacheSource::HitAfterWait));
        }

        let value = next().await?;

        let settings = self.store.settings();
        let ttl = policy.duration.unwrap_or(settings.default_cache_duration);
        let use_compression = policy
            .use_compression
            .unwrap_or(settings.enable_compression);

        self.store
            .set(
                &policy.key,
                &CacheEntry::with_value(&value),
                ttl,
                version,
                use_compression,
                cancel,
            )
            .await?;

        Ok(CacheOutcome::new(value, CacheSource::Computed))
    }

    /// Entries stored without a value do not satisfy a read. A stored value is
    /// returned as is, including a cached `None` when `V` is an `Option`.
    async fn lookup<V>(
        &self,
        policy: &CachePolicy,
        version: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Option<V>, CacheError>
    where
        V: DeserializeOwned,
    {
        let entry = self.store.get::<V>(&policy.key, version, cancel).await?;
        Ok(entry.and_then(CacheEntry::into_value))
    }
}
