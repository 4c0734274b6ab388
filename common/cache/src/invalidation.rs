use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::errors::CacheError;
use crate::store::CacheStore;
use crate::telemetry::InvalidationKind;
use crate::types::InvalidationTargets;
use crate::version::VersionResolver;

#[derive(Debug, Clone)]
pub struct InvalidationFailure {
    pub kind: InvalidationKind,
    /// Wire key for key targets, feature name for feature targets.
    pub target: String,
    pub error: CacheError,
}

#[derive(Debug, Clone, Default)]
pub struct InvalidationReport {
    /// Key targets deleted without error.
    pub keys_removed: u64,
    /// Entries deleted through feature tag sets.
    pub entries_removed_by_feature: u64,
    pub failures: Vec<InvalidationFailure>,
}

impl InvalidationReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Write-path behavior: once the wrapped step succeeds, drop the cache entries it made stale.
///
/// Invalidation never fails the operation. Each target is attempted, failures
/// are logged and collected in the [`InvalidationReport`].
#[derive(Debug, Clone)]
pub struct InvalidationBehavior {
    store: CacheStore,
    resolver: VersionResolver,
}

impl InvalidationBehavior {
    pub fn new(store: CacheStore) -> Self {
        let resolver = VersionResolver::new(store.settings_handle().clone());
        Self { store, resolver }
    }

    pub async fn handle<V, E, F, Fut>(
        &self,
        targets: Option<&InvalidationTargets>,
        cancel: &CancellationToken,
        next: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        self.handle_with_report(targets, cancel, next)
            .await
            .map(|(value, _)| value)
    }

    /// Runs `next`; only when it succeeds are `targets` invalidated.
    pub async fn handle_with_report<V, E, F, Fut>(
        &self,
        targets: Option<&InvalidationTargets>,
        cancel: &CancellationToken,
        next: F,
    ) -> Result<(V, InvalidationReport), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let value = next().await?;

        let report = match targets {
            Some(targets) => self.invalidate(targets, cancel).await,
            None => InvalidationReport::default(),
        };
        Ok((value, report))
    }

    pub async fn invalidate(
        &self,
        targets: &InvalidationTargets,
        cancel: &CancellationToken,
    ) -> InvalidationReport {
        let mut report = InvalidationReport::default();
        let telemetry = self.store.telemetry();

        for key in &targets.keys {
            let version = self.resolver.resolve_for_key(key);
            let wire_key = key.wire_key(version.as_deref());

            match self.store.remove(key, version.as_deref(), cancel).await {
                Ok(()) => {
                    debug!(key = %wire_key, "cache key invalidated");
                    report.keys_removed += 1;
                    telemetry.record_invalidation(InvalidationKind::Key, key.feature(), 1);
                }
                Err(err) => {
                    error!(key = %wire_key, error = %err, "Failed to invalidate cache key");
                    report.failures.push(InvalidationFailure {
                        kind: InvalidationKind::Key,
                        target: wire_key,
                        error: err,
                    });
                }
            }
        }

        for feature in &targets.features {
            match self.store.remove_by_feature(feature, cancel).await {
                Ok(removed) => {
                    report.entries_removed_by_feature += removed;
                    telemetry.record_invalidation(InvalidationKind::Feature, feature, removed);
                }
                Err(err) => {
                    error!(feature = %feature, error = %err, "Failed to invalidate cache feature");
                    report.failures.push(InvalidationFailure {
                        kind: InvalidationKind::Feature,
                        target: feature.clone(),
                        error: err,
                    });
                }
            }
        }

        report
    }
}
