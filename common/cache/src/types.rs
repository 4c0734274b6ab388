//! Value types shared by the read and write paths
//!
//! - [`CacheEntry`]: what is stored under a wire key
//! - [`CachePolicy`]: how an operation wants its result cached
//! - [`InvalidationTargets`]: what an operation makes stale
//! - [`CacheSource`] / [`CacheOutcome`]: where a read-path result came from

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::time::Duration;

use crate::key::CacheKey;

/// A stored entry. `has_value = false` marks an entry that exists but is
/// logically empty, which is different from the key being absent.
///
/// An empty entry is stored without a `value` field, so a stored `null` always
/// decodes as `Some(T)`. For `T = Option<X>` a cached `None` comes back as
/// `Some(None)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct CacheEntry<T> {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_some",
        bound(deserialize = "T: Deserialize<'de>")
    )]
    pub value: Option<T>,
    pub has_value: bool,
}

fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl<T> CacheEntry<T> {
    pub fn with_value(value: T) -> Self {
        Self {
            value: Some(value),
            has_value: true,
        }
    }

    pub fn empty() -> Self {
        Self {
            value: None,
            has_value: false,
        }
    }

    /// The value, if this entry actually carries one.
    pub fn into_value(self) -> Option<T> {
        if self.has_value {
            self.value
        } else {
            None
        }
    }
}

/// Caching metadata an operation declares for its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    pub key: CacheKey,
    /// Falls back to the configured default duration.
    pub duration: Option<Duration>,
    /// Falls back to the configured compression flag.
    pub use_compression: Option<bool>,
    /// Explicit version override, highest precedence.
    pub version: Option<String>,
}

impl CachePolicy {
    pub fn new(key: CacheKey) -> Self {
        Self {
            key,
            duration: None,
            use_compression: None,
            version: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_compression(mut self, use_compression: bool) -> Self {
        self.use_compression = Some(use_compression);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

/// Entries a successful write makes stale: individual keys, whole features, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationTargets {
    pub keys: Vec<CacheKey>,
    pub features: Vec<String>,
}

impl InvalidationTargets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key: CacheKey) -> Self {
        self.keys.push(key);
        self
    }

    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.features.push(feature.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.features.is_empty()
    }
}

/// Where a read-path result came from.
///
/// This type implements `Display` for use in logging and metric labels:
/// ```
/// # use common_cache::CacheSource;
/// assert_eq!(CacheSource::Hit.to_string(), "hit");
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    /// Found on the lock-free fast path
    Hit,
    /// Found on the double-check after waiting for another caller's computation
    HitAfterWait,
    /// Computed by the wrapped step and written to the cache
    Computed,
    /// The operation declared no cache policy
    Bypassed,
}

impl fmt::Display for CacheSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheSource::Hit => write!(f, "hit"),
            CacheSource::HitAfterWait => write!(f, "hit_after_wait"),
            CacheSource::Computed => write!(f, "computed"),
            CacheSource::Bypassed => write!(f, "bypassed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOutcome<V> {
    pub value: V,
    pub source: CacheSource,
}

impl<V> CacheOutcome<V> {
    pub fn new(value: V, source: CacheSource) -> Self {
        Self { value, source }
    }

    pub fn was_cached(&self) -> bool {
        matches!(self.source, CacheSource::Hit | CacheSource::HitAfterWait)
    }

    pub fn invoked_next(&self) -> bool {
        matches!(self.source, CacheSource::Computed | CacheSource::Bypassed)
    }
}
