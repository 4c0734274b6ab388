use envconfig::Envconfig;
use std::collections::HashMap;
use std::ops::Deref;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::codec::PayloadFormat;

/// Tag sets must outlive their longest member by at least this much.
pub const MIN_TAG_TTL_MARGIN: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlexBool(pub bool);

impl FromStr for FlexBool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(FlexBool(true)),
            "false" | "0" | "no" | "off" | "" => Ok(FlexBool(false)),
            _ => Err(format!("Invalid boolean value: {}", s)),
        }
    }
}

impl From<FlexBool> for bool {
    fn from(flex: FlexBool) -> Self {
        flex.0
    }
}

impl Deref for FlexBool {
    type Target = bool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Per-feature version overrides, written as `feature=version` pairs separated by commas.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureVersions(pub HashMap<String, String>);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseFeatureVersionsError(pub String);

impl std::fmt::Display for ParseFeatureVersionsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invalid feature version entry: {}", self.0)
    }
}

impl std::error::Error for ParseFeatureVersionsError {}

impl FromStr for FeatureVersions {
    type Err = ParseFeatureVersionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut versions = HashMap::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((feature, version)) = part.split_once('=') else {
                return Err(ParseFeatureVersionsError(part.to_string()));
            };
            let (feature, version) = (feature.trim(), version.trim());
            if feature.is_empty() || version.is_empty() {
                return Err(ParseFeatureVersionsError(part.to_string()));
            }
            versions.insert(feature.to_string(), version.to_string());
        }
        Ok(FeatureVersions(versions))
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct CacheConfig {
    #[envconfig(from = "REDIS_URL", default = "redis://localhost:6379/")]
    pub redis_url: String,

    // Empty means entry reads share the primary connection
    #[envconfig(from = "REDIS_READER_URL", default = "")]
    pub redis_reader_url: String,

    // 0 disables the timeout
    #[envconfig(from = "REDIS_RESPONSE_TIMEOUT_MS", default = "100")]
    pub redis_response_timeout_ms: u64,

    #[envconfig(from = "REDIS_CONNECTION_TIMEOUT_MS", default = "5000")]
    pub redis_connection_timeout_ms: u64,

    #[envconfig(from = "CACHE_GLOBAL_VERSION", default = "v1")]
    pub global_version: String,

    #[envconfig(from = "CACHE_FEATURE_VERSIONS", default = "")]
    pub feature_versions: FeatureVersions,

    #[envconfig(from = "CACHE_DEFAULT_DURATION_SECS", default = "300")]
    pub default_duration_secs: u64,

    #[envconfig(from = "CACHE_ENABLE_COMPRESSION", default = "false")]
    pub enable_compression: FlexBool,

    #[envconfig(from = "CACHE_COMPRESSION_THRESHOLD_BYTES", default = "1024")]
    pub compression_threshold_bytes: usize,

    #[envconfig(from = "CACHE_TAG_TTL_MARGIN_SECS", default = "300")]
    pub tag_ttl_margin_secs: u64,

    #[envconfig(from = "CACHE_PAYLOAD_FORMAT", default = "json")]
    pub payload_format: PayloadFormat,
}

impl CacheConfig {
    pub fn default_test_config() -> Self {
        Self {
            redis_url: "redis://localhost:6379/".to_string(),
            redis_reader_url: "".to_string(),
            redis_response_timeout_ms: 100,
            redis_connection_timeout_ms: 5000,
            global_version: "v1".to_string(),
            feature_versions: FeatureVersions::default(),
            default_duration_secs: 300,
            enable_compression: FlexBool(false),
            compression_threshold_bytes: 1024,
            tag_ttl_margin_secs: 300,
            payload_format: PayloadFormat::Json,
        }
    }

    pub fn redis_response_timeout(&self) -> Option<Duration> {
        Self::optional_millis(self.redis_response_timeout_ms)
    }

    pub fn redis_connection_timeout(&self) -> Option<Duration> {
        Self::optional_millis(self.redis_connection_timeout_ms)
    }

    fn optional_millis(ms: u64) -> Option<Duration> {
        (ms > 0).then(|| Duration::from_millis(ms))
    }

    pub fn settings(&self) -> CacheSettings {
        CacheSettings {
            global_version: self.global_version.clone(),
            feature_versions: self.feature_versions.0.clone(),
            default_cache_duration: Duration::from_secs(self.default_duration_secs),
            enable_compression: *self.enable_compression,
            compression_threshold_bytes: self.compression_threshold_bytes,
            tag_ttl_margin: Duration::from_secs(self.tag_ttl_margin_secs),
        }
    }
}

/// Runtime view of the cache configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    pub global_version: String,
    pub feature_versions: HashMap<String, String>,
    pub default_cache_duration: Duration,
    pub enable_compression: bool,
    pub compression_threshold_bytes: usize,
    pub tag_ttl_margin: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            global_version: "v1".to_string(),
            feature_versions: HashMap::new(),
            default_cache_duration: Duration::from_secs(5 * 60),
            enable_compression: false,
            compression_threshold_bytes: 1024,
            tag_ttl_margin: MIN_TAG_TTL_MARGIN,
        }
    }
}

impl CacheSettings {
    /// Margin added to an entry TTL for its tag set, never below [`MIN_TAG_TTL_MARGIN`].
    pub fn effective_tag_ttl_margin(&self) -> Duration {
        self.tag_ttl_margin.max(MIN_TAG_TTL_MARGIN)
    }
}

/// Shared, swappable settings. Readers take a snapshot per operation, so a
/// reload never changes the version of an operation already in flight.
#[derive(Debug, Clone)]
pub struct SettingsHandle {
    inner: Arc<RwLock<Arc<CacheSettings>>>,
}

impl SettingsHandle {
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(settings))),
        }
    }

    pub fn current(&self) -> Arc<CacheSettings> {
        match self.inner.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn replace(&self, settings: CacheSettings) {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::new(settings);
        tracing::info!("cache settings reloaded");
    }
}

impl Default for SettingsHandle {
    fn default() -> Self {
        Self::new(CacheSettings::default())
    }
}

impl From<CacheSettings> for SettingsHandle {
    fn from(settings: CacheSettings) -> Self {
        Self::new(settings)
    }
}
