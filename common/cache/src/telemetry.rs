//! Cache telemetry sink.
//!
//! The cache reports what it does through [`CacheTelemetry`]. [`MetricsTelemetry`]
//! forwards everything to the `metrics` facade, so whichever recorder the host
//! installed (Prometheus in services) picks the numbers up.

use std::fmt;
use std::time::Duration;

pub const CACHE_HITS_COUNTER: &str = "cache_hits_total";
pub const CACHE_MISSES_COUNTER: &str = "cache_misses_total";
pub const CACHE_CORRUPTED_ENTRIES_COUNTER: &str = "cache_corrupted_entries_total";
pub const CACHE_OPERATIONS_COUNTER: &str = "cache_operations_total";
pub const CACHE_OPERATION_DURATION_HISTOGRAM: &str = "cache_operation_duration_ms";
pub const CACHE_ENTRY_SIZE_HISTOGRAM: &str = "cache_entry_size_bytes";
pub const CACHE_COMPRESSION_RATIO_HISTOGRAM: &str = "cache_compression_ratio";
pub const CACHE_INVALIDATIONS_COUNTER: &str = "cache_invalidations_total";
pub const CACHE_INVALIDATED_ENTRIES_COUNTER: &str = "cache_invalidated_entries_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOperation {
    Get,
    Set,
    Remove,
    RemoveByFeature,
}

impl fmt::Display for CacheOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheOperation::Get => write!(f, "get"),
            CacheOperation::Set => write!(f, "set"),
            CacheOperation::Remove => write!(f, "remove"),
            CacheOperation::RemoveByFeature => write!(f, "remove_by_feature"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationKind {
    Key,
    Feature,
}

impl fmt::Display for InvalidationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidationKind::Key => write!(f, "key"),
            InvalidationKind::Feature => write!(f, "feature"),
        }
    }
}

/// Receives cache events. Implementations must be cheap and must not block.
pub trait CacheTelemetry: Send + Sync {
    fn record_hit(&self, feature: &str);

    fn record_miss(&self, feature: &str);

    fn record_corrupted_entry(&self, feature: &str);

    fn record_operation(
        &self,
        operation: CacheOperation,
        feature: &str,
        duration: Duration,
        success: bool,
    );

    fn record_entry_size(&self, feature: &str, bytes: usize, compressed: bool);

    fn record_compression_ratio(&self, feature: &str, ratio: f64);

    /// `affected` is the number of store entries removed.
    fn record_invalidation(&self, kind: InvalidationKind, feature: &str, affected: u64);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl CacheTelemetry for NoopTelemetry {
    fn record_hit(&self, _feature: &str) {}
    fn record_miss(&self, _feature: &str) {}
    fn record_corrupted_entry(&self, _feature: &str) {}
    fn record_operation(&self, _: CacheOperation, _: &str, _: Duration, _: bool) {}
    fn record_entry_size(&self, _feature: &str, _bytes: usize, _compressed: bool) {}
    fn record_compression_ratio(&self, _feature: &str, _ratio: f64) {}
    fn record_invalidation(&self, _: InvalidationKind, _: &str, _: u64) {}
}

/// Emits cache events as counters and histograms labelled by feature.
#[derive(Debug, Clone, Default)]
pub struct MetricsTelemetry {
    additional_labels: Vec<(String, String)>,
}

impl MetricsTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extra labels added to every metric (e.g. service name, cache role).
    pub fn with_labels(additional_labels: &[(String, String)]) -> Self {
        Self {
            additional_labels: additional_labels.to_vec(),
        }
    }

    fn labels(&self, pairs: &[(&str, String)]) -> Vec<(String, String)> {
        let mut labels = self.additional_labels.clone();
        labels.extend(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())));
        labels
    }

    fn inc(name: &'static str, labels: &[(String, String)], value: u64) {
        metrics::counter!(name, labels).increment(value);
    }

    fn histogram(name: &'static str, labels: &[(String, String)], value: f64) {
        metrics::histogram!(name, labels).record(value);
    }
}

impl CacheTelemetry for MetricsTelemetry {
    fn record_hit(&self, feature: &str) {
        Self::inc(
            CACHE_HITS_COUNTER,
            &self.labels(&[("feature", feature.to_string())]),
            1,
        );
    }

    fn record_miss(&self, feature: &str) {
        Self::inc(
            CACHE_MISSES_COUNTER,
            &self.labels(&[("feature", feature.to_string())]),
            1,
        );
    }

    fn record_corrupted_entry(&self, feature: &str) {
        Self::inc(
            CACHE_CORRUPTED_ENTRIES_COUNTER,
            &self.labels(&[("feature", feature.to_string())]),
            1,
        );
    }

    fn record_operation(
        &self,
        operation: CacheOperation,
        feature: &str,
        duration: Duration,
        success: bool,
    ) {
        let labels = self.labels(&[
            ("operation", operation.to_string()),
            ("feature", feature.to_string()),
            ("success", success.to_string()),
        ]);
        Self::inc(CACHE_OPERATIONS_COUNTER, &labels, 1);
        Self::histogram(
            CACHE_OPERATION_DURATION_HISTOGRAM,
            &labels,
            duration.as_secs_f64() * 1000.0,
        );
    }

    fn record_entry_size(&self, feature: &str, bytes: usize, compressed: bool) {
        Self::histogram(
            CACHE_ENTRY_SIZE_HISTOGRAM,
            &self.labels(&[
                ("feature", feature.to_string()),
                ("compressed", compressed.to_string()),
            ]),
            bytes as f64,
        );
    }

    fn record_compression_ratio(&self, feature: &str, ratio: f64) {
        Self::histogram(
            CACHE_COMPRESSION_RATIO_HISTOGRAM,
            &self.labels(&[("feature", feature.to_string())]),
            ratio,
        );
    }

    fn record_invalidation(&self, kind: InvalidationKind, feature: &str, affected: u64) {
        let labels = self.labels(&[
            ("kind", kind.to_string()),
            ("feature", feature.to_string()),
        ]);
        Self::inc(CACHE_INVALIDATIONS_COUNTER, &labels, 1);
        Self::inc(CACHE_INVALIDATED_ENTRIES_COUNTER, &labels, affected);
    }
}
