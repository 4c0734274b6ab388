#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common_cache::{
    CacheOperation, CacheSettings, CacheStore, CacheTelemetry, InvalidationKind, SettingsHandle,
};
use common_redis::MockRedisClient;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    Hit(String),
    Miss(String),
    Corrupted(String),
    Operation {
        operation: CacheOperation,
        feature: String,
        success: bool,
    },
    EntrySize {
        feature: String,
        bytes: usize,
        compressed: bool,
    },
    CompressionRatio(String, f64),
    Invalidation {
        kind: InvalidationKind,
        feature: String,
        affected: u64,
    },
}

/// Keeps every event so tests can assert on what the cache reported.
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingTelemetry {
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&TelemetryEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| matches(e)).count()
    }

    fn push(&self, event: TelemetryEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl CacheTelemetry for RecordingTelemetry {
    fn record_hit(&self, feature: &str) {
        self.push(TelemetryEvent::Hit(feature.to_string()));
    }

    fn record_miss(&self, feature: &str) {
        self.push(TelemetryEvent::Miss(feature.to_string()));
    }

    fn record_corrupted_entry(&self, feature: &str) {
        self.push(TelemetryEvent::Corrupted(feature.to_string()));
    }

    fn record_operation(
        &self,
        operation: CacheOperation,
        feature: &str,
        _duration: Duration,
        success: bool,
    ) {
        self.push(TelemetryEvent::Operation {
            operation,
            feature: feature.to_string(),
            success,
        });
    }

    fn record_entry_size(&self, feature: &str, bytes: usize, compressed: bool) {
        self.push(TelemetryEvent::EntrySize {
            feature: feature.to_string(),
            bytes,
            compressed,
        });
    }

    fn record_compression_ratio(&self, feature: &str, ratio: f64) {
        self.push(TelemetryEvent::CompressionRatio(feature.to_string(), ratio));
    }

    fn record_invalidation(&self, kind: InvalidationKind, feature: &str, affected: u64) {
        self.push(TelemetryEvent::Invalidation {
            kind,
            feature: feature.to_string(),
            affected,
        });
    }
}

pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

pub struct TestContext {
    pub client: MockRedisClient,
    pub settings: SettingsHandle,
    pub telemetry: Arc<RecordingTelemetry>,
    pub store: CacheStore,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_client(MockRedisClient::new(), CacheSettings::default())
    }

    pub fn with_settings(settings: CacheSettings) -> Self {
        Self::with_client(MockRedisClient::new(), settings)
    }

    pub fn with_client(client: MockRedisClient, settings: CacheSettings) -> Self {
        setup_tracing();
        let settings = SettingsHandle::new(settings);
        let telemetry = Arc::new(RecordingTelemetry::default());
        let store = CacheStore::new(Arc::new(client.clone()), settings.clone())
            .with_telemetry(telemetry.clone());
        Self {
            client,
            settings,
            telemetry,
            store,
        }
    }
}
