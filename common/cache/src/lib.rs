//! Distributed read-through / write-invalidate cache for pipeline steps
//!
//! This crate puts a Redis-backed cache in front of business-logic handlers.
//! It supports:
//!
//! - Stampede protection: one computation per wire key at a time
//! - Feature invalidation through server-side tag sets, without key scans
//! - Layered versioning (explicit, per feature, global) for instant logical invalidation
//! - Optional gzip compression with hit/miss/size telemetry
//!
//! # Example
//!
//! ```rust,ignore
//! use common_cache::{CacheConfig, CacheKey, CacheLayer, CachePolicy, PipelineOperation};
//! use envconfig::Envconfig;
//! use tokio_util::sync::CancellationToken;
//!
//! struct GetTodo(i64);
//!
//! impl PipelineOperation for GetTodo {
//!     fn cache_policy(&self) -> Option<CachePolicy> {
//!         CacheKey::new("todos", self.0.to_string()).ok().map(CachePolicy::new)
//!     }
//! }
//!
//! let layer = CacheLayer::from_config(&CacheConfig::init_from_env()?).await?;
//! let todo = layer
//!     .run(&GetTodo(1), &CancellationToken::new(), || async {
//!         load_todo_from_db(1).await
//!     })
//!     .await?;
//! ```

pub mod codec;
pub mod config;
pub mod errors;
pub mod invalidation;
pub mod key;
pub mod locks;
pub mod pipeline;
pub mod read_through;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod version;

pub use codec::{Codec, CodecError, PayloadFormat, SerializationResult};
pub use config::{CacheConfig, CacheSettings, FeatureVersions, FlexBool, SettingsHandle};
pub use errors::{CacheError, KeyError};
pub use invalidation::{InvalidationBehavior, InvalidationFailure, InvalidationReport};
pub use key::CacheKey;
pub use locks::KeyLocks;
pub use pipeline::{CacheLayer, PipelineOperation};
pub use read_through::CachingBehavior;
pub use store::CacheStore;
pub use telemetry::{
    CacheOperation, CacheTelemetry, InvalidationKind, MetricsTelemetry, NoopTelemetry,
};
pub use types::{CacheEntry, CacheOutcome, CachePolicy, CacheSource, InvalidationTargets};
pub use version::VersionResolver;
