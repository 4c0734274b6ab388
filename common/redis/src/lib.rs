use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

// Re-export ErrorKind and RetryMethod so consumers can construct CustomRedisError in tests
// and understand retry behavior
pub use redis::ErrorKind as RedisErrorKind;
pub use redis::RetryMethod;

/// Prefix of the server-side set that tracks every key written for a feature.
pub const TAG_KEY_PREFIX: &str = "tag:";

#[derive(Error, Debug, Clone)]
pub enum CustomRedisError {
    #[error("Not found in redis")]
    NotFound,
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Operation not supported by this client: {0}")]
    Unsupported(&'static str),
    #[error("Timeout error")]
    Timeout,
    #[error(transparent)]
    Redis(#[from] Arc<redis::RedisError>),
}

impl From<redis::RedisError> for CustomRedisError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            CustomRedisError::Timeout
        } else {
            CustomRedisError::Redis(Arc::new(err))
        }
    }
}

impl CustomRedisError {
    /// Create a Redis error from an ErrorKind (primarily for testing)
    pub fn from_redis_kind(kind: redis::ErrorKind, description: &'static str) -> Self {
        CustomRedisError::Redis(Arc::new(redis::RedisError::from((kind, description))))
    }

    /// Determine if this error is unrecoverable and should not be retried
    ///
    /// Returns `true` for configuration errors and permanent failures.
    /// Returns `false` for transient network/connection issues that may resolve on retry.
    pub fn is_unrecoverable_error(&self) -> bool {
        match self {
            CustomRedisError::Timeout => false,
            CustomRedisError::InvalidConfiguration(_) => true,
            // A client without set commands will not grow them on retry
            CustomRedisError::Unsupported(_) => true,
            CustomRedisError::NotFound => true,
            CustomRedisError::Redis(err) => {
                Self::is_config_error(err) || err.is_unrecoverable_error()
            }
        }
    }

    fn is_config_error(err: &redis::RedisError) -> bool {
        matches!(
            err.kind(),
            redis::ErrorKind::InvalidClientConfig | redis::ErrorKind::AuthenticationFailed
        )
    }

    /// Determine the appropriate retry strategy for this error.
    /// Delegates to redis crate's `retry_method()` for Redis errors.
    pub fn retry_method(&self) -> RetryMethod {
        match self {
            CustomRedisError::Timeout => RetryMethod::WaitAndRetry,
            CustomRedisError::InvalidConfiguration(_) => RetryMethod::NoRetry,
            CustomRedisError::Unsupported(_) => RetryMethod::NoRetry,
            CustomRedisError::NotFound => RetryMethod::NoRetry,
            CustomRedisError::Redis(err) => {
                if Self::is_config_error(err) {
                    RetryMethod::NoRetry
                } else {
                    err.retry_method()
                }
            }
        }
    }
}

/// Key of the tag set holding every key written for `feature`.
pub fn tag_key(feature: &str) -> String {
    format!("{TAG_KEY_PREFIX}{feature}")
}

/// Byte-oriented view of the remote store used by the cache layer.
///
/// The plain key-value commands are required. Set commands have default
/// implementations that report [`CustomRedisError::Unsupported`], so a minimal
/// key-value-only client only implements the first three methods and leaves
/// `supports_set_operations` at `false`.
#[async_trait]
pub trait Client {
    /// Returns `CustomRedisError::NotFound` when the key does not exist.
    async fn get_raw_bytes(&self, k: String) -> Result<Vec<u8>, CustomRedisError>;

    /// Set raw bytes without any serialization or compression.
    async fn set_bytes(
        &self,
        k: String,
        v: Vec<u8>,
        ttl_seconds: Option<u64>,
    ) -> Result<(), CustomRedisError>;

    async fn del(&self, k: String) -> Result<(), CustomRedisError>;

    fn supports_set_operations(&self) -> bool {
        false
    }

    /// Add `member` to the set at `k` and make sure the set lives at least
    /// `ttl_seconds`. An existing longer expiry is kept.
    async fn sadd_extend_ttl(
        &self,
        _k: String,
        _member: String,
        _ttl_seconds: u64,
    ) -> Result<(), CustomRedisError> {
        Err(CustomRedisError::Unsupported("sadd"))
    }

    async fn srem(&self, _k: String, _member: String) -> Result<(), CustomRedisError> {
        Err(CustomRedisError::Unsupported("srem"))
    }

    async fn smembers(&self, _k: String) -> Result<Vec<String>, CustomRedisError> {
        Err(CustomRedisError::Unsupported("smembers"))
    }

    /// Delete the set at `k` and every key it lists as one atomic step,
    /// returning how many listed keys existed. A member added concurrently is
    /// either deleted with the set or lands in a fresh set afterwards.
    async fn drain_set(&self, _k: String) -> Result<u64, CustomRedisError> {
        Err(CustomRedisError::Unsupported("drain_set"))
    }
}

// Module declarations
mod client;
mod mock;
mod read_write;

// Re-export public APIs
pub use client::RedisClient;
pub use mock::{MockRedisCall, MockRedisClient, MockRedisValue};
pub use read_write::{ReadWriteClient, ReadWriteClientConfig};
