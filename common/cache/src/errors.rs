use common_redis::CustomRedisError;
use thiserror::Error;

use crate::codec::CodecError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("Cache feature must not be empty")]
    EmptyFeature,
    #[error("Cache feature '{0}' must not contain ':'")]
    FeatureContainsSeparator(String),
    #[error("Cache key part '{0}' contains a wildcard character")]
    Wildcard(String),
}

#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("Cache store error: {0}")]
    Store(#[from] CustomRedisError),
    #[error("Failed to encode cache entry: {0}")]
    Codec(#[from] CodecError),
    #[error("Invalid cache key: {0}")]
    Key(#[from] KeyError),
    #[error("Cache operation cancelled")]
    Cancelled,
}

impl CacheError {
    /// Whether a retry has any chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            CacheError::Store(err) => !err.is_unrecoverable_error(),
            CacheError::Codec(_) | CacheError::Key(_) | CacheError::Cancelled => false,
        }
    }
}
