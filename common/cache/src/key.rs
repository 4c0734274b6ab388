use std::fmt;

use crate::errors::KeyError;

const WILDCARDS: [char; 3] = ['*', '?', '['];

/// Checks a feature name on its own, for operations that take a bare feature.
pub fn validate_feature(feature: &str) -> Result<(), KeyError> {
    if feature.is_empty() {
        return Err(KeyError::EmptyFeature);
    }
    if feature.contains(':') {
        return Err(KeyError::FeatureContainsSeparator(feature.to_string()));
    }
    if feature.contains(WILDCARDS) {
        return Err(KeyError::Wildcard(feature.to_string()));
    }
    Ok(())
}

/// Logical address of a cache entry.
///
/// `feature` is a low-cardinality namespace (for example `"todos"`) and `value`
/// identifies the entry inside it. Two keys with the same pair always map to
/// the same wire key for a given version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    feature: String,
    value: String,
}

impl CacheKey {
    pub fn new(feature: impl Into<String>, value: impl Into<String>) -> Result<Self, KeyError> {
        let feature = feature.into();
        let value = value.into();

        validate_feature(&feature)?;
        if value.contains(WILDCARDS) {
            return Err(KeyError::Wildcard(value));
        }

        Ok(Self { feature, value })
    }

    pub fn feature(&self) -> &str {
        &self.feature
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Key used in the store: `{version}:{feature}:{value}`, or `{feature}:{value}`
    /// when no version applies.
    pub fn wire_key(&self, version: Option<&str>) -> String {
        match version {
            Some(version) if !version.is_empty() => {
                format!("{}:{}:{}", version, self.feature, self.value)
            }
            _ => format!("{}:{}", self.feature, self.value),
        }
    }

    pub fn tag_key(&self) -> String {
        common_redis::tag_key(&self.feature)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.feature, self.value)
    }
}
