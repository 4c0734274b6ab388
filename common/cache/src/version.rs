use crate::config::{CacheSettings, SettingsHandle};
use crate::key::CacheKey;
use crate::types::CachePolicy;

/// Picks the version segment for a wire key.
///
/// Precedence is explicit override, then the feature's configured version,
/// then the global version. Empty strings count as unset. When nothing is set
/// the result is `None` and wire keys carry no version segment.
#[derive(Debug, Clone)]
pub struct VersionResolver {
    settings: SettingsHandle,
}

impl VersionResolver {
    pub fn new(settings: SettingsHandle) -> Self {
        Self { settings }
    }

    pub fn resolve(&self, policy: &CachePolicy) -> Option<String> {
        Self::pick(
            &self.settings.current(),
            policy.key.feature(),
            policy.version.as_deref(),
        )
    }

    /// Same answer as [`resolve`](Self::resolve) for a policy on `key` without an
    /// explicit override. Invalidation depends on this to hit the keys reads wrote.
    pub fn resolve_for_key(&self, key: &CacheKey) -> Option<String> {
        Self::pick(&self.settings.current(), key.feature(), None)
    }

    fn pick(settings: &CacheSettings, feature: &str, explicit: Option<&str>) -> Option<String> {
        explicit
            .into_iter()
            .chain(settings.feature_versions.get(feature).map(String::as_str))
            .chain(std::iter::once(settings.global_version.as_str()))
            .find(|v| !v.is_empty())
            .map(str::to_string)
    }
}
