//! Cache configuration.

use serde::Deserialize;

/// Cache behavior from `raffica.toml`.
///
/// With the cache disabled, derived artifacts are rebuilt on every request
/// and nothing is retained; useful for diagnosing build problems.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable the process-wide artifact cache.
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enabled_by_default() {
        assert!(CacheConfig::default().enabled);
    }
}
