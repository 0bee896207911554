//! Cache key definitions.
//!
//! Entries are addressed by a `(CacheGroup, key)` pair: keys are unique only
//! within their group, and build locks are taken per group.

use std::borrow::Cow;
use std::fmt;

/// Namespace partition within the [`CacheStore`](super::CacheStore).
///
/// Groups keep unrelated artifacts from colliding on short keys and give the
/// build-once protocol its locking granularity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheGroup(Cow<'static, str>);

impl CacheGroup {
    /// A group with a static name, usable in `const` contexts.
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CacheGroup {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}

impl fmt::Display for CacheGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Aggregated sitemap document bytes.
pub const SITEMAP_GROUP: CacheGroup = CacheGroup::from_static("sitemap");

/// Per-culture sitemap page trees.
pub const SITEMAP_SOURCES_GROUP: CacheGroup = CacheGroup::from_static("sitemap-sources");
