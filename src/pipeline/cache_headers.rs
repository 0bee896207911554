//! Cache-control header planning.
//!
//! Computes one [`CacheHeaderPlan`] per response and applies it once.
//! Planning rules, in priority order:
//!
//! 1. Redirects (301/302) always disable client-side caching, whatever the
//!    other inputs say.
//! 2. Standalone-local diagnostic requests skip expiry headers entirely.
//! 3. Static content gets the long configured duration; dynamic content the
//!    short one. Both are expressed as an absolute `Expires` plus a
//!    `Cache-Control` max-age.
//!
//! The orchestrator runs planning after the compression decision is final
//! and before compression emits its headers; that ordering is an invariant,
//! not a preference.

use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use serde::Deserialize;
use time::OffsetDateTime;

use crate::util::httpdate;

const DEFAULT_STATIC_DURATION_SECS: u64 = 86_400;
const DEFAULT_DYNAMIC_DURATION_SECS: u64 = 300;

/// Expiry-header configuration from `raffica.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheHeaderConfig {
    /// Emit expiry headers for static resources.
    pub enable_static: bool,
    /// Emit expiry headers for dynamic responses.
    pub enable_dynamic: bool,
    /// Freshness window for static resources, in seconds.
    pub static_duration_secs: u64,
    /// Freshness window for dynamic responses, in seconds.
    pub dynamic_duration_secs: u64,
}

impl Default for CacheHeaderConfig {
    fn default() -> Self {
        Self {
            enable_static: true,
            enable_dynamic: true,
            static_duration_secs: DEFAULT_STATIC_DURATION_SECS,
            dynamic_duration_secs: DEFAULT_DYNAMIC_DURATION_SECS,
        }
    }
}

/// How the client may cache this response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cacheability {
    /// Caching disabled outright (redirects).
    Disabled,
    /// Cacheable by the requesting client only.
    Private,
    /// Cacheable by shared caches.
    Public,
}

/// Computed per response, applied once, discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHeaderPlan {
    pub cacheability: Cacheability,
    pub duration: Duration,
    pub is_static: bool,
}

impl CacheHeaderPlan {
    fn disabled() -> Self {
        Self {
            cacheability: Cacheability::Disabled,
            duration: Duration::ZERO,
            is_static: false,
        }
    }
}

/// Compute the plan for one response. `None` means no cache headers are
/// emitted at all (local bypass, or the matching planner is disabled).
pub fn plan(
    status: StatusCode,
    is_static: bool,
    is_local: bool,
    config: &CacheHeaderConfig,
) -> Option<CacheHeaderPlan> {
    if status == StatusCode::MOVED_PERMANENTLY || status == StatusCode::FOUND {
        return Some(CacheHeaderPlan::disabled());
    }
    if is_local {
        return None;
    }

    if is_static {
        config.enable_static.then(|| CacheHeaderPlan {
            cacheability: Cacheability::Public,
            duration: Duration::from_secs(config.static_duration_secs),
            is_static: true,
        })
    } else {
        config.enable_dynamic.then(|| CacheHeaderPlan {
            cacheability: Cacheability::Private,
            duration: Duration::from_secs(config.dynamic_duration_secs),
            is_static: false,
        })
    }
}

/// Write the plan into the response headers.
pub fn apply(plan: &CacheHeaderPlan, headers: &mut HeaderMap) {
    let scope = match plan.cacheability {
        Cacheability::Disabled => {
            headers.insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static("no-cache, no-store"),
            );
            headers.remove(header::EXPIRES);
            return;
        }
        Cacheability::Private => "private",
        Cacheability::Public => "public",
    };

    let max_age = plan.duration.as_secs();
    if let Ok(value) = HeaderValue::from_str(&format!("{scope}, max-age={max_age}")) {
        headers.insert(header::CACHE_CONTROL, value);
    }
    if let Some(expires) = expires_value(plan.duration) {
        headers.insert(header::EXPIRES, expires);
    }
}

fn expires_value(duration: Duration) -> Option<HeaderValue> {
    let at = OffsetDateTime::now_utc() + duration;
    let formatted = httpdate::format(at)?;
    HeaderValue::from_str(&formatted).ok()
}
