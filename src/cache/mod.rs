//! Raffica cache subsystem.
//!
//! Derived artifacts (sitemap documents, per-culture page trees) are held in
//! a process-wide [`CacheStore`] and populated through the [`SingleFlight`]
//! build-once protocol:
//!
//! - **Store**: `(group, key)` → typed value, optional TTL, expiry enforced
//!   lazily on lookup.
//! - **Single flight**: check → per-group lock → re-check → build → insert,
//!   so a cold artifact is built once even under concurrent demand.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! ```

mod config;
mod keys;
mod lock;
mod single_flight;
mod store;

pub use config::CacheConfig;
pub use keys::{CacheGroup, SITEMAP_GROUP, SITEMAP_SOURCES_GROUP};
pub use single_flight::{BuildError, SingleFlight, SingleFlightError};
pub use store::{CacheStore, StoreError};
