//! Raffica: a lifecycle-driven HTTP request pipeline.
//!
//! Every inbound request walks a fixed lifecycle: routing and rewriting,
//! compression negotiation, cache-header planning. Expensive derived
//! artifacts (the sitemap document and its per-culture page trees) are held
//! in a process-wide cache and rebuilt at most once per expiry window, even
//! under concurrent demand.

pub mod cache;
pub mod compression;
pub mod config;
pub mod infra;
pub mod pipeline;
pub mod sitemap;
pub mod util;
