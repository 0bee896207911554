//! Raffica request pipeline.
//!
//! One orchestrator middleware walks each request through a fixed,
//! non-reentrant lifecycle:
//!
//! `Start → BeginRequest → ResolveRoutes → BeforeHandler → FinalizeHeaders → End`
//!
//! - **Start**: host identity resolved once per process.
//! - **BeginRequest**: lower-level response caches bypassed.
//! - **ResolveRoutes**: canonical redirect or internal rewrite, then
//!   compression negotiation from `Accept-Encoding`.
//! - **BeforeHandler**: redirects short-circuit; filter slots installed.
//! - **FinalizeHeaders**: token finalization, cache-header planning, error
//!   interception, then compression emission, strictly in that order.
//!
//! Stage order is enforced by the [`Lifecycle`] state machine; violations
//! and missing request context are programming errors surfaced as
//! [`PipelineError`].

mod cache_headers;
mod context;
mod lifecycle;
mod middleware;
mod router;

pub use cache_headers::{CacheHeaderConfig, CacheHeaderPlan, Cacheability, apply as apply_cache_headers, plan as plan_cache_headers};
pub use context::{RequestContext, require_context};
pub use lifecycle::{Lifecycle, PipelineError, Stage};
pub use middleware::{
    HostIdentity, PipelineConfig, PipelineState, ResponseCacheBypassed, host_identity,
    request_pipeline,
};
pub use router::{RouteAction, RouteRule, RouteTable};
