//! Per-request context.
//!
//! Derived once at `BeginRequest` and carried as a request extension.
//! Request-scoped logic that runs without this context is a programming
//! error and fails fast with [`PipelineError::ContextUnavailable`].

use axum::http::{Extensions, Request, header};
use url::Url;
use uuid::Uuid;

use super::lifecycle::PipelineError;

#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation id, also echoed into response logs.
    pub request_id: String,
    /// Scheme + authority of the inbound request, when derivable from the
    /// `Host` header (and `X-Forwarded-Proto` behind a proxy).
    origin: Option<Url>,
    /// The request arrived from a standalone local diagnostic context
    /// (loopback host); cache-header planning is bypassed for these.
    pub is_local: bool,
}

impl RequestContext {
    pub fn from_request<B>(request: &Request<B>) -> Self {
        let host = request
            .headers()
            .get(header::HOST)
            .and_then(|value| value.to_str().ok());
        let scheme = request
            .headers()
            .get("x-forwarded-proto")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("http");

        let origin = host.and_then(|host| Url::parse(&format!("{scheme}://{host}/")).ok());
        let is_local = host.is_some_and(host_is_loopback);

        Self {
            request_id: Uuid::new_v4().to_string(),
            origin,
            is_local,
        }
    }

    /// The request origin, required for resolving relative URLs.
    pub fn origin(&self) -> Result<&Url, PipelineError> {
        self.origin.as_ref().ok_or(PipelineError::ContextUnavailable)
    }
}

/// Fetch the live request context from the extension map.
pub fn require_context(extensions: &Extensions) -> Result<&RequestContext, PipelineError> {
    extensions
        .get::<RequestContext>()
        .ok_or(PipelineError::ContextUnavailable)
}

fn host_is_loopback(host: &str) -> bool {
    let bare = if let Some(rest) = host.strip_prefix('[') {
        rest.split(']').next().unwrap_or(rest)
    } else {
        host.split(':').next().unwrap_or(host)
    };
    bare.eq_ignore_ascii_case("localhost") || bare == "127.0.0.1" || bare == "::1"
}
