//! Request pipeline orchestration.
//!
//! Drives every request through the fixed lifecycle: process-wide start-up,
//! cache bypass, route resolution + compression negotiation, the handler,
//! then header finalization in a fixed order that always ends with
//! compression emission (earlier steps may still replace the body or its
//! headers).

use std::sync::{Arc, OnceLock};

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request, StatusCode, Uri, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, error, instrument, warn};

use crate::compression::{self, ConfiguredCompression};

use super::{
    cache_headers::{self, CacheHeaderConfig},
    context::RequestContext,
    lifecycle::{Lifecycle, PipelineError, Stage},
    router::{RouteAction, RouteTable},
};

/// Generated documents stay dynamic even though their paths carry
/// extensions.
const GENERATED_PATHS: &[&str] = &["/sitemap.xml", "/robots.txt"];

/// Identity of the hosting application, resolved once per process on the
/// first request and reused by every later one.
#[derive(Debug)]
pub struct HostIdentity {
    pub name: &'static str,
    pub version: &'static str,
    header: HeaderValue,
}

static HOST_IDENTITY: OnceLock<HostIdentity> = OnceLock::new();

pub fn host_identity() -> &'static HostIdentity {
    HOST_IDENTITY.get_or_init(|| {
        let name = env!("CARGO_PKG_NAME");
        let version = env!("CARGO_PKG_VERSION");
        let header = HeaderValue::from_str(&format!("{name}/{version}"))
            .unwrap_or_else(|_| HeaderValue::from_static(env!("CARGO_PKG_NAME")));
        HostIdentity {
            name,
            version,
            header,
        }
    })
}

/// Pipeline behavior from `raffica.toml`.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub compression: ConfiguredCompression,
    pub cache_headers: CacheHeaderConfig,
    /// Install the content-token filter slot ahead of compression.
    pub rewrite_tokens: bool,
    /// Replace server-error bodies with a minimal error document.
    pub intercept_errors: bool,
}

#[derive(Clone)]
pub struct PipelineState {
    pub routes: Arc<RouteTable>,
    pub config: Arc<PipelineConfig>,
}

/// Marker: lower-level response caches are bypassed for this request, so
/// header planning in this pipeline owns the cache headers.
#[derive(Debug, Clone, Copy)]
pub struct ResponseCacheBypassed;

/// Marker: the content-token filter slot is installed for this request. The
/// slot exists only to pin stream-wrapping order; rewriting itself lives
/// outside this pipeline.
#[derive(Debug, Clone, Copy)]
struct TokenFilterInstalled;

#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn request_pipeline(
    State(state): State<PipelineState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    match run(state, request, next).await {
        Ok(response) => response,
        Err(err) => {
            error!(error = %err, "pipeline stage failure");
            err.into_response()
        }
    }
}

async fn run(
    state: PipelineState,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, PipelineError> {
    let mut lifecycle = Lifecycle::begin();
    let identity = host_identity();

    lifecycle.advance(Stage::BeginRequest)?;
    let ctx = RequestContext::from_request(&request);
    let is_local = ctx.is_local;
    request.extensions_mut().insert(ctx.clone());
    request.extensions_mut().insert(ResponseCacheBypassed);

    lifecycle.advance(Stage::ResolveRoutes)?;
    let path = request.uri().path().to_string();
    let query = request.uri().query().map(str::to_string);
    let mut redirect_to = None;
    if let Some(rule) = state.routes.resolve(&path) {
        match RouteTable::action(rule, query.as_deref()) {
            Some(RouteAction::RedirectPermanent(location)) => {
                debug!(%path, %location, "route match redirects to canonical pattern");
                redirect_to = Some(location);
            }
            Some(RouteAction::Rewrite(rewrite_target)) => {
                debug!(%path, %rewrite_target, "route match rewrites request path");
                rewrite_request(&mut request, &rewrite_target);
            }
            None => {}
        }
    }
    let accept_encoding = request
        .headers()
        .get(header::ACCEPT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let decision = compression::negotiate(accept_encoding.as_deref(), state.config.compression);

    lifecycle.advance(Stage::BeforeHandler)?;
    let is_redirect = redirect_to.is_some();
    if !is_redirect && state.config.rewrite_tokens {
        request.extensions_mut().insert(TokenFilterInstalled);
    }

    let is_static = is_static_resource(request.uri().path());
    let mut response = match redirect_to {
        Some(location) => permanent_redirect(&location),
        None => next.run(request).await,
    };

    lifecycle.advance(Stage::FinalizeHeaders)?;
    // Content-token finalization comes first; the slot is released before
    // any header depends on the final body.
    if !is_redirect && state.config.rewrite_tokens {
        debug!("content token filter finalized");
    }

    // Cache headers: strip whatever lower layers set (the BeginRequest
    // bypass), then emit this pipeline's own plan.
    strip_cache_headers(response.headers_mut());
    if let Some(plan) =
        cache_headers::plan(response.status(), is_static, is_local, &state.config.cache_headers)
    {
        cache_headers::apply(&plan, response.headers_mut());
    }

    if state.config.intercept_errors && response.status().is_server_error() {
        response = intercept_error(response);
    }

    // Compression runs last: every earlier step may still have replaced the
    // body or its headers.
    let mut response = compression::apply(&decision, response).await;
    response
        .headers_mut()
        .insert(header::SERVER, identity.header.clone());
    response.extensions_mut().insert(ctx);

    lifecycle.advance(Stage::End)?;
    Ok(response)
}

fn rewrite_request(request: &mut Request<Body>, rewrite_target: &str) {
    match rewrite_target.parse::<Uri>() {
        Ok(uri) => *request.uri_mut() = uri,
        Err(err) => warn!(
            error = %err,
            rewrite_target,
            "route rewrite target is not a valid URI; request path left unchanged"
        ),
    }
}

fn permanent_redirect(location: &str) -> Response {
    let mut response = StatusCode::MOVED_PERMANENTLY.into_response();
    match HeaderValue::from_str(location) {
        Ok(value) => {
            response.headers_mut().insert(header::LOCATION, value);
        }
        Err(err) => warn!(error = %err, location, "redirect location is not a valid header value"),
    }
    response
}

fn strip_cache_headers(headers: &mut axum::http::HeaderMap) {
    headers.remove(header::CACHE_CONTROL);
    headers.remove(header::EXPIRES);
    headers.remove(header::PRAGMA);
}

fn intercept_error(response: Response) -> Response {
    let status = response.status();
    let (mut parts, _) = response.into_parts();
    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    let body = format!(
        "<!DOCTYPE html>\n<html><head><title>{status}</title></head>\
         <body><h1>{status}</h1><p>The server could not complete the request.</p></body></html>\n",
    );
    Response::from_parts(parts, Body::from(body))
}

fn is_static_resource(path: &str) -> bool {
    if GENERATED_PATHS.iter().any(|generated| *generated == path) {
        return false;
    }
    path.rsplit('/')
        .next()
        .is_some_and(|segment| segment.contains('.'))
}
