//! HTTP surface: router assembly, endpoint handlers, and response logging.
//!
//! The router carries two generated endpoints (`/sitemap.xml`,
//! `/robots.txt`) and a fallback that serves virtual content from the
//! configured content directory, so internal route rewrites have an
//! observable effect. Every route runs inside the request pipeline.

use std::{io::ErrorKind, path::PathBuf, sync::Arc, time::Instant};

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderValue, Request, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use tracing::{error, warn};
use url::Url;

use crate::{
    pipeline::{PipelineState, RequestContext, request_pipeline, require_context},
    sitemap::SitemapService,
};

#[derive(Clone)]
pub struct AppState {
    pub sitemap: Arc<SitemapService>,
    pub content_dir: PathBuf,
}

pub fn build_router(app: AppState, pipeline: PipelineState) -> Router {
    Router::new()
        .route("/sitemap.xml", get(sitemap_xml))
        .route("/robots.txt", get(robots_txt))
        .fallback(serve_virtual)
        .layer(middleware::from_fn_with_state(pipeline, request_pipeline))
        .layer(middleware::from_fn(log_responses))
        .with_state(app)
}

/// Log failed responses with their request correlation id.
pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;
    let status = response.status();

    if status.is_client_error() || status.is_server_error() {
        let elapsed_ms = start.elapsed().as_millis() as u64;
        let request_id = response
            .extensions()
            .get::<RequestContext>()
            .map(|ctx| ctx.request_id.clone())
            .unwrap_or_default();

        if status.is_server_error() {
            error!(
                target: "raffica::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                query = uri.query().unwrap_or(""),
                elapsed_ms,
                request_id,
                "request failed",
            );
        } else {
            warn!(
                target: "raffica::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                query = uri.query().unwrap_or(""),
                elapsed_ms,
                request_id,
                "client request error",
            );
        }
    }

    response
}

async fn sitemap_xml(State(app): State<AppState>, request: Request<Body>) -> Response {
    let origin = match request_origin(&request) {
        Ok(origin) => origin,
        Err(response) => return response,
    };

    match app.sitemap.sitemap_xml(&origin).await {
        Ok(bytes) => (
            [(header::CONTENT_TYPE, HeaderValue::from_static("application/xml"))],
            bytes,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "sitemap generation failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Sitemap unavailable").into_response()
        }
    }
}

async fn robots_txt(State(app): State<AppState>, request: Request<Body>) -> Response {
    let origin = match request_origin(&request) {
        Ok(origin) => origin,
        Err(response) => return response,
    };

    (
        [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"))],
        app.sitemap.robots_txt(&origin),
    )
        .into_response()
}

fn request_origin(request: &Request<Body>) -> Result<Url, Response> {
    require_context(request.extensions())
        .and_then(|ctx| ctx.origin().map(Url::clone))
        .map_err(|err| {
            error!(error = %err, "request origin unavailable");
            err.into_response()
        })
}

/// Fallback serving virtual content from the content directory. Route
/// rewrites land here with their rewritten path.
async fn serve_virtual(State(app): State<AppState>, request: Request<Body>) -> Response {
    let path = request.uri().path();
    let Some(relative) = sanitize_path(path) else {
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    };

    let full = app.content_dir.join(relative);
    match tokio::fs::read(&full).await {
        Ok(bytes) => {
            let mime = mime_guess::from_path(&full).first_or_octet_stream();
            let mut response = bytes.into_response();
            if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
                response.headers_mut().insert(header::CONTENT_TYPE, value);
            }
            response
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {
            (StatusCode::NOT_FOUND, "Not found").into_response()
        }
        Err(err) => {
            error!(error = %err, path = %full.display(), "failed to read content file");
            (StatusCode::INTERNAL_SERVER_ERROR, "Content unavailable").into_response()
        }
    }
}

/// Normalize a request path into a relative file path, rejecting traversal.
fn sanitize_path(path: &str) -> Option<PathBuf> {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() {
        return None;
    }

    let mut clean = PathBuf::new();
    for segment in trimmed.split('/') {
        if segment.is_empty() || segment == "." {
            continue;
        }
        if segment == ".." || segment.contains('\\') {
            return None;
        }
        clean.push(segment);
    }

    (clean.components().count() > 0).then_some(clean)
}
