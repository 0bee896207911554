//! Response encoding.
//!
//! Applies a negotiated [`CompressionDecision`] to an outbound response:
//! marks `Vary`, wraps the body with the matching flate2 encoder, and sets
//! `Content-Encoding`. Wrapping happens at most once per response: a marker
//! extension (and any pre-existing `Content-Encoding`) short-circuits
//! re-entrant calls.

use std::io::Write;

use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use flate2::{
    Compression,
    write::{DeflateEncoder, GzEncoder},
};
use metrics::counter;
use tracing::warn;

use super::{CompressionDecision, CompressionScheme};

/// Responses larger than this are passed through unencoded rather than
/// buffered whole.
const MAX_BUFFERED_BODY: usize = 8 * 1024 * 1024;

/// Marker recording that encoding already ran for this response.
#[derive(Debug, Clone, Copy)]
struct ResponseEncoded;

/// Apply the decision to `response`. Must run after every other header step,
/// since earlier steps may still replace the body or its headers.
pub async fn apply(decision: &CompressionDecision, mut response: Response) -> Response {
    if response.extensions().get::<ResponseEncoded>().is_some()
        || response.headers().contains_key(header::CONTENT_ENCODING)
    {
        return response;
    }
    response.extensions_mut().insert(ResponseEncoded);

    if decision.mark_headers {
        response
            .headers_mut()
            .append(header::VARY, HeaderValue::from_static("Accept-Encoding"));
    }

    let Some(encoding) = decision.scheme.content_encoding() else {
        return response;
    };
    if !has_body(response.status()) {
        return response;
    }
    if declared_length(&response) > Some(MAX_BUFFERED_BODY) {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_BUFFERED_BODY).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(error = %err, "failed to buffer response body for encoding");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    if bytes.is_empty() {
        return Response::from_parts(parts, Body::empty());
    }

    match encode(decision.scheme, &bytes) {
        Ok(encoded) => {
            parts.headers.remove(header::CONTENT_LENGTH);
            parts
                .headers
                .insert(header::CONTENT_ENCODING, HeaderValue::from_static(encoding));
            counter!("raffica_compression_applied_total").increment(1);
            Response::from_parts(parts, Body::from(encoded))
        }
        Err(err) => {
            warn!(error = %err, scheme = encoding, "response encoding failed; serving identity");
            Response::from_parts(parts, Body::from(bytes))
        }
    }
}

fn declared_length(response: &Response) -> Option<usize> {
    response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.parse().ok())
}

fn has_body(status: StatusCode) -> bool {
    !(status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
        || status.is_informational())
}

fn encode(scheme: CompressionScheme, bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    match scheme {
        CompressionScheme::Identity => Ok(bytes.to_vec()),
        CompressionScheme::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(bytes)?;
            encoder.finish()
        }
        CompressionScheme::Deflate => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(bytes)?;
            encoder.finish()
        }
    }
}
