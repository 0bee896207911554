//! Response compression negotiation.
//!
//! The server carries a configured preference; the client advertises what it
//! accepts. [`negotiate`] reconciles the two into a [`CompressionDecision`]
//! that the pipeline applies exactly once per request, as the last step of
//! header emission.

mod accept;
mod middleware;

pub use middleware::apply;

use serde::Deserialize;

/// Server-side compression preference, from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfiguredCompression {
    /// Compression switched off.
    None,
    /// Serve bytes unmodified.
    Identity,
    Gzip,
    Deflate,
    /// LZW `compress`; no encoder is shipped for it, so it never wraps.
    Compress,
}

/// Negotiated outcome for one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionScheme {
    Identity,
    Gzip,
    Deflate,
}

impl CompressionScheme {
    /// The `Content-Encoding` token, or `None` for identity.
    pub fn content_encoding(self) -> Option<&'static str> {
        match self {
            CompressionScheme::Identity => None,
            CompressionScheme::Gzip => Some("gzip"),
            CompressionScheme::Deflate => Some("deflate"),
        }
    }
}

/// Per-request compression decision. Request-local, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionDecision {
    pub scheme: CompressionScheme,
    /// Headers are marked for compression-aware processing in every branch,
    /// so downstream emission is uniform whether or not bytes were wrapped.
    pub mark_headers: bool,
}

/// Select the scheme for a response given the client's `Accept-Encoding`
/// and the configured preference.
///
/// An absent, unsupported, or malformed header falls back to identity; it
/// never fails the request.
pub fn negotiate(
    accept_encoding: Option<&str>,
    preference: ConfiguredCompression,
) -> CompressionDecision {
    let scheme = match preference {
        ConfiguredCompression::Gzip => client_scheme(accept_encoding, "gzip", CompressionScheme::Gzip),
        ConfiguredCompression::Deflate => {
            client_scheme(accept_encoding, "deflate", CompressionScheme::Deflate)
        }
        ConfiguredCompression::None
        | ConfiguredCompression::Identity
        | ConfiguredCompression::Compress => CompressionScheme::Identity,
    };

    CompressionDecision {
        scheme,
        mark_headers: true,
    }
}

fn client_scheme(
    accept_encoding: Option<&str>,
    token: &str,
    scheme: CompressionScheme,
) -> CompressionScheme {
    match accept_encoding.and_then(accept::parse) {
        Some(codings) if accept::allows(&codings, token) => scheme,
        _ => CompressionScheme::Identity,
    }
}
