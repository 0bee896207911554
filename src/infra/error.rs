use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("configuration error: {detail}")]
    Configuration { detail: String },
    #[error("telemetry error: {0}")]
    Telemetry(String),
    #[error("outbound HTTP client error: {detail}")]
    HttpClient { detail: String },
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl InfraError {
    pub fn configuration(detail: impl Into<String>) -> Self {
        Self::Configuration {
            detail: detail.into(),
        }
    }

    pub fn telemetry(detail: impl Into<String>) -> Self {
        Self::Telemetry(detail.into())
    }

    pub fn http_client(detail: impl Into<String>) -> Self {
        Self::HttpClient {
            detail: detail.into(),
        }
    }
}
