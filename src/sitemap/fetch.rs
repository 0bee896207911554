//! Per-URL freshness probes.
//!
//! One HEAD request per sitemap URL recovers `Last-Modified` plus the
//! crawler hint headers. Probes carry a bounded timeout so a slow upstream
//! cannot stall a sitemap build indefinitely.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

use crate::util::httpdate;

const CHANGE_FREQUENCY_HEADER: &str = "x-change-frequency";
const PRIORITY_HEADER: &str = "x-crawler-priority";

/// Crawl-frequency hints per the sitemaps.org protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeFrequency {
    Always,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
    Never,
}

impl ChangeFrequency {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeFrequency::Always => "always",
            ChangeFrequency::Hourly => "hourly",
            ChangeFrequency::Daily => "daily",
            ChangeFrequency::Weekly => "weekly",
            ChangeFrequency::Monthly => "monthly",
            ChangeFrequency::Yearly => "yearly",
            ChangeFrequency::Never => "never",
        }
    }

    /// Parse a header value; unknown values are dropped rather than failing
    /// the probe.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let all = [
            ChangeFrequency::Always,
            ChangeFrequency::Hourly,
            ChangeFrequency::Daily,
            ChangeFrequency::Weekly,
            ChangeFrequency::Monthly,
            ChangeFrequency::Yearly,
            ChangeFrequency::Never,
        ];
        all.into_iter()
            .find(|freq| raw.eq_ignore_ascii_case(freq.as_str()))
    }
}

/// Outcome of probing one URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub status: u16,
    pub last_modified: Option<OffsetDateTime>,
    pub change_frequency: Option<ChangeFrequency>,
    pub priority: Option<f32>,
}

impl ProbeOutcome {
    /// A bare status with no metadata headers.
    pub fn status_only(status: u16) -> Self {
        Self {
            status,
            last_modified: None,
            change_frequency: None,
            priority: None,
        }
    }
}

/// Transport-level probe failure (connect error, timeout). Contained per
/// URL; the build's failure policy decides whether it aborts anything.
#[derive(Debug, Error)]
#[error("HEAD {url} failed: {detail}")]
pub struct ProbeError {
    pub url: String,
    pub detail: String,
}

#[async_trait]
pub trait HeadProbe: Send + Sync {
    async fn probe(&self, url: &str) -> Result<ProbeOutcome, ProbeError>;
}

/// reqwest-backed probe.
pub struct HttpHeadProbe {
    client: reqwest::Client,
}

impl HttpHeadProbe {
    /// Build a probe whose requests are cut off after `timeout`.
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HeadProbe for HttpHeadProbe {
    async fn probe(&self, url: &str) -> Result<ProbeOutcome, ProbeError> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|err| ProbeError {
                url: url.to_string(),
                detail: err.to_string(),
            })?;

        let headers = response.headers();
        Ok(ProbeOutcome {
            status: response.status().as_u16(),
            last_modified: headers
                .get(reqwest::header::LAST_MODIFIED)
                .and_then(|value| value.to_str().ok())
                .and_then(httpdate::parse),
            change_frequency: headers
                .get(CHANGE_FREQUENCY_HEADER)
                .and_then(|value| value.to_str().ok())
                .and_then(ChangeFrequency::parse),
            priority: headers
                .get(PRIORITY_HEADER)
                .and_then(|value| value.to_str().ok())
                .and_then(|raw| raw.trim().parse::<f32>().ok())
                .map(|priority| priority.clamp(0.0, 1.0)),
        })
    }
}
