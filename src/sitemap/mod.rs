//! Sitemap generation.
//!
//! Builds one sitemaps.org `<urlset>` document covering every configured
//! culture and serves it from the cache: the aggregated bytes live four
//! hours, the per-culture page trees eight, both populated through the
//! build-once protocol so concurrent cold requests trigger a single build.
//!
//! Each page URL gets one HEAD probe to recover freshness metadata. Probe
//! failures are contained per URL; whether they skip the entry or abort the
//! build is a configured policy, and a whole-build deadline bounds the probe
//! loop either way.

mod fetch;
mod source;

pub use fetch::{ChangeFrequency, HeadProbe, HttpHeadProbe, ProbeError, ProbeOutcome};
pub use source::{CultureConfig, CultureSource, PageNode, PageSource, SourceError, StaticPageSource};

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use metrics::{counter, histogram};
use serde::Deserialize;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{
    BuildError, SITEMAP_GROUP, SITEMAP_SOURCES_GROUP, SingleFlight, SingleFlightError,
};

const SITEMAP_KEY: &str = "sitemap.xml";

const URLSET_OPEN: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n";
const URLSET_CLOSE: &str = "</urlset>\n";

const DEFAULT_TTL_SECS: u64 = 4 * 60 * 60;
const DEFAULT_SOURCE_TTL_SECS: u64 = 8 * 60 * 60;
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;
const DEFAULT_BUILD_DEADLINE_SECS: u64 = 30;

/// What to do when a freshness probe fails at the transport level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchFailurePolicy {
    /// Emit the entry with `<loc>` only and keep going (default).
    Skip,
    /// Fail the whole build; nothing is cached, the next request retries.
    Abort,
}

/// Sitemap configuration from `raffica.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SitemapConfig {
    /// Lifetime of the aggregated document, in seconds.
    pub ttl_secs: u64,
    /// Lifetime of each culture's page tree, in seconds.
    pub source_ttl_secs: u64,
    /// Per-probe HEAD timeout, in seconds.
    pub probe_timeout_secs: u64,
    /// Upper bound on one build's probe loop, in seconds. Pages past the
    /// deadline are emitted `<loc>`-only without probing.
    pub build_deadline_secs: u64,
    pub on_fetch_error: FetchFailurePolicy,
}

impl Default for SitemapConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_TTL_SECS,
            source_ttl_secs: DEFAULT_SOURCE_TTL_SECS,
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
            build_deadline_secs: DEFAULT_BUILD_DEADLINE_SECS,
            on_fetch_error: FetchFailurePolicy::Skip,
        }
    }
}

impl SitemapConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

#[derive(Debug, Error)]
pub enum SitemapError {
    #[error("sitemap build failed: {0}")]
    Build(String),
    #[error("sitemap cache lookup failed: {0}")]
    Cache(String),
}

impl From<SingleFlightError> for SitemapError {
    fn from(err: SingleFlightError) -> Self {
        match err {
            SingleFlightError::Build { source, .. } => SitemapError::Build(source.to_string()),
            err @ SingleFlightError::Store(_) => SitemapError::Cache(err.to_string()),
        }
    }
}

/// Service producing the cached sitemap document and its robots.txt
/// companion.
pub struct SitemapService {
    sources: Arc<dyn PageSource>,
    probe: Arc<dyn HeadProbe>,
    cache: Arc<SingleFlight>,
    config: SitemapConfig,
}

impl SitemapService {
    pub fn new(
        sources: Arc<dyn PageSource>,
        probe: Arc<dyn HeadProbe>,
        cache: Arc<SingleFlight>,
        config: SitemapConfig,
    ) -> Self {
        Self {
            sources,
            probe,
            cache,
            config,
        }
    }

    /// The serialized `<urlset>` document, built at most once per cache
    /// window. `origin` resolves relative page URLs against the current
    /// request's scheme, host, and port.
    pub async fn sitemap_xml(&self, origin: &Url) -> Result<Bytes, SitemapError> {
        let bytes = self
            .cache
            .get_or_build::<Bytes, _, _>(
                &SITEMAP_GROUP,
                SITEMAP_KEY,
                Some(Duration::from_secs(self.config.ttl_secs)),
                || self.build_document(origin),
            )
            .await?;
        Ok((*bytes).clone())
    }

    /// robots.txt advertising the sitemap endpoint.
    pub fn robots_txt(&self, origin: &Url) -> String {
        let base = origin.as_str().trim_end_matches('/');
        format!("User-agent: *\nAllow: /\nSitemap: {base}/sitemap.xml\n")
    }

    /// Drop the cached document and every culture tree; the next request
    /// rebuilds from scratch.
    pub fn invalidate(&self) {
        let store = self.cache.store();
        store.remove(&SITEMAP_GROUP, SITEMAP_KEY);
        for culture in self.sources.cultures() {
            store.remove(&SITEMAP_SOURCES_GROUP, &culture);
        }
    }

    async fn build_document(&self, origin: &Url) -> Result<Bytes, BuildError> {
        let started = Instant::now();
        let deadline = started + Duration::from_secs(self.config.build_deadline_secs);
        let mut deadline_logged = false;

        let mut xml = String::from(URLSET_OPEN);

        for culture in self.sources.cultures() {
            let tree = self
                .cache
                .get_or_build::<CultureSource, _, _>(
                    &SITEMAP_SOURCES_GROUP,
                    &culture,
                    Some(Duration::from_secs(self.config.source_ttl_secs)),
                    || async {
                        let mut tree = self.sources.load(&culture).await?;
                        tree.ensure_depths();
                        Ok(tree)
                    },
                )
                .await?;

            for page in tree.walk() {
                // Pages without a URL are containers; nothing to emit.
                let Some(raw) = page.url.as_deref() else {
                    continue;
                };
                let Some(loc) = resolve_url(origin, raw) else {
                    warn!(culture = %culture, url = raw, "unresolvable page URL skipped");
                    continue;
                };

                if Instant::now() >= deadline {
                    if !deadline_logged {
                        warn!(
                            culture = %culture,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "sitemap build deadline reached; remaining pages emitted without probing"
                        );
                        deadline_logged = true;
                    }
                    xml.push_str(&url_entry(&loc, None));
                    continue;
                }

                match self.probe.probe(&loc).await {
                    Ok(outcome) => xml.push_str(&url_entry(&loc, Some(&outcome))),
                    Err(err) => {
                        counter!("raffica_sitemap_probe_failure_total").increment(1);
                        match self.config.on_fetch_error {
                            FetchFailurePolicy::Skip => {
                                warn!(error = %err, "freshness probe failed; entry emitted without metadata");
                                xml.push_str(&url_entry(&loc, None));
                            }
                            FetchFailurePolicy::Abort => return Err(err.into()),
                        }
                    }
                }
            }
        }

        xml.push_str(URLSET_CLOSE);

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        histogram!("raffica_sitemap_build_ms").record(elapsed_ms);
        debug!(bytes = xml.len(), elapsed_ms, "sitemap document built");

        Ok(Bytes::from(xml))
    }
}

/// Absolute URLs pass through unchanged; relative ones are joined with the
/// request origin.
fn resolve_url(origin: &Url, raw: &str) -> Option<String> {
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return Some(raw.to_string());
    }
    origin.join(raw).ok().map(String::from)
}

fn url_entry(loc: &str, outcome: Option<&ProbeOutcome>) -> String {
    let mut entry = format!("  <url><loc>{}</loc>", xml_escape(loc));
    if let Some(outcome) = outcome {
        match outcome.status {
            200 => {
                if let Some(lastmod) = outcome
                    .last_modified
                    .and_then(|at| at.format(&Rfc3339).ok())
                {
                    entry.push_str(&format!("<lastmod>{lastmod}</lastmod>"));
                }
                if let Some(freq) = outcome.change_frequency {
                    entry.push_str(&format!("<changefreq>{}</changefreq>", freq.as_str()));
                }
                if let Some(priority) = outcome.priority {
                    entry.push_str(&format!("<priority>{priority:.1}</priority>"));
                }
            }
            404 => entry.push_str("<changefreq>never</changefreq>"),
            // Other statuses contribute the mandatory <loc> only.
            _ => {}
        }
    }
    entry.push_str("</url>\n");
    entry
}

fn xml_escape(raw: &str) -> String {
    raw.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use time::macros::datetime;

    use crate::cache::{CacheConfig, CacheStore};

    use super::*;

    struct ScriptedProbe {
        outcomes: HashMap<String, ProbeOutcome>,
        failures: HashSet<String>,
        calls: AtomicUsize,
    }

    impl ScriptedProbe {
        fn new() -> Self {
            Self {
                outcomes: HashMap::new(),
                failures: HashSet::new(),
                calls: AtomicUsize::new(0),
            }
        }

        fn with_outcome(mut self, url: &str, outcome: ProbeOutcome) -> Self {
            self.outcomes.insert(url.to_string(), outcome);
            self
        }

        fn with_failure(mut self, url: &str) -> Self {
            self.failures.insert(url.to_string());
            self
        }
    }

    #[async_trait]
    impl HeadProbe for ScriptedProbe {
        async fn probe(&self, url: &str) -> Result<ProbeOutcome, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures.contains(url) {
                return Err(ProbeError {
                    url: url.to_string(),
                    detail: "connection refused".to_string(),
                });
            }
            Ok(self
                .outcomes
                .get(url)
                .cloned()
                .unwrap_or_else(|| ProbeOutcome::status_only(200)))
        }
    }

    struct CountingSource {
        inner: StaticPageSource,
        loads: AtomicUsize,
    }

    #[async_trait]
    impl PageSource for CountingSource {
        fn cultures(&self) -> Vec<String> {
            self.inner.cultures()
        }

        async fn load(&self, culture: &str) -> Result<CultureSource, SourceError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.inner.load(culture).await
        }
    }

    fn page(url: &str) -> PageNode {
        PageNode {
            url: Some(url.to_string()),
            depth: None,
            pages: vec![],
        }
    }

    fn two_culture_source() -> Vec<CultureConfig> {
        vec![
            CultureConfig {
                culture: "en-US".to_string(),
                pages: vec![page("/")],
            },
            CultureConfig {
                culture: "da-DK".to_string(),
                pages: vec![page("/da")],
            },
        ]
    }

    fn service(
        cultures: Vec<CultureConfig>,
        probe: ScriptedProbe,
        config: SitemapConfig,
    ) -> SitemapService {
        SitemapService::new(
            Arc::new(StaticPageSource::new(cultures)),
            Arc::new(probe),
            Arc::new(SingleFlight::new(
                CacheConfig::default(),
                Arc::new(CacheStore::new()),
            )),
            config,
        )
    }

    fn origin() -> Url {
        Url::parse("http://example.org/").expect("valid origin")
    }

    #[tokio::test]
    async fn two_cultures_with_fresh_and_missing_pages() {
        let probe = ScriptedProbe::new()
            .with_outcome(
                "http://example.org/",
                ProbeOutcome {
                    status: 200,
                    last_modified: Some(datetime!(2024-01-01 00:00:00 UTC)),
                    change_frequency: None,
                    priority: None,
                },
            )
            .with_outcome("http://example.org/da", ProbeOutcome::status_only(404));
        let service = service(two_culture_source(), probe, SitemapConfig::default());

        let xml = service.sitemap_xml(&origin()).await.expect("build succeeds");
        let xml = std::str::from_utf8(&xml).expect("utf-8 document");

        assert_eq!(xml.matches("<url>").count(), 2);
        assert!(xml.contains(
            "<url><loc>http://example.org/</loc><lastmod>2024-01-01T00:00:00Z</lastmod></url>"
        ));
        assert!(xml.contains(
            "<url><loc>http://example.org/da</loc><changefreq>never</changefreq></url>"
        ));
        assert!(xml.starts_with(URLSET_OPEN));
        assert!(xml.ends_with(URLSET_CLOSE));
    }

    #[tokio::test]
    async fn repeated_builds_within_ttl_are_byte_identical() {
        let probe = ScriptedProbe::new();
        let service = service(two_culture_source(), probe, SitemapConfig::default());

        let first = service.sitemap_xml(&origin()).await.expect("first build");
        let second = service.sitemap_xml(&origin()).await.expect("cached read");

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn cached_document_skips_probing() {
        let probe = Arc::new(ScriptedProbe::new());
        let service = SitemapService::new(
            Arc::new(StaticPageSource::new(two_culture_source())),
            Arc::clone(&probe) as Arc<dyn HeadProbe>,
            Arc::new(SingleFlight::new(
                CacheConfig::default(),
                Arc::new(CacheStore::new()),
            )),
            SitemapConfig::default(),
        );

        service.sitemap_xml(&origin()).await.expect("first build");
        let probes_after_first = probe.calls.load(Ordering::SeqCst);
        service.sitemap_xml(&origin()).await.expect("cached read");

        assert_eq!(probe.calls.load(Ordering::SeqCst), probes_after_first);
    }

    #[tokio::test]
    async fn culture_trees_survive_document_invalidation() {
        let source = Arc::new(CountingSource {
            inner: StaticPageSource::new(two_culture_source()),
            loads: AtomicUsize::new(0),
        });
        let cache = Arc::new(SingleFlight::new(
            CacheConfig::default(),
            Arc::new(CacheStore::new()),
        ));
        let service = SitemapService::new(
            Arc::clone(&source) as Arc<dyn PageSource>,
            Arc::new(ScriptedProbe::new()),
            Arc::clone(&cache),
            SitemapConfig::default(),
        );

        service.sitemap_xml(&origin()).await.expect("first build");
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);

        // Dropping only the aggregate forces a rebuild that reuses the
        // longer-lived culture trees.
        cache.store().remove(&SITEMAP_GROUP, SITEMAP_KEY);
        service.sitemap_xml(&origin()).await.expect("rebuild");
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_probe_is_skipped_under_default_policy() {
        let probe = ScriptedProbe::new().with_failure("http://example.org/da");
        let service = service(two_culture_source(), probe, SitemapConfig::default());

        let xml = service.sitemap_xml(&origin()).await.expect("build succeeds");
        let xml = std::str::from_utf8(&xml).expect("utf-8 document");

        assert_eq!(xml.matches("<url>").count(), 2);
        assert!(xml.contains("<url><loc>http://example.org/da</loc></url>"));
    }

    #[tokio::test]
    async fn failed_probe_aborts_build_under_abort_policy() {
        let probe = ScriptedProbe::new().with_failure("http://example.org/da");
        let config = SitemapConfig {
            on_fetch_error: FetchFailurePolicy::Abort,
            ..Default::default()
        };
        let service = service(two_culture_source(), probe, config);

        let err = service.sitemap_xml(&origin()).await.unwrap_err();
        assert!(matches!(err, SitemapError::Build(_)));
        assert!(!service.cache.store().contains_key(&SITEMAP_GROUP, SITEMAP_KEY));
    }

    #[tokio::test]
    async fn deadline_exhaustion_emits_remaining_entries_without_probing() {
        let probe = Arc::new(ScriptedProbe::new());
        let config = SitemapConfig {
            build_deadline_secs: 0,
            ..Default::default()
        };
        let service = SitemapService::new(
            Arc::new(StaticPageSource::new(two_culture_source())),
            Arc::clone(&probe) as Arc<dyn HeadProbe>,
            Arc::new(SingleFlight::new(
                CacheConfig::default(),
                Arc::new(CacheStore::new()),
            )),
            config,
        );

        let xml = service.sitemap_xml(&origin()).await.expect("build succeeds");
        let xml = std::str::from_utf8(&xml).expect("utf-8 document");

        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
        assert_eq!(xml.matches("<url>").count(), 2);
        assert!(xml.contains("<url><loc>http://example.org/</loc></url>"));
    }

    #[tokio::test]
    async fn absolute_urls_pass_through_and_containers_are_skipped() {
        let cultures = vec![CultureConfig {
            culture: "en-US".to_string(),
            pages: vec![PageNode {
                url: None,
                depth: None,
                pages: vec![page("https://cdn.example.net/landing")],
            }],
        }];
        let probe = ScriptedProbe::new();
        let service = service(cultures, probe, SitemapConfig::default());

        let xml = service.sitemap_xml(&origin()).await.expect("build succeeds");
        let xml = std::str::from_utf8(&xml).expect("utf-8 document");

        assert_eq!(xml.matches("<url>").count(), 1);
        assert!(xml.contains("<loc>https://cdn.example.net/landing</loc>"));
    }

    #[tokio::test]
    async fn probe_metadata_is_emitted_in_protocol_order() {
        let probe = ScriptedProbe::new().with_outcome(
            "http://example.org/",
            ProbeOutcome {
                status: 200,
                last_modified: Some(datetime!(2024-06-03 12:30:00 UTC)),
                change_frequency: Some(ChangeFrequency::Weekly),
                priority: Some(0.8),
            },
        );
        let cultures = vec![CultureConfig {
            culture: "en-US".to_string(),
            pages: vec![page("/")],
        }];
        let service = service(cultures, probe, SitemapConfig::default());

        let xml = service.sitemap_xml(&origin()).await.expect("build succeeds");
        let xml = std::str::from_utf8(&xml).expect("utf-8 document");

        assert!(xml.contains(
            "<lastmod>2024-06-03T12:30:00Z</lastmod><changefreq>weekly</changefreq><priority>0.8</priority>"
        ));
    }

    #[tokio::test]
    async fn invalidate_forces_full_rebuild() {
        let source = Arc::new(CountingSource {
            inner: StaticPageSource::new(two_culture_source()),
            loads: AtomicUsize::new(0),
        });
        let cache = Arc::new(SingleFlight::new(
            CacheConfig::default(),
            Arc::new(CacheStore::new()),
        ));
        let service = SitemapService::new(
            Arc::clone(&source) as Arc<dyn PageSource>,
            Arc::new(ScriptedProbe::new()),
            cache,
            SitemapConfig::default(),
        );

        service.sitemap_xml(&origin()).await.expect("first build");
        service.invalidate();
        service.sitemap_xml(&origin()).await.expect("rebuild");

        assert_eq!(source.loads.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn robots_txt_points_at_sitemap() {
        let probe = ScriptedProbe::new();
        let service = service(two_culture_source(), probe, SitemapConfig::default());
        assert_eq!(
            service.robots_txt(&origin()),
            "User-agent: *\nAllow: /\nSitemap: http://example.org/sitemap.xml\n"
        );
    }

    #[test]
    fn other_statuses_contribute_loc_only() {
        let outcome = ProbeOutcome {
            status: 503,
            last_modified: Some(datetime!(2024-01-01 00:00:00 UTC)),
            change_frequency: Some(ChangeFrequency::Daily),
            priority: Some(0.5),
        };
        assert_eq!(
            url_entry("http://example.org/x", Some(&outcome)),
            "  <url><loc>http://example.org/x</loc></url>\n"
        );
    }

    #[test]
    fn loc_is_escaped() {
        let entry = url_entry("http://example.org/?a=1&b=2", None);
        assert!(entry.contains("<loc>http://example.org/?a=1&amp;b=2</loc>"));
    }
}
