//! Sitemap generation against a mock HTTP upstream.

use std::sync::Arc;
use std::time::Duration;

use url::Url;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

use raffica::{
    cache::{CacheConfig, CacheStore, SingleFlight},
    sitemap::{
        CultureConfig, FetchFailurePolicy, HttpHeadProbe, PageNode, SitemapConfig, SitemapError,
        SitemapService, StaticPageSource,
    },
};

fn page(url: &str) -> PageNode {
    PageNode {
        url: Some(url.to_string()),
        depth: None,
        pages: vec![],
    }
}

fn service(cultures: Vec<CultureConfig>, config: SitemapConfig) -> SitemapService {
    SitemapService::new(
        Arc::new(StaticPageSource::new(cultures)),
        Arc::new(HttpHeadProbe::new(Duration::from_secs(2)).expect("client builds")),
        Arc::new(SingleFlight::new(
            CacheConfig::default(),
            Arc::new(CacheStore::new()),
        )),
        config,
    )
}

#[tokio::test]
async fn two_cultures_with_fresh_and_missing_pages() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Last-Modified", "Mon, 01 Jan 2024 00:00:00 GMT"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/da"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let cultures = vec![
        CultureConfig {
            culture: "en-US".to_string(),
            pages: vec![page("/")],
        },
        CultureConfig {
            culture: "da-DK".to_string(),
            pages: vec![page("/da")],
        },
    ];
    let service = service(cultures, SitemapConfig::default());
    let origin = Url::parse(&format!("{}/", server.uri())).expect("origin");

    let first = service.sitemap_xml(&origin).await.expect("build succeeds");
    let xml = std::str::from_utf8(&first).expect("utf-8 document");

    assert_eq!(xml.matches("<url>").count(), 2);
    assert!(xml.contains("<lastmod>2024-01-01T00:00:00Z</lastmod>"));
    assert!(xml.contains("<changefreq>never</changefreq>"));

    // Within the TTL the cached bytes are served verbatim; `.expect(1)` on
    // the mocks verifies the upstream saw exactly one probe per URL.
    let second = service.sitemap_xml(&origin).await.expect("cached read");
    assert_eq!(first, second);
}

#[tokio::test]
async fn crawler_hint_headers_are_honored() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/docs"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Last-Modified", "Mon, 03 Jun 2024 12:30:00 GMT")
                .insert_header("X-Change-Frequency", "weekly")
                .insert_header("X-Crawler-Priority", "0.8"),
        )
        .mount(&server)
        .await;

    let cultures = vec![CultureConfig {
        culture: "en-US".to_string(),
        pages: vec![page("/docs")],
    }];
    let service = service(cultures, SitemapConfig::default());
    let origin = Url::parse(&format!("{}/", server.uri())).expect("origin");

    let xml = service.sitemap_xml(&origin).await.expect("build succeeds");
    let xml = std::str::from_utf8(&xml).expect("utf-8 document");

    assert!(xml.contains(
        "<lastmod>2024-06-03T12:30:00Z</lastmod><changefreq>weekly</changefreq><priority>0.8</priority>"
    ));
}

#[tokio::test]
async fn non_success_statuses_contribute_loc_only() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503).insert_header("X-Change-Frequency", "daily"))
        .mount(&server)
        .await;

    let cultures = vec![CultureConfig {
        culture: "en-US".to_string(),
        pages: vec![page("/flaky")],
    }];
    let service = service(cultures, SitemapConfig::default());
    let origin = Url::parse(&format!("{}/", server.uri())).expect("origin");

    let xml = service.sitemap_xml(&origin).await.expect("build succeeds");
    let xml = std::str::from_utf8(&xml).expect("utf-8 document");

    assert!(xml.contains(&format!("<url><loc>{}/flaky</loc></url>", server.uri())));
    assert!(!xml.contains("<changefreq>"));
}

#[tokio::test]
async fn unreachable_upstream_is_skipped_by_default() {
    // Nothing listens on the discard port, so every probe fails outright.
    let cultures = vec![CultureConfig {
        culture: "en-US".to_string(),
        pages: vec![page("http://127.0.0.1:1/page")],
    }];
    let service = service(cultures, SitemapConfig::default());
    let origin = Url::parse("http://example.org/").expect("origin");

    let xml = service.sitemap_xml(&origin).await.expect("build succeeds");
    let xml = std::str::from_utf8(&xml).expect("utf-8 document");

    assert!(xml.contains("<url><loc>http://127.0.0.1:1/page</loc></url>"));
}

#[tokio::test]
async fn unreachable_upstream_aborts_when_configured() {
    let cultures = vec![CultureConfig {
        culture: "en-US".to_string(),
        pages: vec![page("http://127.0.0.1:1/page")],
    }];
    let config = SitemapConfig {
        on_fetch_error: FetchFailurePolicy::Abort,
        ..Default::default()
    };
    let service = service(cultures, config);
    let origin = Url::parse("http://example.org/").expect("origin");

    let err = service.sitemap_xml(&origin).await.unwrap_err();
    assert!(matches!(err, SitemapError::Build(_)));
}
