//! Sitemap page sources.
//!
//! A [`PageSource`] supplies the per-culture page trees the sitemap is
//! built from. Trees are read-only inputs owned by the surrounding site
//! configuration; this module only normalizes them (depth attributes) and
//! walks them in document order.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// One page node in a culture's tree.
///
/// URLs may be absolute or relative to the request origin. A node without a
/// URL is a container only and never emits a sitemap entry, though its
/// children still do.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PageNode {
    #[serde(default)]
    pub url: Option<String>,
    /// Nesting depth; filled from ancestry when the source omits it.
    #[serde(default)]
    pub depth: Option<u32>,
    #[serde(default)]
    pub pages: Vec<PageNode>,
}

/// The page tree for one culture.
#[derive(Debug, Clone, PartialEq)]
pub struct CultureSource {
    pub culture: String,
    pub pages: Vec<PageNode>,
}

impl CultureSource {
    /// Fill missing `depth` attributes lazily: a node's depth is the number
    /// of page ancestors above it, so top-level pages sit at depth zero.
    /// Depths already present in the source are kept.
    pub fn ensure_depths(&mut self) {
        fn fill(nodes: &mut [PageNode], depth: u32) {
            for node in nodes {
                if node.depth.is_none() {
                    node.depth = Some(depth);
                }
                fill(&mut node.pages, depth + 1);
            }
        }
        fill(&mut self.pages, 0);
    }

    /// All nodes, depth-first in document order.
    pub fn walk(&self) -> Vec<&PageNode> {
        fn visit<'a>(nodes: &'a [PageNode], out: &mut Vec<&'a PageNode>) {
            for node in nodes {
                out.push(node);
                visit(&node.pages, out);
            }
        }
        let mut out = Vec::new();
        visit(&self.pages, &mut out);
        out
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("culture `{culture}` is not configured")]
    UnknownCulture { culture: String },
}

/// Supplies per-culture page trees.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Configured culture tags, in the order their subtrees appear in the
    /// aggregated document.
    fn cultures(&self) -> Vec<String>;

    async fn load(&self, culture: &str) -> Result<CultureSource, SourceError>;
}

/// One culture's tree as declared in `raffica.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct CultureConfig {
    pub culture: String,
    #[serde(default)]
    pub pages: Vec<PageNode>,
}

/// Page trees defined directly in configuration.
pub struct StaticPageSource {
    cultures: Vec<CultureConfig>,
}

impl StaticPageSource {
    pub fn new(cultures: Vec<CultureConfig>) -> Self {
        Self { cultures }
    }
}

#[async_trait]
impl PageSource for StaticPageSource {
    fn cultures(&self) -> Vec<String> {
        self.cultures
            .iter()
            .map(|culture| culture.culture.clone())
            .collect()
    }

    async fn load(&self, culture: &str) -> Result<CultureSource, SourceError> {
        self.cultures
            .iter()
            .find(|config| config.culture == culture)
            .map(|config| CultureSource {
                culture: config.culture.clone(),
                pages: config.pages.clone(),
            })
            .ok_or_else(|| SourceError::UnknownCulture {
                culture: culture.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(url: Option<&str>, pages: Vec<PageNode>) -> PageNode {
        PageNode {
            url: url.map(str::to_string),
            depth: None,
            pages,
        }
    }

    #[test]
    fn depths_fill_from_ancestry() {
        let mut source = CultureSource {
            culture: "en-US".to_string(),
            pages: vec![page(
                Some("/"),
                vec![page(Some("/docs"), vec![page(Some("/docs/install"), vec![])])],
            )],
        };
        source.ensure_depths();

        let nodes = source.walk();
        assert_eq!(nodes[0].depth, Some(0));
        assert_eq!(nodes[1].depth, Some(1));
        assert_eq!(nodes[2].depth, Some(2));
    }

    #[test]
    fn present_depths_are_kept() {
        let mut source = CultureSource {
            culture: "en-US".to_string(),
            pages: vec![PageNode {
                url: Some("/".to_string()),
                depth: Some(7),
                pages: vec![],
            }],
        };
        source.ensure_depths();
        assert_eq!(source.pages[0].depth, Some(7));
    }

    #[test]
    fn walk_is_depth_first_document_order() {
        let source = CultureSource {
            culture: "en-US".to_string(),
            pages: vec![
                page(Some("/a"), vec![page(Some("/a/1"), vec![])]),
                page(Some("/b"), vec![]),
            ],
        };
        let urls: Vec<_> = source
            .walk()
            .into_iter()
            .filter_map(|node| node.url.as_deref())
            .collect();
        assert_eq!(urls, vec!["/a", "/a/1", "/b"]);
    }

    #[tokio::test]
    async fn static_source_loads_configured_cultures() {
        let source = StaticPageSource::new(vec![CultureConfig {
            culture: "da-DK".to_string(),
            pages: vec![page(Some("/"), vec![])],
        }]);

        assert_eq!(source.cultures(), vec!["da-DK".to_string()]);
        let tree = source.load("da-DK").await.expect("configured culture");
        assert_eq!(tree.pages.len(), 1);

        let err = source.load("fr-FR").await.unwrap_err();
        assert!(matches!(err, SourceError::UnknownCulture { .. }));
    }
}
