//! URL routing.
//!
//! Maps public URI patterns to internal virtual paths. A matched route
//! either redirects the client to the canonical pattern (when the target is
//! a physical file served by a registered handler) or rewrites the request
//! path internally with no client-visible change. The original query string
//! survives both paths.

use serde::Deserialize;

/// One routing rule from configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteRule {
    /// Canonical public pattern, e.g. `/about`.
    pub pattern: String,
    /// Internal virtual path the pattern maps to, e.g. `/content/about.html`.
    pub virtual_path: String,
    /// The route is served by a registered handler.
    #[serde(default)]
    pub is_handler_route: bool,
    /// The virtual path exists as a physical file.
    #[serde(default)]
    pub has_physical_file: bool,
}

/// What the pipeline does with a matched route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteAction {
    /// 301 to the canonical pattern (plus the original query).
    RedirectPermanent(String),
    /// Internal rewrite to the virtual path (plus the original query).
    Rewrite(String),
}

#[derive(Debug, Default)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
}

impl RouteTable {
    pub fn new(rules: Vec<RouteRule>) -> Self {
        Self { rules }
    }

    /// Match a request path against the table. Patterns compare
    /// case-insensitively so `/About` still resolves (and then redirects to
    /// its canonical casing).
    pub fn resolve(&self, path: &str) -> Option<&RouteRule> {
        self.rules
            .iter()
            .find(|rule| rule.pattern.eq_ignore_ascii_case(path))
    }

    /// Decide the action for a matched rule.
    ///
    /// Physical file + handler → permanent redirect to the canonical
    /// pattern; no physical file → internal rewrite to the virtual path;
    /// physical file without a handler needs neither.
    pub fn action(rule: &RouteRule, query: Option<&str>) -> Option<RouteAction> {
        let suffix = query.map(|q| format!("?{q}")).unwrap_or_default();
        if rule.has_physical_file && rule.is_handler_route {
            Some(RouteAction::RedirectPermanent(format!(
                "{}{suffix}",
                rule.pattern
            )))
        } else if !rule.has_physical_file {
            Some(RouteAction::Rewrite(format!("{}{suffix}", rule.virtual_path)))
        } else {
            None
        }
    }
}
