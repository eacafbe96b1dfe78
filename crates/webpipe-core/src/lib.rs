//! Backend-agnostic error types, data model, and provider traits for webpipe.
//!
//! This crate has no I/O of its own: it defines the shapes that
//! `webpipe-local` implements against and `webpipe-mcp` wires up as tools.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Error kinds surfaced through the MCP transport as `error.message` strings.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("bad input: {0}")]
    BadInput(String),
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("HTTP {0}")]
    HttpError(u16),
    #[error("blocked by challenge")]
    BlockedByChallenge,
    #[error("no active session")]
    NoActiveSession,
    #[error("no session")]
    NoSession,
    #[error("timeout")]
    Timeout,
    #[error("provider error: {0}")]
    ProviderError(String),
    #[error("{0}")]
    Generic(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The code a JSON-RPC error object should carry, independent of
    /// the human-readable message.
    pub fn code(&self) -> &'static str {
        match self {
            Error::BadInput(_) => "BadInput",
            Error::UnknownTool(_) => "UnknownTool",
            Error::HttpError(_) => "HttpError",
            Error::BlockedByChallenge => "BlockedByChallenge",
            Error::NoActiveSession => "NoActiveSession",
            Error::NoSession => "NoSession",
            Error::Timeout => "Timeout",
            Error::ProviderError(_) => "ProviderError",
            Error::Generic(_) => "Generic",
        }
    }
}

// ---------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------

/// A single normalized search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
    pub source: String,
}

/// Observability record: one entry per provider attempted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchAttempt {
    pub provider: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SearchAttempt {
    pub fn ok(provider: impl Into<String>, count: usize) -> Self {
        Self { provider: provider.into(), ok: true, count: Some(count), error: None }
    }

    pub fn failed(provider: impl Into<String>, error: impl Into<String>) -> Self {
        Self { provider: provider.into(), ok: false, count: None, error: Some(error.into()) }
    }

    pub fn skipped_cooldown(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            ok: false,
            count: None,
            error: Some("skipped (rate-limited)".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub provider: String,
    pub attempts: Vec<SearchAttempt>,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn search(&self, query: &str, max_results: usize, region: Option<&str>) -> Result<SearchResponse>;
}

// ---------------------------------------------------------------------
// Page Fetcher
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedPage {
    pub url: String,
    pub title: Option<String>,
    pub html: String,
    pub text: String,
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage>;
}

// ---------------------------------------------------------------------
// Product model
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    InStock,
    OutOfStock,
    Preorder,
    Limited,
    Unavailable,
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Availability::InStock => "in_stock",
            Availability::OutOfStock => "out_of_stock",
            Availability::Preorder => "preorder",
            Availability::Limited => "limited",
            Availability::Unavailable => "unavailable",
        };
        write!(f, "{s}")
    }
}

impl Availability {
    pub fn parse_loose(s: &str) -> Option<Self> {
        let s = s.to_ascii_lowercase();
        if s.contains("instock") || s.contains("in stock") || s.contains("in_stock") {
            Some(Availability::InStock)
        } else if s.contains("outofstock") || s.contains("out of stock") || s.contains("out_of_stock") {
            Some(Availability::OutOfStock)
        } else if s.contains("preorder") || s.contains("pre-order") || s.contains("pre order") {
            Some(Availability::Preorder)
        } else if s.contains("limited") || s.contains("lowstock") || s.contains("low stock") {
            Some(Availability::Limited)
        } else if s.contains("discontinued") || s.contains("unavailable") || s.contains("currently unavailable") {
            Some(Availability::Unavailable)
        } else {
            None
        }
    }
}

/// Normalized output of the Product Extractor; immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductCandidate {
    pub url: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub key_features: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub specs: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability: Option<String>,
    pub confidence: f64,
}

impl ProductCandidate {
    pub fn empty(url: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            source: source.into(),
            name: None,
            brand: None,
            category: None,
            key_features: Vec::new(),
            images: Vec::new(),
            specs: BTreeMap::new(),
            price: None,
            currency: None,
            availability: None,
            confidence: 0.0,
        }
    }

    pub fn is_weak(&self) -> bool {
        self.name.is_none() || self.price.is_none() || self.confidence < 0.2
    }
}

// ---------------------------------------------------------------------
// Cart
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartItem {
    pub id: String,
    pub name: String,
    pub url: String,
    pub price: f64,
    pub currency: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

// ---------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedEntry {
    pub name: String,
    pub score: i64,
    pub pros: Vec<String>,
    pub cons: Vec<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompareCriteria {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_budget: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default)]
    pub use_case: String,
    #[serde(default)]
    pub preferences: Vec<String>,
}

// ---------------------------------------------------------------------
// Query constraints (orchestrator)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryConstraints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_budget: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    pub region: String,
}

// ---------------------------------------------------------------------
// Driven Browser Runtime
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserSnapshot {
    pub url: String,
    pub title: Option<String>,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollMode {
    By,
    To,
}

pub enum SelectBy {
    Value(String),
    Label(String),
    Index(usize),
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn start(&self, start_url: Option<&str>, headless: bool, timeout_ms: u64) -> Result<String>;
    async fn open(&self, url: &str, timeout_ms: u64) -> Result<String>;
    async fn click(&self, selector: &str, wait_for_navigation: bool, timeout_ms: u64) -> Result<String>;
    async fn type_text(
        &self,
        selector: &str,
        text: &str,
        append: bool,
        press_enter: bool,
        timeout_ms: u64,
    ) -> Result<String>;
    async fn select(&self, selector: &str, by: SelectBy, timeout_ms: u64) -> Result<String>;
    async fn scroll(&self, mode: ScrollMode, x: f64, y: f64) -> Result<(f64, f64)>;
    async fn wait_for(&self, selector: &str, timeout_ms: u64) -> Result<String>;
    async fn snapshot(&self, include_html: bool, max_text_chars: usize) -> Result<BrowserSnapshot>;
    async fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn availability_display_matches_wire_names() {
        assert_eq!(Availability::InStock.to_string(), "in_stock");
        assert_eq!(Availability::OutOfStock.to_string(), "out_of_stock");
    }

    #[test]
    fn availability_parse_loose_matches_schema_org_uris() {
        assert_eq!(
            Availability::parse_loose("https://schema.org/InStock"),
            Some(Availability::InStock)
        );
        assert_eq!(
            Availability::parse_loose("Currently Unavailable"),
            Some(Availability::Unavailable)
        );
    }

    #[test]
    fn product_candidate_empty_is_weak() {
        let p = ProductCandidate::empty("https://example.com/x", "example.com");
        assert!(p.is_weak());
    }
}
