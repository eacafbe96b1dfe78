//! Search Fallback Engine: DDG HTML/Lite, Bing HTML, and a synthetic
//! merchant-link fallback, each behind a process-wide rate-limit cooldown.

use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use webpipe_core::{Result, SearchAttempt, SearchProvider, SearchResponse, SearchResult};

const DESKTOP_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
const PROVIDER_TIMEOUT: Duration = Duration::from_secs(20);
const COOLDOWN_SECS: u64 = 60;

static BLOCKLIST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)duckduckgo\.com$|bing\.com$|doubleclick|googleadservices|googleads|taboola|outbrain|coldest\.com")
        .unwrap()
});

static RATE_LIMIT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)HTTP 403|HTTP 429|rate.?limit|too many requests").unwrap());

fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Process-wide, monotonically-advancing cooldown timestamp for one
/// provider pool (shared between DDG HTML and DDG Lite).
#[derive(Debug, Default)]
pub struct Cooldown(AtomicU64);

impl Cooldown {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn is_cooling_down(&self) -> bool {
        now_epoch_secs() < self.0.load(Ordering::Relaxed)
    }

    pub fn trip(&self) {
        let until = now_epoch_secs() + COOLDOWN_SECS;
        // Monotonic: never move the deadline backwards.
        let mut cur = self.0.load(Ordering::Relaxed);
        while until > cur {
            match self
                .0
                .compare_exchange(cur, until, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
    }
}

static DDG_COOLDOWN: Cooldown = Cooldown::new();
static BING_COOLDOWN: Cooldown = Cooldown::new();

fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_default()
}

fn is_blocked_host(url: &str) -> bool {
    BLOCKLIST.is_match(&host_of(url))
}

fn unwrap_ddg_redirect(href: &str) -> Option<String> {
    let u = url::Url::parse(href)
        .ok()
        .or_else(|| url::Url::parse(&format!("https://duckduckgo.com{href}")).ok())?;
    if let Some((_, v)) = u.query_pairs().find(|(k, _)| k == "uddg") {
        return Some(v.to_string());
    }
    if !u.host_str().map(|h| h.contains("duckduckgo")).unwrap_or(false) {
        return Some(u.to_string());
    }
    None
}

fn dedup_by_url(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen = std::collections::BTreeSet::new();
    let mut out = Vec::new();
    for r in results {
        if is_blocked_host(&r.url) {
            continue;
        }
        if seen.insert(r.url.clone()) {
            out.push(r);
        }
    }
    out
}

/// Last-resort parse: scan every anchor with an absolute http(s) href and a
/// non-trivial text node, used when a provider-specific parser found nothing.
fn generic_anchor_scan(html: &str) -> Vec<SearchResult> {
    let doc = html_scraper::Html::parse_document(html);
    let Ok(sel) = html_scraper::Selector::parse("a[href]") else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for el in doc.select(&sel) {
        let Some(href) = el.value().attr("href") else { continue };
        let url = match unwrap_ddg_redirect(href) {
            Some(u) => u,
            None => href.to_string(),
        };
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            continue;
        }
        let title = el.text().collect::<Vec<_>>().join(" ").trim().to_string();
        if title.len() < 3 {
            continue;
        }
        out.push(SearchResult { title, url: url.clone(), snippet: String::new(), source: host_of(&url) });
    }
    out
}

fn parse_ddg_html(html: &str) -> Vec<SearchResult> {
    let doc = html_scraper::Html::parse_document(html);
    let Ok(result_sel) = html_scraper::Selector::parse(".result, .web-result") else {
        return generic_anchor_scan(html);
    };
    let link_sel = html_scraper::Selector::parse(".result__a, .result__url").unwrap();
    let snippet_sel = html_scraper::Selector::parse(".result__snippet").unwrap();

    let mut out = Vec::new();
    for block in doc.select(&result_sel) {
        let Some(link) = block.select(&link_sel).next() else { continue };
        let Some(href) = link.value().attr("href") else { continue };
        let url = unwrap_ddg_redirect(href).unwrap_or_else(|| href.to_string());
        let title = link.text().collect::<Vec<_>>().join(" ").trim().to_string();
        if title.is_empty() {
            continue;
        }
        let snippet = block
            .select(&snippet_sel)
            .next()
            .map(|s| s.text().collect::<Vec<_>>().join(" ").trim().to_string())
            .unwrap_or_default();
        out.push(SearchResult { title, url: url.clone(), snippet, source: host_of(&url) });
    }
    if out.is_empty() {
        generic_anchor_scan(html)
    } else {
        out
    }
}

fn parse_bing_html(html: &str) -> Vec<SearchResult> {
    let doc = html_scraper::Html::parse_document(html);
    let Ok(li_sel) = html_scraper::Selector::parse("li.b_algo, .b_algo") else {
        return generic_anchor_scan(html);
    };
    let h2_a = html_scraper::Selector::parse("h2 a").unwrap();
    let p_sel = html_scraper::Selector::parse("p, .b_caption p").unwrap();

    let mut out = Vec::new();
    for block in doc.select(&li_sel) {
        let Some(link) = block.select(&h2_a).next() else { continue };
        let Some(href) = link.value().attr("href") else { continue };
        let title = link.text().collect::<Vec<_>>().join(" ").trim().to_string();
        if title.is_empty() {
            continue;
        }
        let snippet = block
            .select(&p_sel)
            .next()
            .map(|s| s.text().collect::<Vec<_>>().join(" ").trim().to_string())
            .unwrap_or_default();
        out.push(SearchResult { title, url: href.to_string(), snippet, source: host_of(href) });
    }
    if out.is_empty() {
        generic_anchor_scan(html)
    } else {
        out
    }
}

/// The six seeded merchant hosts used by the never-fails synthetic fallback.
const SYNTHETIC_MERCHANTS: &[&str] = &[
    "amazon.com",
    "bestbuy.com",
    "walmart.com",
    "target.com",
    "newegg.com",
    "ebay.com",
];

fn synthetic_fallback(query: &str) -> Vec<SearchResult> {
    let encoded = url::form_urlencoded::byte_serialize(query.as_bytes()).collect::<String>();
    SYNTHETIC_MERCHANTS
        .iter()
        .map(|host| {
            let url = format!("https://{host}/search?q={encoded}");
            SearchResult {
                title: format!("Search {host} for \"{query}\""),
                url,
                snippet: String::new(),
                source: host.to_string(),
            }
        })
        .collect()
}

/// Queries DDG HTML / DDG Lite / Bing HTML in order, honoring per-provider
/// cooldowns, and always falls back to synthetic merchant links.
pub struct SearchFallbackEngine {
    client: reqwest::Client,
}

impl Default for SearchFallbackEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchFallbackEngine {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(PROVIDER_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }

    async fn fetch_html(&self, url: &str) -> std::result::Result<String, String> {
        let resp = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, DESKTOP_UA)
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = resp.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status.as_u16()));
        }
        resp.text().await.map_err(|e| e.to_string())
    }

    async fn try_provider(
        &self,
        name: &str,
        url: String,
        parse: fn(&str) -> Vec<SearchResult>,
        cooldown: &Cooldown,
        attempts: &mut Vec<SearchAttempt>,
    ) -> Option<Vec<SearchResult>> {
        if cooldown.is_cooling_down() {
            attempts.push(SearchAttempt::skipped_cooldown(name));
            return None;
        }
        match self.fetch_html(&url).await {
            Ok(html) => {
                let results = dedup_by_url(parse(&html));
                attempts.push(SearchAttempt::ok(name, results.len()));
                Some(results)
            }
            Err(e) => {
                if RATE_LIMIT_PATTERN.is_match(&e) {
                    cooldown.trip();
                }
                attempts.push(SearchAttempt::failed(name, e));
                None
            }
        }
    }
}

#[async_trait::async_trait]
impl SearchProvider for SearchFallbackEngine {
    fn name(&self) -> &'static str {
        "search-fallback-engine"
    }

    async fn search(&self, query: &str, max_results: usize, _region: Option<&str>) -> Result<SearchResponse> {
        let max_results = max_results.clamp(1, 20);
        let mut attempts = Vec::new();
        let encoded = url::form_urlencoded::byte_serialize(query.as_bytes()).collect::<String>();

        let mut provider_used = "synthetic";
        let mut results = Vec::new();

        if let Some(r) = self
            .try_provider(
                "ddg_html",
                format!("https://html.duckduckgo.com/html/?q={encoded}"),
                parse_ddg_html,
                &DDG_COOLDOWN,
                &mut attempts,
            )
            .await
        {
            if !r.is_empty() {
                provider_used = "ddg_html";
                results = r;
            }
        }

        if results.is_empty() {
            if let Some(r) = self
                .try_provider(
                    "ddg_lite",
                    format!("https://lite.duckduckgo.com/lite/?q={encoded}"),
                    parse_ddg_html,
                    &DDG_COOLDOWN,
                    &mut attempts,
                )
                .await
            {
                if !r.is_empty() {
                    provider_used = "ddg_lite";
                    results = r;
                }
            }
        }

        if results.is_empty() {
            if let Some(r) = self
                .try_provider(
                    "bing_html",
                    format!("https://www.bing.com/search?q={encoded}"),
                    parse_bing_html,
                    &BING_COOLDOWN,
                    &mut attempts,
                )
                .await
            {
                if !r.is_empty() {
                    provider_used = "bing_html";
                    results = r;
                }
            }
        }

        if results.is_empty() {
            let synth = synthetic_fallback(query);
            attempts.push(SearchAttempt::ok("synthetic", synth.len()));
            provider_used = "synthetic";
            results = synth;
        }

        results.truncate(max_results);

        Ok(SearchResponse { results, provider: provider_used.to_string(), attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocklist_catches_duckduckgo_and_tracking_hosts() {
        assert!(is_blocked_host("https://duckduckgo.com/y.js"));
        assert!(is_blocked_host("https://www.bing.com/aclick"));
        assert!(is_blocked_host("https://ad.doubleclick.net/x"));
        assert!(!is_blocked_host("https://www.amazon.com/dp/abc"));
    }

    #[test]
    fn unwraps_ddg_redirect_uddg_param() {
        let href = "//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fproduct&rut=1";
        let unwrapped = unwrap_ddg_redirect(href).unwrap();
        assert_eq!(unwrapped, "https://example.com/product");
    }

    #[test]
    fn synthetic_fallback_seeds_six_merchants() {
        let results = synthetic_fallback("mechanical keyboard");
        assert_eq!(results.len(), 6);
        assert!(results.iter().any(|r| r.source == "amazon.com"));
        for r in &results {
            assert!(r.url.contains("q=mechanical"));
        }
    }

    #[test]
    fn cooldown_is_monotonic_and_expires() {
        let c = Cooldown::new();
        assert!(!c.is_cooling_down());
        c.trip();
        assert!(c.is_cooling_down());
    }

    #[test]
    fn parse_ddg_html_extracts_result_blocks() {
        let html = r#"
        <div class="result">
          <a class="result__a" href="https://example.com/product">Example Product</a>
          <a class="result__snippet">A great product.</a>
        </div>
        "#;
        let results = parse_ddg_html(html);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, "https://example.com/product");
        assert_eq!(results[0].title, "Example Product");
    }

    #[test]
    fn parse_bing_html_extracts_algo_blocks() {
        let html = r#"
        <li class="b_algo">
          <h2><a href="https://example.com/p">Example Page</a></h2>
          <div class="b_caption"><p>Snippet text.</p></div>
        </li>
        "#;
        let results = parse_bing_html(html);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, "https://example.com/p");
    }
}
