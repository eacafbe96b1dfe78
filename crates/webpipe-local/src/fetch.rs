//! Page Fetcher: plain HTTP GET with anti-bot detection and HTML→text
//! reduction.

use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use webpipe_core::{Error, FetchedPage, PageFetcher, Result};

const DESKTOP_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
const FETCH_TIMEOUT: Duration = Duration::from_secs(12);

static CHALLENGE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)enable javascript and cookies|verify you are human|checking your browser|access denied|request blocked").unwrap()
});

static SCRIPT_STYLE_TAGS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(script|style|noscript|iframe)\b[^>]*>.*?</\1>").unwrap());

static BLOCK_END_TAGS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)</(p|div|section|article|header|footer|li|ul|ol|h1|h2|h3|h4|h5|h6|tr|table)\s*>").unwrap()
});

static BR_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());
static ANY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());
static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());
static NEWLINE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());
static TITLE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());

/// Strips `<script>`, `<style>`, `<noscript>`, `<iframe>` (with contents).
pub fn clean_html(html: &str) -> String {
    SCRIPT_STYLE_TAGS.replace_all(html, "").to_string()
}

fn decode_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
}

/// Extracts and normalizes the contents of the first `<title>`.
pub fn extract_title(html: &str) -> Option<String> {
    let caps = TITLE_TAG.captures(html)?;
    let raw = decode_entities(caps.get(1)?.as_str());
    let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Applies the block-level text-reduction algorithm: newline after block-end
/// tags, `<br>` to newline, strip remaining tags, collapse whitespace.
pub fn html_to_text(html: &str) -> String {
    let cleaned = clean_html(html);
    let with_block_breaks = BLOCK_END_TAGS.replace_all(&cleaned, "$0\n");
    let with_br_breaks = BR_TAG.replace_all(&with_block_breaks, "\n");
    let text_only = ANY_TAG.replace_all(&with_br_breaks, "");
    let decoded = decode_entities(&text_only);
    let collapsed_ws = WHITESPACE_RUN.replace_all(&decoded, " ");
    let trimmed_lines = collapsed_ws
        .lines()
        .map(|l| l.trim())
        .collect::<Vec<_>>()
        .join("\n");
    NEWLINE_RUN.replace_all(&trimmed_lines, "\n\n").trim().to_string()
}

pub struct HttpPageFetcher {
    client: reqwest::Client,
}

impl Default for HttpPageFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpPageFetcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

#[async_trait::async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        let resp = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, DESKTOP_UA)
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout
                } else {
                    Error::Generic(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::HttpError(status.as_u16()));
        }

        let final_url = resp.url().to_string();
        let html = resp.text().await.map_err(|e| Error::Generic(e.to_string()))?;

        if CHALLENGE_PATTERN.is_match(&html) {
            return Err(Error::BlockedByChallenge);
        }

        let title = extract_title(&html);
        let text = html_to_text(&html);

        Ok(FetchedPage { url: final_url, title, html, text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_and_normalizes_title() {
        let html = "<html><head><title>  Example &amp;\n  Co  </title></head></html>";
        assert_eq!(extract_title(html).as_deref(), Some("Example & Co"));
    }

    #[test]
    fn missing_title_is_none() {
        assert_eq!(extract_title("<html><body>hi</body></html>"), None);
    }

    #[test]
    fn html_to_text_strips_scripts_and_reduces_blocks() {
        let html = "<html><body><script>evil()</script><p>Hello</p><p>World</p><br>After</body></html>";
        let text = html_to_text(html);
        assert!(!text.contains("evil"));
        assert!(text.contains("Hello"));
        assert!(text.contains("World"));
        assert!(text.contains("After"));
    }

    #[test]
    fn html_to_text_collapses_excess_newlines() {
        let html = "<p>A</p><p>B</p><p></p><p></p><p>C</p>";
        let text = html_to_text(html);
        assert!(!text.contains("\n\n\n"));
    }

    #[test]
    fn challenge_pattern_detects_anti_bot_body() {
        assert!(CHALLENGE_PATTERN.is_match("Please enable JavaScript and cookies to continue"));
        assert!(!CHALLENGE_PATTERN.is_match("Welcome to our store"));
    }

    // The fetcher talks to a real socket, so these use an in-process axum
    // server as a stand-in target rather than hitting the network.
    mod live_fetch {
        use super::*;
        use axum::http::StatusCode;
        use axum::routing::get;
        use axum::Router;
        use std::net::SocketAddr;
        use webpipe_core::PageFetcher;

        async fn spawn(app: Router) -> SocketAddr {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
            addr
        }

        #[tokio::test]
        async fn fetches_title_and_text_from_a_live_page() {
            let app = Router::new().route(
                "/",
                get(|| async {
                    "<html><head><title>Widget Store</title></head><body><p>Hello</p></body></html>"
                }),
            );
            let addr = spawn(app).await;
            let page = HttpPageFetcher::new().fetch(&format!("http://{addr}/")).await.unwrap();
            assert_eq!(page.title.as_deref(), Some("Widget Store"));
            assert!(page.text.contains("Hello"));
        }

        #[tokio::test]
        async fn non_2xx_status_becomes_http_error() {
            let app = Router::new().route("/missing", get(|| async { StatusCode::NOT_FOUND }));
            let addr = spawn(app).await;
            let err = HttpPageFetcher::new().fetch(&format!("http://{addr}/missing")).await.unwrap_err();
            assert!(matches!(err, Error::HttpError(404)));
        }

        #[tokio::test]
        async fn anti_bot_body_becomes_blocked_by_challenge() {
            let app = Router::new().route(
                "/blocked",
                get(|| async { "Please verify you are human before continuing." }),
            );
            let addr = spawn(app).await;
            let err = HttpPageFetcher::new().fetch(&format!("http://{addr}/blocked")).await.unwrap_err();
            assert!(matches!(err, Error::BlockedByChallenge));
        }
    }
}
