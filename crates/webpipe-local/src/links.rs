use std::collections::BTreeSet;

#[derive(Debug, Clone)]
pub struct LinkCandidate {
    pub url: String,
    pub text: String,
}

/// Extract (deduped) absolute links from HTML with anchor text.
///
/// - Resolves relative links against `base_url` when provided.
/// - Drops fragments.
/// - Returns at most `max_links`.
///
/// This is intended for agentic discovery loops: anchor text often carries the
/// semantic cue (“Cursor Docs”, “MCP config”) that the URL string does not.
pub fn extract_link_candidates(
    html: &str,
    base_url: Option<&str>,
    max_links: usize,
) -> Vec<LinkCandidate> {
    let max_links = max_links.min(500);
    if max_links == 0 {
        return Vec::new();
    }

    let base = base_url.and_then(|u| url::Url::parse(u).ok());
    let doc = html_scraper::Html::parse_document(html);
    let sel = match html_scraper::Selector::parse("a[href]") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };

    let mut seen = BTreeSet::<String>::new();
    let mut out: Vec<LinkCandidate> = Vec::new();
    for el in doc.select(&sel) {
        if out.len() >= max_links {
            break;
        }
        let href = match el.value().attr("href") {
            Some(h) => h.trim(),
            None => continue,
        };
        if href.is_empty() {
            continue;
        }
        let href_lc = href.to_ascii_lowercase();
        if href_lc.starts_with("javascript:") || href_lc.starts_with("mailto:") {
            continue;
        }

        let abs = if let Ok(u) = url::Url::parse(href) {
            u
        } else if let Some(b) = &base {
            match b.join(href) {
                Ok(u) => u,
                Err(_) => continue,
            }
        } else {
            continue;
        };

        let mut u = abs;
        u.set_fragment(None);
        let url = u.to_string();
        if !seen.insert(url.clone()) {
            continue;
        }

        let text = el
            .text()
            .collect::<Vec<_>>()
            .join(" ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        out.push(LinkCandidate { url, text });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_link_candidates_with_text() {
        let html = r#"
        <html><body>
          <a href="/a#x">Hello Docs</a>
          <a href="https://example.com/b">B</a>
        </body></html>
        "#;
        let links = extract_link_candidates(html, Some("https://example.com/root"), 10);
        assert!(links.iter().any(|c| c.url == "https://example.com/a"));
        assert!(links.iter().any(|c| c.text.to_lowercase().contains("docs")));
    }
}
