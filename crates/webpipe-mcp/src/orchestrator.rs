//! Research Orchestrator: turns a free-form shopping prompt into an
//! ordered shortlist of product options, visiting candidate pages
//! (HTTP first, driven-browser fallback on block/failure).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use webpipe_core::{CompareCriteria, Error, ProductCandidate, QueryConstraints, ScrollMode};

use crate::state::AppState;

const VISIT_BUDGET: usize = 15;
const MAX_RECURSE_LINKS: usize = 5;
const MAX_LISTING_LINKS: usize = 8;

static GBP_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"£|gbp|pound").unwrap());
static USD_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$|usd|dollar").unwrap());
static EUR_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"€|eur|euro").unwrap());
static BUDGET_CLAUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:under|below|less than|max(?:imum)?(?: budget)?)\s*[£$€]?\s*([0-9]+(?:\.[0-9]+)?)").unwrap());
static BARE_BUDGET: Lazy<Regex> = Lazy::new(|| Regex::new(r"[£$€]\s*([0-9]+(?:\.[0-9]+)?)").unwrap());
static EXPLICIT_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://[^\s)\]]+").unwrap());
static LISTING_PAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)best|top|review|under-|list|guide|comparison|vs|category|blog|amazon\.[^/]+/s\?|walmart[^ ]*/search|target/s\?|bestbuy[^ ]*searchpage|ebay/sch|newegg/p/pl|[?&](q|k|query|search|searchTerm|keyword)=",
    )
    .unwrap()
});
static PRODUCT_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)/dp/|/gp/product/|/product/|/products/|/shop/p/|/p/[^/]+|sku|item=|pid=|asin=|/ip/\d|\.html$").unwrap());

const COOKIE_BANNER_SELECTORS: &[&str] =
    &["#onetrust-accept-btn-handler", "button[aria-label=\"Accept all\"]", ".accept-cookies", "#accept-cookies", "button#accept"];
const SEARCH_INPUT_SELECTORS: &[&str] = &["input[type=search]", "input[name=q]", "input[name=search]", "#search", "input[type=text]"];

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "for", "to", "of", "and", "or", "in", "on", "with", "at", "by", "from",
    "want", "need", "looking", "find", "get", "buy", "purchase", "search", "show", "help", "can", "you", "me", "my", "please",
    "something", "some", "any", "also", "just", "like", "would", "should", "could", "recommend", "suggest", "what", "which",
    "that", "this",
    "under", "below", "less", "than", "max", "maximum", "budget", "around", "about", "price", "priced", "cheap", "cheapest",
    "affordable", "expensive",
    "best", "good", "great", "top", "quality", "nice", "decent",
    "male", "female", "men", "women", "man", "woman", "boy", "girl", "boys", "girls", "mens", "womens",
];

#[derive(Debug, Clone, Serialize)]
pub struct ProductOption {
    pub rank: usize,
    pub name: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    pub why_picked: String,
    pub description: String,
}

fn parse_constraints(prompt: &str) -> QueryConstraints {
    let lower = prompt.to_ascii_lowercase();
    let currency = if GBP_PATTERN.is_match(&lower) {
        Some("GBP".to_string())
    } else if USD_PATTERN.is_match(&lower) {
        Some("USD".to_string())
    } else if EUR_PATTERN.is_match(&lower) {
        Some("EUR".to_string())
    } else {
        None
    };
    let max_budget = BUDGET_CLAUSE
        .captures(&lower)
        .or_else(|| BARE_BUDGET.captures(&lower))
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok());
    let region = match currency.as_deref() {
        Some("GBP") => "uk-en",
        Some("EUR") => "de-de",
        _ => "us-en",
    };
    QueryConstraints { max_budget, currency, region: region.to_string() }
}

fn strip_budget_clauses(text: &str) -> String {
    let stage1 = BUDGET_CLAUSE.replace_all(text, " ");
    BARE_BUDGET.replace_all(&stage1, " ").to_string()
}

fn clean_query(prompt: &str) -> Vec<String> {
    let lower = prompt.to_ascii_lowercase();
    let stripped = strip_budget_clauses(&lower);
    stripped
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .filter(|t| t.len() >= 2)
        .filter(|t| !t.chars().all(|c| c.is_ascii_digit()))
        .filter(|t| !STOP_WORDS.contains(t))
        .map(str::to_string)
        .collect()
}

fn explicit_urls(prompt: &str) -> Vec<String> {
    EXPLICIT_URL.find_iter(prompt).map(|m| m.as_str().trim_end_matches(['.', ',', ')']).to_string()).collect()
}

fn dedup_preserve_order(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items.into_iter().filter(|u| seen.insert(u.clone())).collect()
}

fn host_of(url: &str) -> String {
    url::Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string)).unwrap_or_default()
}

/// Round-robins candidates across hosts: each of up to 6 passes takes one
/// item per host in turn (so at most 2 per host land within the first 2
/// passes per host), capped at 20 total.
fn diversify(results: Vec<webpipe_core::SearchResult>) -> Vec<webpipe_core::SearchResult> {
    let mut order: Vec<String> = Vec::new();
    let mut buckets: HashMap<String, VecDeque<webpipe_core::SearchResult>> = HashMap::new();
    for r in results {
        let host = host_of(&r.url);
        if !buckets.contains_key(&host) {
            order.push(host.clone());
        }
        buckets.entry(host).or_default().push_back(r);
    }
    let mut out = Vec::new();
    'passes: for _ in 0..6 {
        for host in &order {
            if out.len() >= 20 {
                break 'passes;
            }
            if let Some(r) = buckets.get_mut(host).and_then(VecDeque::pop_front) {
                out.push(r);
            }
        }
    }
    out
}

fn is_weak_candidate(c: &ProductCandidate) -> bool {
    c.is_weak()
        || LISTING_PAGE.is_match(&c.url)
        || c.name.as_deref().map(webpipe_local::extract::is_nav_boilerplate).unwrap_or(false)
}

fn relevance_gate(c: &ProductCandidate, query_terms: &[String]) -> bool {
    let Some(name) = &c.name else { return false };
    if webpipe_local::extract::is_nav_boilerplate(name) {
        return false;
    }
    let features_and_category = format!("{} {}", c.category.clone().unwrap_or_default(), c.key_features.join(" "));
    if webpipe_local::extract::is_search_ui_boilerplate(&features_and_category) {
        return false;
    }
    let haystack = format!("{} {} {} {}", name, c.category.clone().unwrap_or_default(), c.key_features.join(" "), c.url).to_lowercase();
    if !query_terms.iter().any(|t| haystack.contains(t.as_str())) {
        return false;
    }
    if c.confidence < 0.10 {
        return false;
    }
    if c.availability.as_deref() == Some("out_of_stock") {
        return false;
    }
    true
}

fn final_filter(candidates: Vec<ProductCandidate>, constraints: &QueryConstraints) -> Vec<ProductCandidate> {
    let strict: Vec<ProductCandidate> = candidates
        .iter()
        .cloned()
        .filter(|c| {
            if let (Some(wanted), Some(have)) = (&constraints.currency, &c.currency) {
                if wanted != have {
                    return false;
                }
            }
            if let Some(budget) = constraints.max_budget {
                if let Some(price) = c.price {
                    if price > budget {
                        return false;
                    }
                }
            }
            c.availability.as_deref() != Some("out_of_stock") && c.confidence >= 0.10
        })
        .collect();
    if !strict.is_empty() {
        return strict;
    }

    let mut relaxed: Vec<ProductCandidate> = candidates.iter().cloned().filter(|c| c.confidence >= 0.08 && c.name.is_some()).collect();
    relaxed.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
    relaxed.truncate(3);
    if !relaxed.is_empty() {
        return relaxed;
    }

    let mut any_named: Vec<ProductCandidate> = candidates.into_iter().filter(|c| c.name.is_some()).collect();
    any_named.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
    any_named.truncate(3);
    any_named
}

fn sanitize_description(c: Option<&ProductCandidate>) -> String {
    let Some(c) = c else { return String::new() };
    let mut parts = Vec::new();
    if let Some(brand) = &c.brand {
        parts.push(brand.clone());
    }
    if let Some(category) = &c.category {
        parts.push(category.clone());
    }
    parts.extend(c.key_features.iter().take(3).cloned());
    let joined = parts.join(" · ");
    joined.chars().take(280).collect()
}

fn amazon_tld(region: &str) -> &'static str {
    match region {
        "uk-en" => "co.uk",
        "de-de" => "de",
        _ => "com",
    }
}

/// Runs the full constraint-parse → search → visit → extract → filter →
/// rank pipeline, pushing a progress line to `on_update` after each stage.
pub async fn run(state: &AppState, prompt: &str, mut on_update: impl FnMut(String)) -> webpipe_core::Result<Vec<ProductOption>> {
    let constraints = parse_constraints(prompt);
    on_update(format!(
        "parsed constraints: budget={:?} currency={:?} region={}",
        constraints.max_budget, constraints.currency, constraints.region
    ));

    let query_terms = clean_query(prompt);
    let cleaned_query = format!("{} buy", query_terms.join(" "));
    let urls_from_prompt = dedup_preserve_order(explicit_urls(prompt));

    on_update(format!("searching for \"{cleaned_query}\""));
    let mut search_results = state.search.search(&cleaned_query, 10, Some(&constraints.region)).await?.results;
    if search_results.len() < 5 {
        let followup = format!("{cleaned_query} site:amazon.{}", amazon_tld(&constraints.region));
        on_update(format!("follow-up search \"{followup}\""));
        if let Ok(more) = state.search.search(&followup, 10, Some(&constraints.region)).await {
            search_results.extend(more.results);
        }
    }

    let diversified = diversify(search_results);
    let mut candidate_urls = urls_from_prompt;
    candidate_urls.extend(diversified.into_iter().map(|r| r.url));
    let candidate_urls = dedup_preserve_order(candidate_urls);

    on_update(format!("visiting up to {VISIT_BUDGET} candidate pages"));
    let mut product_pool: Vec<ProductCandidate> = Vec::new();
    let mut queue: VecDeque<(String, u8)> = candidate_urls.into_iter().map(|u| (u, 0u8)).collect();
    let mut visits_used = 0usize;
    let mut browser_started = false;

    while let Some((url, depth)) = queue.pop_front() {
        if visits_used >= VISIT_BUDGET {
            break;
        }
        visits_used += 1;

        match state.fetcher.fetch(&url).await {
            Ok(page) => {
                let candidate = webpipe_local::extract::extract_product(&url, &page.html, &page.text);
                if !is_weak_candidate(&candidate) {
                    product_pool.push(candidate);
                } else if depth == 0 && LISTING_PAGE.is_match(&url) {
                    let anchors = webpipe_local::links::extract_link_candidates(&page.html, Some(&url), 50);
                    let product_links: Vec<String> = anchors
                        .iter()
                        .filter(|a| PRODUCT_LINK.is_match(&a.url) && !LISTING_PAGE.is_match(&a.url))
                        .filter(|a| {
                            let lower = format!("{} {}", a.url, a.text).to_lowercase();
                            query_terms.iter().any(|t| lower.contains(t.as_str()))
                        })
                        .map(|a| a.url.clone())
                        .take(MAX_LISTING_LINKS)
                        .collect();
                    for link in product_links.into_iter().take(MAX_RECURSE_LINKS) {
                        queue.push_back((link, 1));
                    }
                } else {
                    product_pool.push(candidate);
                }
            }
            Err(Error::Timeout) | Err(Error::HttpError(_)) | Err(Error::BlockedByChallenge) => {
                if !browser_started {
                    browser_started = state.browser.start(None, true, 30_000).await.is_ok();
                }
                if browser_started && state.browser.open(&url, 30_000).await.is_ok() {
                    for selector in COOKIE_BANNER_SELECTORS {
                        let _ = state.browser.click(selector, false, 2_000).await;
                    }
                    if LISTING_PAGE.is_match(&url) {
                        for selector in SEARCH_INPUT_SELECTORS {
                            if state.browser.type_text(selector, &cleaned_query, false, true, 3_000).await.is_ok() {
                                break;
                            }
                        }
                    }
                    let _ = state.browser.scroll(ScrollMode::By, 0.0, 900.0).await;
                    if let Ok(snapshot) = state.browser.snapshot(true, 100_000).await {
                        let html = snapshot.html.unwrap_or_default();
                        let candidate = webpipe_local::extract::extract_product(&url, &html, &snapshot.text);
                        if !is_weak_candidate(&candidate) {
                            product_pool.push(candidate);
                        } else if depth == 0 && LISTING_PAGE.is_match(&url) {
                            let anchors = webpipe_local::links::extract_link_candidates(&html, Some(&url), 50);
                            let product_links: Vec<String> = anchors
                                .iter()
                                .filter(|a| PRODUCT_LINK.is_match(&a.url) && !LISTING_PAGE.is_match(&a.url))
                                .map(|a| a.url.clone())
                                .take(MAX_LISTING_LINKS)
                                .collect();
                            for link in product_links.into_iter().take(MAX_RECURSE_LINKS) {
                                queue.push_back((link, 1));
                            }
                        } else {
                            product_pool.push(candidate);
                        }
                    }
                }
            }
            Err(_) => {}
        }
    }

    on_update(format!("extracted {} candidate(s), filtering and ranking", product_pool.len()));
    let relevant: Vec<ProductCandidate> = product_pool.into_iter().filter(|c| relevance_gate(c, &query_terms)).collect();
    let filtered = final_filter(relevant, &constraints);

    let criteria = CompareCriteria { max_budget: constraints.max_budget, currency: constraints.currency.clone(), use_case: String::new(), preferences: Vec::new() };
    let by_name: HashMap<String, &ProductCandidate> =
        filtered.iter().map(|c| (c.name.clone().unwrap_or_else(|| c.url.clone()), c)).collect();
    let ranked = webpipe_local::compare::compare(&filtered, &criteria);

    let options: Vec<ProductOption> = ranked
        .into_iter()
        .take(3)
        .enumerate()
        .map(|(i, entry)| {
            let candidate = by_name.get(entry.name.as_str()).copied();
            ProductOption {
                rank: i + 1,
                name: entry.name.clone(),
                url: candidate.map(|c| c.url.clone()).unwrap_or_default(),
                price: candidate.and_then(|c| c.price),
                currency: candidate.and_then(|c| c.currency.clone()),
                why_picked: entry.reason,
                description: sanitize_description(candidate),
            }
        })
        .collect();

    on_update(format!("done: {} option(s)", options.len()));
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gbp_budget_and_region() {
        let c = parse_constraints("mechanical keyboard under £100");
        assert_eq!(c.currency.as_deref(), Some("GBP"));
        assert_eq!(c.max_budget, Some(100.0));
        assert_eq!(c.region, "uk-en");
    }

    #[test]
    fn parses_bare_dollar_budget() {
        let c = parse_constraints("headphones $50");
        assert_eq!(c.currency.as_deref(), Some("USD"));
        assert_eq!(c.max_budget, Some(50.0));
    }

    #[test]
    fn clean_query_strips_stopwords_and_budget_numbers() {
        let terms = clean_query("I want to find the best mechanical keyboard under $100 please");
        assert!(terms.contains(&"mechanical".to_string()));
        assert!(terms.contains(&"keyboard".to_string()));
        assert!(!terms.iter().any(|t| t == "100"));
        assert!(!terms.contains(&"best".to_string()));
        assert!(!terms.contains(&"please".to_string()));
    }

    #[test]
    fn explicit_url_is_extracted_and_first() {
        let urls = explicit_urls("compare https://example.com/p/123 with alternatives");
        assert_eq!(urls, vec!["https://example.com/p/123".to_string()]);
    }

    #[test]
    fn diversify_round_robins_across_hosts() {
        let results = vec![
            webpipe_core::SearchResult { title: "a1".into(), url: "https://a.com/1".into(), snippet: String::new(), source: "a.com".into() },
            webpipe_core::SearchResult { title: "a2".into(), url: "https://a.com/2".into(), snippet: String::new(), source: "a.com".into() },
            webpipe_core::SearchResult { title: "a3".into(), url: "https://a.com/3".into(), snippet: String::new(), source: "a.com".into() },
            webpipe_core::SearchResult { title: "b1".into(), url: "https://b.com/1".into(), snippet: String::new(), source: "b.com".into() },
        ];
        let out = diversify(results);
        assert_eq!(out[0].url, "https://a.com/1");
        assert_eq!(out[1].url, "https://b.com/1");
        assert_eq!(out[2].url, "https://a.com/2");
    }

    #[test]
    fn final_filter_drops_over_budget_candidate() {
        let a = ProductCandidate { price: Some(50.0), currency: Some("USD".to_string()), confidence: 0.5, name: Some("a".to_string()), ..ProductCandidate::empty("u1", "s") };
        let b = ProductCandidate { price: Some(200.0), currency: Some("USD".to_string()), confidence: 0.5, name: Some("b".to_string()), ..ProductCandidate::empty("u2", "s") };
        let constraints = QueryConstraints { max_budget: Some(100.0), currency: Some("USD".to_string()), region: "us-en".to_string() };
        let out = final_filter(vec![a, b], &constraints);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].url, "u1");
    }
}
