//! Product Extractor: merges JSON-LD, microdata-like itemprops, and text
//! heuristics into a normalized `ProductCandidate` with a confidence score.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use webpipe_core::{Availability, ProductCandidate};

static NAV_BOILERPLATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(home|menu|cart|sign in|log in|sign up|my account|search|skip to content|subscribe|newsletter|cookie|privacy policy|terms of use)$").unwrap()
});

static SEARCH_UI_BOILERPLATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)search results|sort by|filter by|refine by|browse all|showing results").unwrap()
});

static PRICE_CONTEXT_POSITIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(price|our price|now|sale|buy)\b").unwrap());
static PRICE_CONTEXT_NEGATIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(list price|msrp|was)\b").unwrap());

static PRICE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)([$£€]|USD|GBP|EUR)\s?([0-9][0-9,]*\.?[0-9]*)|([0-9][0-9,]*\.?[0-9]*)\s?(USD|GBP|EUR)").unwrap()
});

static REVIEW_LIKE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(i |my |we |love it|bought this|highly recommend)").unwrap());
static PROMO_LIKE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)free shipping|add to cart|buy now|limited time|% off").unwrap());

static SPEC_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z0-9 /\-]{1,40})\s*:\s*(.{1,200})$").unwrap());

static BRAND_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^brand[:\-]\s*(.{2,60})$").unwrap());
static CATEGORY_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^category[:\-]\s*(.{2,80})$").unwrap());

static JUNK_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)logo|icon|sprite|pixel|tracking|banner|avatar|\.gif$|\.svg$|data:image|1x1|placeholder").unwrap()
});
static PRODUCTISH_IMAGE_CONTEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)product|hero|main|gallery|primary|detail").unwrap());

fn dedup_preserve_order(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    let mut out = Vec::new();
    for item in items {
        let norm = item.split_whitespace().collect::<Vec<_>>().join(" ");
        if norm.is_empty() {
            continue;
        }
        if seen.insert(norm.clone()) {
            out.push(norm);
        }
    }
    out
}

/// Widens a byte offset outward to the nearest char boundary at or before it,
/// so slicing `&text[..start]`-ish windows never panics on a multibyte char.
fn char_boundary_at_or_before(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Widens a byte offset outward to the nearest char boundary at or after it.
fn char_boundary_at_or_after(text: &str, mut idx: usize) -> usize {
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

fn parse_price_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw.chars().filter(|c| c.is_ascii_digit() || *c == '.').collect();
    if cleaned.is_empty() {
        None
    } else {
        cleaned.parse::<f64>().ok()
    }
}

fn currency_symbol_to_code(sym: &str) -> Option<String> {
    match sym {
        "$" => Some("USD".to_string()),
        "£" => Some("GBP".to_string()),
        "€" => Some("EUR".to_string()),
        "USD" | "GBP" | "EUR" => Some(sym.to_string()),
        _ => None,
    }
}

#[derive(Default)]
struct Partial {
    name: Option<String>,
    brand: Option<String>,
    category: Option<String>,
    key_features: Vec<String>,
    images: Vec<String>,
    specs: BTreeMap<String, String>,
    price: Option<f64>,
    currency: Option<String>,
    availability: Option<String>,
    used_structured_data: bool,
}

impl Partial {
    fn fill_str(slot: &mut Option<String>, value: Option<String>) {
        if slot.is_none() {
            if let Some(v) = value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) {
                *slot = Some(v);
            }
        }
    }
}

// ---------------------------------------------------------------------
// JSON-LD
// ---------------------------------------------------------------------

fn json_ld_blocks(html: &str) -> Vec<Value> {
    let doc = html_scraper::Html::parse_document(html);
    let Ok(sel) = html_scraper::Selector::parse(r#"script[type="application/ld+json"]"#) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for el in doc.select(&sel) {
        let text = el.text().collect::<Vec<_>>().join("");
        if let Ok(v) = serde_json::from_str::<Value>(&text) {
            out.push(v);
        }
    }
    out
}

fn collect_products(value: &Value, out: &mut Vec<Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_products(item, out);
            }
        }
        Value::Object(map) => {
            let is_product = map
                .get("@type")
                .map(|t| match t {
                    Value::String(s) => s.eq_ignore_ascii_case("product"),
                    Value::Array(arr) => arr
                        .iter()
                        .any(|v| v.as_str().map(|s| s.eq_ignore_ascii_case("product")).unwrap_or(false)),
                    _ => false,
                })
                .unwrap_or(false);
            if is_product {
                out.push(value.clone());
            }
            if let Some(graph) = map.get("@graph") {
                collect_products(graph, out);
            }
        }
        _ => {}
    }
}

fn score_json_ld_candidate(v: &Value) -> i64 {
    let mut score = 0;
    if v.get("name").is_some() {
        score += 3;
    }
    if v.get("offers").is_some() {
        score += 3;
    }
    if v.get("brand").is_some() {
        score += 1;
    }
    if v.get("image").is_some() {
        score += 1;
    }
    if v.get("category").is_some() {
        score += 1;
    }
    score
}

fn brand_name_from(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Object(m) => m.get("name").and_then(|n| n.as_str()).map(|s| s.to_string()),
        _ => None,
    }
}

fn images_from(v: &Value) -> Vec<String> {
    match v {
        Value::String(s) => vec![s.clone()],
        Value::Array(arr) => arr.iter().filter_map(|x| x.as_str().map(|s| s.to_string())).collect(),
        Value::Object(m) => m.get("url").and_then(|u| u.as_str()).map(|s| vec![s.to_string()]).unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn first_offer(offers: &Value) -> Option<&Value> {
    match offers {
        Value::Array(arr) => arr.iter().find(|o| o.get("price").is_some()).or_else(|| arr.first()),
        Value::Object(_) => Some(offers),
        _ => None,
    }
}

fn apply_json_ld(partial: &mut Partial, html: &str) {
    let blocks = json_ld_blocks(html);
    let mut candidates = Vec::new();
    for block in &blocks {
        collect_products(block, &mut candidates);
    }
    if candidates.is_empty() {
        return;
    }
    candidates.sort_by_key(|b| std::cmp::Reverse(score_json_ld_candidate(b)));
    let best = &candidates[0];
    partial.used_structured_data = true;

    Partial::fill_str(&mut partial.name, best.get("name").and_then(|v| v.as_str()).map(String::from));
    Partial::fill_str(&mut partial.brand, best.get("brand").and_then(brand_name_from));
    Partial::fill_str(&mut partial.category, best.get("category").and_then(|v| v.as_str()).map(String::from));

    if partial.key_features.is_empty() {
        if let Some(desc) = best.get("description").and_then(|v| v.as_str()) {
            let feats: Vec<String> = desc
                .split(|c| c == '.' || c == '\u{2022}')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .take(6)
                .collect();
            partial.key_features = dedup_preserve_order(feats);
        }
    }

    if partial.images.is_empty() {
        if let Some(img) = best.get("image") {
            partial.images = dedup_preserve_order(images_from(img)).into_iter().take(12).collect();
        }
    }

    if partial.specs.is_empty() {
        if let Some(Value::Array(props)) = best.get("additionalProperty") {
            for p in props {
                if partial.specs.len() >= 25 {
                    break;
                }
                let name = p.get("name").and_then(|v| v.as_str());
                let value = p
                    .get("value")
                    .and_then(|v| v.as_str().map(String::from).or_else(|| v.as_f64().map(|f| f.to_string())));
                if let (Some(name), Some(value)) = (name, value) {
                    partial.specs.insert(name.trim().to_string(), value.trim().to_string());
                }
            }
        }
    }

    if let Some(offers) = best.get("offers").and_then(first_offer) {
        if partial.price.is_none() {
            let price_val = offers.get("price").or_else(|| offers.get("lowPrice"));
            let parsed = match price_val {
                Some(Value::String(s)) => parse_price_number(s),
                Some(Value::Number(n)) => n.as_f64(),
                _ => None,
            };
            if let Some(p) = parsed {
                partial.price = Some(p);
            }
        }
        Partial::fill_str(
            &mut partial.currency,
            offers.get("priceCurrency").and_then(|v| v.as_str()).map(String::from),
        );
        if partial.availability.is_none() {
            if let Some(avail) = offers.get("availability").and_then(|v| v.as_str()) {
                if let Some(a) = Availability::parse_loose(avail) {
                    partial.availability = Some(a.to_string());
                }
            }
        }
    }
}

// ---------------------------------------------------------------------
// Microdata-like itemprops
// ---------------------------------------------------------------------

fn itemprop_value(el: &html_scraper::ElementRef) -> Option<String> {
    el.value()
        .attr("content")
        .or_else(|| el.value().attr("value"))
        .or_else(|| el.value().attr("href"))
        .or_else(|| el.value().attr("src"))
        .map(|s| s.to_string())
        .or_else(|| {
            let text = el.text().collect::<Vec<_>>().join(" ").trim().to_string();
            if text.is_empty() {
                None
            } else {
                Some(text)
            }
        })
}

fn apply_itemprops(partial: &mut Partial, html: &str) {
    let doc = html_scraper::Html::parse_document(html);
    let Ok(sel) = html_scraper::Selector::parse("[itemprop]") else { return };

    let mut any = false;
    for el in doc.select(&sel) {
        let Some(prop) = el.value().attr("itemprop") else { continue };
        let Some(value) = itemprop_value(&el) else { continue };
        any = true;
        match prop {
            "name" => Partial::fill_str(&mut partial.name, Some(value)),
            "brand" => Partial::fill_str(&mut partial.brand, Some(value)),
            "category" => Partial::fill_str(&mut partial.category, Some(value)),
            "price" | "lowPrice" => {
                if partial.price.is_none() {
                    partial.price = parse_price_number(&value);
                }
            }
            "priceCurrency" => Partial::fill_str(&mut partial.currency, Some(value)),
            "availability" => {
                if partial.availability.is_none() {
                    if let Some(a) = Availability::parse_loose(&value) {
                        partial.availability = Some(a.to_string());
                    }
                }
            }
            "image" => {
                if partial.images.len() < 12 {
                    partial.images.push(value);
                }
            }
            _ => {}
        }
    }
    if any {
        partial.used_structured_data = true;
    }
}

// ---------------------------------------------------------------------
// Text heuristics
// ---------------------------------------------------------------------

fn apply_text_heuristics(partial: &mut Partial, text: &str) {
    let lines: Vec<&str> = text.lines().map(|l| l.trim()).filter(|l| !l.is_empty()).collect();

    if partial.name.is_none() {
        for line in lines.iter().take(30) {
            let len = line.chars().count();
            if (6..=140).contains(&len) && !NAV_BOILERPLATE.is_match(line) {
                partial.name = Some(line.to_string());
                break;
            }
        }
    }

    if partial.price.is_none() {
        let mut best: Option<(usize, i64, f64, Option<String>)> = None;
        for caps in PRICE_PATTERN.captures_iter(text) {
            let whole = caps.get(0).unwrap();
            let (num_str, sym) = if let (Some(sym), Some(num)) = (caps.get(1), caps.get(2)) {
                (num.as_str(), Some(sym.as_str()))
            } else if let (Some(num), Some(sym)) = (caps.get(3), caps.get(4)) {
                (num.as_str(), Some(sym.as_str()))
            } else {
                continue;
            };
            let Some(price) = parse_price_number(num_str) else { continue };
            let start = char_boundary_at_or_before(text, whole.start().saturating_sub(50));
            let end = char_boundary_at_or_after(text, (whole.end() + 50).min(text.len()));
            let ctx = &text[start..end];
            let mut weight = 0i64;
            if PRICE_CONTEXT_POSITIVE.is_match(ctx) {
                weight += 2;
            }
            if PRICE_CONTEXT_NEGATIVE.is_match(ctx) {
                weight -= 1;
            }
            let pos = whole.start();
            let currency = sym.and_then(currency_symbol_to_code);
            let better = match &best {
                None => true,
                Some((_, best_weight, _, _)) => weight > *best_weight,
            };
            if better {
                best = Some((pos, weight, price, currency));
            }
        }
        if let Some((_, _, price, currency)) = best {
            partial.price = Some(price);
            if partial.currency.is_none() {
                partial.currency = currency;
            }
        }
    }

    if partial.availability.is_none() {
        let lower = text.to_ascii_lowercase();
        partial.availability = if lower.contains("out of stock") {
            Some(Availability::OutOfStock.to_string())
        } else if lower.contains("pre-order") || lower.contains("pre order") {
            Some(Availability::Preorder.to_string())
        } else if lower.contains("currently unavailable") {
            Some(Availability::Unavailable.to_string())
        } else if lower.contains("in stock") {
            Some(Availability::InStock.to_string())
        } else {
            None
        };
    }

    if partial.brand.is_none() {
        for line in &lines {
            if let Some(caps) = BRAND_LINE.captures(line) {
                partial.brand = Some(caps[1].trim().to_string());
                break;
            }
        }
    }
    if partial.category.is_none() {
        for line in &lines {
            if let Some(caps) = CATEGORY_LINE.captures(line) {
                partial.category = Some(caps[1].trim().to_string());
                break;
            }
        }
    }

    if partial.key_features.is_empty() {
        let mut feats = Vec::new();
        for line in &lines {
            if feats.len() >= 8 {
                break;
            }
            let bullet = line.starts_with('-') || line.starts_with('*') || line.starts_with('\u{2022}');
            if !bullet {
                continue;
            }
            let body = line.trim_start_matches(['-', '*', '\u{2022}']).trim();
            let len = body.chars().count();
            if !(8..=180).contains(&len) {
                continue;
            }
            if REVIEW_LIKE.is_match(body) || PROMO_LIKE.is_match(body) {
                continue;
            }
            feats.push(body.to_string());
        }
        partial.key_features = dedup_preserve_order(feats);
    }

    if partial.specs.is_empty() {
        for line in &lines {
            if partial.specs.len() >= 25 {
                break;
            }
            if let Some(caps) = SPEC_LINE.captures(line) {
                let label = caps[1].trim().to_string();
                let value = caps[2].trim().to_string();
                if !label.is_empty() && !value.is_empty() {
                    partial.specs.insert(label, value);
                }
            }
        }
    }
}

fn apply_images_from_html(partial: &mut Partial, html: &str) {
    if partial.images.len() >= 12 {
        return;
    }
    let doc = html_scraper::Html::parse_document(html);

    if let Ok(sel) = html_scraper::Selector::parse(r#"meta[property="og:image"], meta[name="twitter:image"]"#) {
        for el in doc.select(&sel) {
            if partial.images.len() >= 12 {
                break;
            }
            if let Some(content) = el.value().attr("content") {
                partial.images.push(content.to_string());
            }
        }
    }

    if partial.images.len() >= 12 {
        partial.images = dedup_preserve_order(std::mem::take(&mut partial.images)).into_iter().take(12).collect();
        return;
    }

    if let Ok(sel) = html_scraper::Selector::parse("img") {
        let mut productish = Vec::new();
        let mut fallback = Vec::new();
        for el in doc.select(&sel) {
            let Some(src) = el.value().attr("src") else { continue };
            if JUNK_IMAGE.is_match(src) {
                continue;
            }
            let class = el.value().attr("class").unwrap_or_default();
            let id = el.value().attr("id").unwrap_or_default();
            let alt = el.value().attr("alt").unwrap_or_default();
            let ctx = format!("{class} {id}");
            if PRODUCTISH_IMAGE_CONTEXT.is_match(&ctx) || alt.trim().chars().count() > 3 {
                productish.push(src.to_string());
            } else {
                fallback.push(src.to_string());
            }
        }
        partial.images.extend(productish);
        if partial.images.len() < 12 {
            partial.images.extend(fallback);
        }
    }

    partial.images = dedup_preserve_order(std::mem::take(&mut partial.images)).into_iter().take(12).collect();
}

fn compute_confidence(partial: &Partial) -> f64 {
    let mut score = 0.0;
    if partial.name.is_some() {
        score += 0.20;
    }
    if partial.price.is_some() {
        score += if partial.currency.is_some() { 0.25 } else { 0.15 };
    }
    if partial.availability.is_some() {
        score += 0.10;
    }
    if partial.brand.is_some() {
        score += 0.10;
    }
    if partial.category.is_some() {
        score += 0.05;
    }
    if !partial.key_features.is_empty() {
        score += 0.10;
    }
    if !partial.images.is_empty() {
        score += 0.10;
    }
    if !partial.specs.is_empty() {
        score += 0.10;
    }
    if partial.used_structured_data {
        score += 0.10;
    }
    (score.clamp(0.0, 1.0) * 100.0).round() / 100.0
}

/// Merge JSON-LD, itemprops, and text heuristics into one `ProductCandidate`.
/// Always returns a record; missing fields stay null/empty.
pub fn extract_product(url: &str, html: &str, text: &str) -> ProductCandidate {
    let source = url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_else(|| url.to_string());

    let mut partial = Partial::default();
    apply_json_ld(&mut partial, html);
    apply_itemprops(&mut partial, html);
    apply_text_heuristics(&mut partial, text);
    apply_images_from_html(&mut partial, html);

    partial.key_features = dedup_preserve_order(std::mem::take(&mut partial.key_features))
        .into_iter()
        .take(10)
        .collect();
    if partial.specs.len() > 25 {
        let keys: Vec<String> = partial.specs.keys().take(25).cloned().collect();
        partial.specs.retain(|k, _| keys.contains(k));
    }

    let confidence = compute_confidence(&partial);

    ProductCandidate {
        url: url.to_string(),
        source,
        name: partial.name,
        brand: partial.brand,
        category: partial.category,
        key_features: partial.key_features,
        images: partial.images,
        specs: partial.specs,
        price: partial.price,
        currency: partial.currency,
        availability: partial.availability,
        confidence,
    }
}

pub fn is_nav_boilerplate(s: &str) -> bool {
    NAV_BOILERPLATE.is_match(s)
}

pub fn is_search_ui_boilerplate(s: &str) -> bool {
    SEARCH_UI_BOILERPLATE.is_match(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_from_json_ld_only() {
        let html = r#"<script type="application/ld+json">
        {"@type":"Product","name":"X1","offers":{"price":"49.99","priceCurrency":"USD","availability":"https://schema.org/InStock"},"brand":{"name":"Acme"}}
        </script>"#;
        let product = extract_product("https://example.com/x1", html, "");
        assert_eq!(product.name.as_deref(), Some("X1"));
        assert_eq!(product.price, Some(49.99));
        assert_eq!(product.currency.as_deref(), Some("USD"));
        assert_eq!(product.availability.as_deref(), Some("in_stock"));
        assert_eq!(product.brand.as_deref(), Some("Acme"));
        assert!(product.confidence >= 0.75, "confidence was {}", product.confidence);
    }

    #[test]
    fn caps_list_lengths() {
        let mut html = String::new();
        for i in 0..30 {
            html.push_str(&format!(
                r#"<img src="https://example.com/product-{i}.jpg" alt="product photo {i}">"#
            ));
        }
        let product = extract_product("https://example.com/y", &html, "");
        assert!(product.images.len() <= 12);
    }

    #[test]
    fn empty_input_still_returns_a_record_with_bounded_confidence() {
        let product = extract_product("https://example.com/z", "", "");
        assert!(product.name.is_none());
        assert!((0.0..=1.0).contains(&product.confidence));
    }

    #[test]
    fn text_heuristic_picks_up_price_with_currency_context() {
        let text = "Widget Pro\nOur price: $129.99\nList price: $199.99 was\nIn stock now";
        let product = extract_product("https://example.com/w", "", text);
        assert_eq!(product.price, Some(129.99));
        assert_eq!(product.currency.as_deref(), Some("USD"));
        assert_eq!(product.availability.as_deref(), Some("in_stock"));
    }

    #[test]
    fn price_context_window_does_not_panic_on_multibyte_chars_nearby() {
        let padding = "ü".repeat(60);
        let text = format!("{padding}\nPrice: £49.99 now\n{padding}");
        let product = extract_product("https://example.com/gbp", "", &text);
        assert_eq!(product.price, Some(49.99));
        assert_eq!(product.currency.as_deref(), Some("GBP"));
    }

    #[test]
    fn bullet_features_are_filtered_for_promo_and_review_text() {
        let text = "Name Here\n- Durable aluminum housing\n- Free shipping on all orders\n- I love it so much\n- Weighs under two pounds total";
        let product = extract_product("https://example.com/f", "", text);
        assert!(product.key_features.iter().any(|f| f.contains("aluminum")));
        assert!(!product.key_features.iter().any(|f| f.contains("Free shipping")));
        assert!(!product.key_features.iter().any(|f| f.contains("love it")));
    }
}
