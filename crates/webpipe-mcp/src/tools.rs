//! The spec's 17-tool surface: one handler per entry in §6, registered
//! against the shared [`AppState`].

use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use webpipe_core::{CompareCriteria, Error, ProductCandidate, Result, ScrollMode, SelectBy};

use crate::registry::{Handler, ToolRegistry};
use crate::state::AppState;

fn require_str(args: &Value, key: &str) -> Result<String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::BadInput(format!("missing required field: {key}")))
}

fn require_url(args: &Value, key: &str) -> Result<String> {
    let raw = require_str(args, key)?;
    let parsed = url::Url::parse(&raw).map_err(|_| Error::BadInput(format!("{key} is not an absolute URL")))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(Error::BadInput(format!("{key} must be http or https")));
    }
    Ok(raw)
}

fn opt_str(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn require_f64(args: &Value, key: &str) -> Result<f64> {
    args.get(key).and_then(|v| v.as_f64()).ok_or_else(|| Error::BadInput(format!("missing required field: {key}")))
}

fn clamp_usize(args: &Value, key: &str, default: usize, min: usize, max: usize) -> usize {
    args.get(key).and_then(|v| v.as_u64()).map(|n| (n as usize).clamp(min, max)).unwrap_or(default)
}

fn clamp_u64(args: &Value, key: &str, default: u64, min: u64, max: u64) -> u64 {
    args.get(key).and_then(|v| v.as_u64()).map(|n| n.clamp(min, max)).unwrap_or(default)
}

fn bool_default(args: &Value, key: &str, default: bool) -> bool {
    args.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

fn f64_default(args: &Value, key: &str, default: f64) -> f64 {
    args.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
}

// ---------------------------------------------------------------------
// web_search
// ---------------------------------------------------------------------

fn web_search_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": {"type": "string"},
            "max_results": {"type": "integer", "minimum": 1, "maximum": 20, "default": 5},
            "region": {"type": ["string", "null"], "default": null}
        },
        "required": ["query"]
    })
}

async fn web_search(state: Arc<AppState>, args: Value) -> Result<Value> {
    let query = require_str(&args, "query")?;
    let max_results = clamp_usize(&args, "max_results", 5, 1, 20);
    let region = opt_str(&args, "region");
    let response = state.search.search(&query, max_results, region.as_deref()).await?;
    Ok(serde_json::to_value(response).map_err(|e| Error::Generic(e.to_string()))?)
}

// ---------------------------------------------------------------------
// open_page
// ---------------------------------------------------------------------

fn open_page_schema() -> Value {
    json!({"type": "object", "properties": {"url": {"type": "string", "format": "uri"}}, "required": ["url"]})
}

async fn open_page(state: Arc<AppState>, args: Value) -> Result<Value> {
    let url = require_url(&args, "url")?;
    let page = state.fetcher.fetch(&url).await?;
    Ok(serde_json::to_value(page).map_err(|e| Error::Generic(e.to_string()))?)
}

// ---------------------------------------------------------------------
// extract_product
// ---------------------------------------------------------------------

fn extract_product_schema() -> Value {
    json!({
        "type": "object",
        "properties": {"url": {"type": "string"}, "html": {"type": "string"}, "text": {"type": "string"}},
        "required": ["url"]
    })
}

async fn extract_product(_state: Arc<AppState>, args: Value) -> Result<Value> {
    let url = require_str(&args, "url")?;
    // html/text are allowed to be empty strings (scenario #2 passes empty text);
    // only url is genuinely required input for the record's identity.
    let html = args.get("html").and_then(|v| v.as_str()).unwrap_or_default();
    let text = args.get("text").and_then(|v| v.as_str()).unwrap_or_default();
    let candidate = webpipe_local::extract::extract_product(&url, html, text);
    Ok(serde_json::to_value(candidate).map_err(|e| Error::Generic(e.to_string()))?)
}

// ---------------------------------------------------------------------
// compare_products
// ---------------------------------------------------------------------

#[derive(Deserialize)]
struct CompareProductInput {
    #[serde(default)]
    url: String,
    #[serde(default)]
    source: String,
    name: Option<String>,
    brand: Option<String>,
    category: Option<String>,
    #[serde(default, alias = "features")]
    key_features: Vec<String>,
    #[serde(default)]
    images: Vec<String>,
    #[serde(default)]
    specs: BTreeMap<String, String>,
    price: Option<f64>,
    currency: Option<String>,
    availability: Option<String>,
    #[serde(default)]
    confidence: f64,
}

impl From<CompareProductInput> for ProductCandidate {
    fn from(i: CompareProductInput) -> Self {
        ProductCandidate {
            url: i.url,
            source: i.source,
            name: i.name,
            brand: i.brand,
            category: i.category,
            key_features: i.key_features,
            images: i.images,
            specs: i.specs,
            price: i.price,
            currency: i.currency,
            availability: i.availability,
            confidence: i.confidence,
        }
    }
}

fn compare_products_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "products": {"type": "array", "minItems": 1},
            "criteria": {"type": "object"}
        },
        "required": ["products"]
    })
}

async fn compare_products(_state: Arc<AppState>, args: Value) -> Result<Value> {
    let products_raw = args.get("products").and_then(|v| v.as_array()).filter(|a| !a.is_empty());
    let Some(products_raw) = products_raw else {
        return Err(Error::BadInput("products must be a non-empty array".to_string()));
    };
    let mut products = Vec::with_capacity(products_raw.len());
    for p in products_raw {
        let input: CompareProductInput = serde_json::from_value(p.clone()).map_err(|e| Error::BadInput(e.to_string()))?;
        products.push(ProductCandidate::from(input));
    }
    let criteria: CompareCriteria = match args.get("criteria") {
        Some(v) => serde_json::from_value(v.clone()).map_err(|e| Error::BadInput(e.to_string()))?,
        None => CompareCriteria::default(),
    };
    let ranked = webpipe_local::compare::compare(&products, &criteria);
    Ok(json!({"ranked": ranked}))
}

// ---------------------------------------------------------------------
// browser_*
// ---------------------------------------------------------------------

fn browser_start_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "start_url": {"type": ["string", "null"], "default": null},
            "headless": {"type": "boolean", "default": true},
            "timeout_ms": {"type": "integer", "minimum": 1000, "maximum": 120000, "default": 30000}
        }
    })
}

async fn browser_start(state: Arc<AppState>, args: Value) -> Result<Value> {
    let start_url = opt_str(&args, "start_url");
    let headless = bool_default(&args, "headless", true);
    let timeout_ms = clamp_u64(&args, "timeout_ms", 30_000, 1_000, 120_000);
    let url = state.browser.start(start_url.as_deref(), headless, timeout_ms).await?;
    Ok(json!({"ok": true, "url": url}))
}

fn browser_open_schema() -> Value {
    json!({
        "type": "object",
        "properties": {"url": {"type": "string"}, "timeout_ms": {"type": "integer", "minimum": 1000, "maximum": 120000, "default": 30000}},
        "required": ["url"]
    })
}

async fn browser_open(state: Arc<AppState>, args: Value) -> Result<Value> {
    let url = require_url(&args, "url")?;
    let timeout_ms = clamp_u64(&args, "timeout_ms", 30_000, 1_000, 120_000);
    let final_url = state.browser.open(&url, timeout_ms).await?;
    Ok(json!({"ok": true, "url": final_url}))
}

fn browser_click_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "selector": {"type": "string"},
            "wait_for_navigation": {"type": "boolean", "default": false},
            "timeout_ms": {"type": "integer", "minimum": 500, "maximum": 120000, "default": 15000}
        },
        "required": ["selector"]
    })
}

async fn browser_click(state: Arc<AppState>, args: Value) -> Result<Value> {
    let selector = require_str(&args, "selector")?;
    let wait_for_navigation = bool_default(&args, "wait_for_navigation", false);
    let timeout_ms = clamp_u64(&args, "timeout_ms", 15_000, 500, 120_000);
    let url = state.browser.click(&selector, wait_for_navigation, timeout_ms).await?;
    Ok(json!({"ok": true, "url": url}))
}

fn browser_type_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "selector": {"type": "string"},
            "text": {"type": "string"},
            "append": {"type": "boolean", "default": false},
            "press_enter": {"type": "boolean", "default": false},
            "timeout_ms": {"type": "integer", "minimum": 500, "maximum": 120000, "default": 15000}
        },
        "required": ["selector", "text"]
    })
}

async fn browser_type(state: Arc<AppState>, args: Value) -> Result<Value> {
    let selector = require_str(&args, "selector")?;
    let text = require_str(&args, "text")?;
    let append = bool_default(&args, "append", false);
    let press_enter = bool_default(&args, "press_enter", false);
    let timeout_ms = clamp_u64(&args, "timeout_ms", 15_000, 500, 120_000);
    let url = state.browser.type_text(&selector, &text, append, press_enter, timeout_ms).await?;
    Ok(json!({"ok": true, "url": url}))
}

fn browser_select_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "selector": {"type": "string"},
            "value": {"type": ["string", "null"]},
            "label": {"type": ["string", "null"]},
            "index": {"type": ["integer", "null"]}
        },
        "required": ["selector"]
    })
}

async fn browser_select(state: Arc<AppState>, args: Value) -> Result<Value> {
    let selector = require_str(&args, "selector")?;
    let value = opt_str(&args, "value");
    let label = opt_str(&args, "label");
    let index = args.get("index").and_then(|v| v.as_u64()).map(|n| n as usize);
    let given = [value.is_some(), label.is_some(), index.is_some()].iter().filter(|b| **b).count();
    if given != 1 {
        return Err(Error::BadInput("exactly one of value, label, index must be given".to_string()));
    }
    let by = if let Some(v) = value {
        SelectBy::Value(v)
    } else if let Some(l) = label {
        SelectBy::Label(l)
    } else {
        SelectBy::Index(index.unwrap())
    };
    let timeout_ms = clamp_u64(&args, "timeout_ms", 15_000, 500, 120_000);
    let url = state.browser.select(&selector, by, timeout_ms).await?;
    Ok(json!({"ok": true, "url": url}))
}

fn browser_scroll_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "mode": {"type": "string", "enum": ["by", "to"], "default": "by"},
            "x": {"type": "number", "default": 0},
            "y": {"type": "number", "default": 700}
        }
    })
}

async fn browser_scroll(state: Arc<AppState>, args: Value) -> Result<Value> {
    let mode = match args.get("mode").and_then(|v| v.as_str()).unwrap_or("by") {
        "by" => ScrollMode::By,
        "to" => ScrollMode::To,
        other => return Err(Error::BadInput(format!("mode must be 'by' or 'to', got {other}"))),
    };
    let x = f64_default(&args, "x", 0.0);
    let y = f64_default(&args, "y", 700.0);
    let (rx, ry) = state.browser.scroll(mode, x, y).await?;
    Ok(json!({"ok": true, "x": rx, "y": ry}))
}

fn browser_wait_for_schema() -> Value {
    json!({
        "type": "object",
        "properties": {"selector": {"type": "string"}, "timeout_ms": {"type": "integer", "minimum": 500, "maximum": 120000, "default": 15000}},
        "required": ["selector"]
    })
}

async fn browser_wait_for(state: Arc<AppState>, args: Value) -> Result<Value> {
    let selector = require_str(&args, "selector")?;
    let timeout_ms = clamp_u64(&args, "timeout_ms", 15_000, 500, 120_000);
    let url = state.browser.wait_for(&selector, timeout_ms).await?;
    Ok(json!({"ok": true, "url": url}))
}

fn browser_snapshot_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "include_html": {"type": "boolean", "default": false},
            "max_text_chars": {"type": "integer", "minimum": 500, "maximum": 500000, "default": 25000}
        }
    })
}

async fn browser_snapshot(state: Arc<AppState>, args: Value) -> Result<Value> {
    let include_html = bool_default(&args, "include_html", false);
    let max_text_chars = clamp_usize(&args, "max_text_chars", 25_000, 500, 500_000);
    let snapshot = state.browser.snapshot(include_html, max_text_chars).await?;
    let mut v = serde_json::to_value(snapshot).map_err(|e| Error::Generic(e.to_string()))?;
    v["ok"] = json!(true);
    Ok(v)
}

fn browser_close_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

async fn browser_close(state: Arc<AppState>, _args: Value) -> Result<Value> {
    state.browser.close().await?;
    Ok(json!({"ok": true}))
}

// ---------------------------------------------------------------------
// cart
// ---------------------------------------------------------------------

fn add_to_cart_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": {"type": "string"},
            "url": {"type": "string"},
            "price": {"type": "number"},
            "currency": {"type": "string"},
            "source": {"type": "string"},
            "imageUrl": {"type": ["string", "null"], "default": null},
            "category": {"type": ["string", "null"], "default": null}
        },
        "required": ["name", "url", "price", "currency", "source"]
    })
}

async fn add_to_cart(state: Arc<AppState>, args: Value) -> Result<Value> {
    let name = require_str(&args, "name")?;
    let url = require_str(&args, "url")?;
    let price = require_f64(&args, "price")?;
    let currency = require_str(&args, "currency")?;
    let source = require_str(&args, "source")?;
    let image_url = opt_str(&args, "imageUrl");
    let category = opt_str(&args, "category");
    let outcome = state.cart.add(name, url, price, currency, source, image_url, category);
    Ok(json!({"ok": outcome.ok, "message": outcome.message, "cart": outcome.cart}))
}

fn list_cart_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

async fn list_cart(state: Arc<AppState>, _args: Value) -> Result<Value> {
    Ok(json!({"ok": true, "cart": state.cart.list()}))
}

fn remove_from_cart_schema() -> Value {
    json!({"type": "object", "properties": {"id": {"type": "string"}}, "required": ["id"]})
}

async fn remove_from_cart(state: Arc<AppState>, args: Value) -> Result<Value> {
    let id = require_str(&args, "id")?;
    let outcome = state.cart.remove(&id);
    Ok(json!({"ok": outcome.ok, "message": outcome.message, "cart": outcome.cart}))
}

fn clear_cart_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

async fn clear_cart(state: Arc<AppState>, _args: Value) -> Result<Value> {
    Ok(json!({"ok": true, "cart": state.cart.clear()}))
}

// ---------------------------------------------------------------------
// registration
// ---------------------------------------------------------------------

macro_rules! handler {
    ($f:expr) => {
        Arc::new(move |state, args| Box::pin($f(state, args))) as Handler
    };
}

/// Builds the full §6 tool surface. Panics only if two handlers below
/// share a name (a programmer error, not a runtime condition).
pub fn build_registry() -> ToolRegistry {
    let mut r = ToolRegistry::new();
    r.register("web_search", "Search the web with provider fallback and cooldown.", web_search_schema(), &["query"], handler!(web_search)).unwrap();
    r.register("open_page", "Fetch a page over plain HTTP.", open_page_schema(), &["url"], handler!(open_page)).unwrap();
    r.register("extract_product", "Extract a normalized product record from HTML/text.", extract_product_schema(), &["url"], handler!(extract_product)).unwrap();
    r.register("compare_products", "Score and rank products against criteria.", compare_products_schema(), &["products"], handler!(compare_products)).unwrap();
    r.register("browser_start", "Start a fresh driven-browser session.", browser_start_schema(), &[], handler!(browser_start)).unwrap();
    r.register("browser_open", "Navigate the current browser session.", browser_open_schema(), &["url"], handler!(browser_open)).unwrap();
    r.register("browser_click", "Click the first element matching a selector.", browser_click_schema(), &["selector"], handler!(browser_click)).unwrap();
    r.register("browser_type", "Type or fill text into the first matching element.", browser_type_schema(), &["selector", "text"], handler!(browser_type)).unwrap();
    r.register("browser_select", "Select one option in a <select> element.", browser_select_schema(), &["selector"], handler!(browser_select)).unwrap();
    r.register("browser_scroll", "Scroll the current page.", browser_scroll_schema(), &[], handler!(browser_scroll)).unwrap();
    r.register("browser_wait_for", "Wait until a selector becomes visible.", browser_wait_for_schema(), &["selector"], handler!(browser_wait_for)).unwrap();
    r.register("browser_snapshot", "Capture the current page's text/html.", browser_snapshot_schema(), &[], handler!(browser_snapshot)).unwrap();
    r.register("browser_close", "Tear down the current browser session.", browser_close_schema(), &[], handler!(browser_close)).unwrap();
    r.register("add_to_cart", "Add an item to the in-memory cart.", add_to_cart_schema(), &["name", "url", "price", "currency", "source"], handler!(add_to_cart)).unwrap();
    r.register("list_cart", "List the current cart contents.", list_cart_schema(), &[], handler!(list_cart)).unwrap();
    r.register("remove_from_cart", "Remove an item from the cart by id.", remove_from_cart_schema(), &["id"], handler!(remove_from_cart)).unwrap();
    r.register("clear_cart", "Empty the cart unconditionally.", clear_cart_schema(), &[], handler!(clear_cart)).unwrap();
    r
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_exactly_the_spec_surface() {
        let registry = build_registry();
        let mut names: Vec<String> = registry.list().into_iter().map(|d| d.name).collect();
        names.sort();
        let mut expected = vec![
            "add_to_cart",
            "browser_click",
            "browser_close",
            "browser_open",
            "browser_scroll",
            "browser_select",
            "browser_snapshot",
            "browser_start",
            "browser_type",
            "browser_wait_for",
            "clear_cart",
            "compare_products",
            "extract_product",
            "list_cart",
            "open_page",
            "remove_from_cart",
            "web_search",
        ];
        expected.sort();
        assert_eq!(names, expected);
    }

    #[tokio::test]
    async fn add_list_remove_clear_cart_round_trip() {
        let state = Arc::new(AppState::new());
        let registry = build_registry();

        let added = registry
            .call(state.clone(), "add_to_cart", json!({"name": "a", "url": "u1", "price": 9.99, "currency": "USD", "source": "s"}))
            .await
            .unwrap();
        assert_eq!(added["ok"], json!(true));

        let dup = registry
            .call(state.clone(), "add_to_cart", json!({"name": "a", "url": "u1", "price": 9.99, "currency": "USD", "source": "s"}))
            .await
            .unwrap();
        assert_eq!(dup["ok"], json!(false));

        let listed = registry.call(state.clone(), "list_cart", json!({})).await.unwrap();
        assert_eq!(listed["cart"].as_array().unwrap().len(), 1);

        let cleared = registry.call(state.clone(), "clear_cart", json!({})).await.unwrap();
        assert_eq!(cleared["cart"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn compare_products_ranks_by_budget() {
        let state = Arc::new(AppState::new());
        let registry = build_registry();
        let args = json!({
            "products": [
                {"price": 50, "currency": "USD", "specs": {"a": "1"}, "key_features": ["f"]},
                {"price": 200, "currency": "USD", "specs": {"a": "1", "b": "2"}, "key_features": ["f", "g"]}
            ],
            "criteria": {"max_budget": 100, "currency": "USD", "use_case": "home", "preferences": []}
        });
        let result = registry.call(state, "compare_products", args).await.unwrap();
        let ranked = result["ranked"].as_array().unwrap();
        assert_eq!(ranked.len(), 2);
        assert!(ranked[0]["score"].as_i64().unwrap() > ranked[1]["score"].as_i64().unwrap());
    }

    #[tokio::test]
    async fn extract_product_requires_url_but_not_html_or_text() {
        let state = Arc::new(AppState::new());
        let registry = build_registry();
        let result = registry.call(state, "extract_product", json!({"url": "https://example.com", "html": "", "text": ""})).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn browser_select_rejects_conflicting_inputs() {
        let state = Arc::new(AppState::new());
        let registry = build_registry();
        let err = registry
            .call(state, "browser_select", json!({"selector": "#x", "value": "a", "label": "b"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadInput(_)));
    }
}
