//! Comparison Engine: scores products against user criteria and emits
//! descending-ranked `RankedEntry` records.

use std::collections::BTreeSet;
use webpipe_core::{CompareCriteria, ProductCandidate, RankedEntry};

fn round_to_i64(v: f64) -> i64 {
    v.round() as i64
}

struct Bucket {
    score: i64,
    max: i64,
    pros: Vec<String>,
    cons: Vec<String>,
    trace: String,
}

fn completeness_bucket(p: &ProductCandidate) -> Bucket {
    let mut score = 0i64;
    if p.price.is_some() {
        score += 8;
    }
    if p.price.is_some() && p.currency.is_some() {
        score += 2;
    }
    if p.brand.is_some() {
        score += 3;
    }
    if !p.specs.is_empty() {
        score += 4;
    }
    if !p.key_features.is_empty() {
        score += 3;
    }
    let mut cons = Vec::new();
    if p.price.is_none() {
        cons.push("Missing price data".to_string());
    }
    if p.brand.is_none() {
        cons.push("Missing brand".to_string());
    }
    Bucket { score, max: 20, pros: Vec::new(), cons, trace: format!("+{score} data completeness") }
}

fn budget_bucket(p: &ProductCandidate, criteria: &CompareCriteria) -> Bucket {
    match criteria.max_budget {
        Some(budget) => match p.price {
            Some(price) if price <= budget => Bucket {
                score: 25,
                max: 25,
                pros: vec!["Within budget".to_string()],
                cons: Vec::new(),
                trace: "+25 within budget".to_string(),
            },
            Some(_) => Bucket {
                score: 0,
                max: 25,
                pros: Vec::new(),
                cons: vec!["Over budget".to_string()],
                trace: "-25 over budget".to_string(),
            },
            None => Bucket {
                score: 0,
                max: 25,
                pros: Vec::new(),
                cons: vec!["Cannot verify budget fit".to_string()],
                trace: "-25 price unknown, cannot verify budget".to_string(),
            },
        },
        None => Bucket { score: 15, max: 25, pros: Vec::new(), cons: Vec::new(), trace: "+15 no budget set".to_string() },
    }
}

fn relative_value_bucket(p: &ProductCandidate, priced: &[f64]) -> Bucket {
    let Some(price) = p.price else {
        return Bucket { score: 0, max: 20, pros: Vec::new(), cons: Vec::new(), trace: "+0 relative value (no price)".to_string() };
    };
    if priced.len() <= 1 {
        return Bucket { score: 10, max: 20, pros: Vec::new(), cons: Vec::new(), trace: "+10 relative value (single priced item)".to_string() };
    }
    let min = priced.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = priced.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let score = if (max - min).abs() < f64::EPSILON {
        20
    } else {
        round_to_i64((1.0 - (price - min) / (max - min)) * 20.0)
    };
    let mut pros = Vec::new();
    if (price - min).abs() < f64::EPSILON {
        pros.push("Lowest price in the set".to_string());
    }
    let mut cons = Vec::new();
    if (price - max).abs() < f64::EPSILON && min != max {
        cons.push("Highest price in the set".to_string());
    }
    Bucket { score, max: 20, pros, cons, trace: format!("+{score} relative value") }
}

fn spec_richness_bucket(p: &ProductCandidate, union_spec_keys: usize) -> Bucket {
    let score = if union_spec_keys == 0 {
        0
    } else {
        round_to_i64((p.specs.len() as f64 / union_spec_keys as f64) * 15.0)
    };
    let mut pros = Vec::new();
    if !p.specs.is_empty() {
        pros.push("Rich spec sheet".to_string());
    }
    Bucket { score, max: 15, pros, cons: Vec::new(), trace: format!("+{score} spec richness") }
}

fn feature_richness_bucket(p: &ProductCandidate, max_features: usize) -> Bucket {
    let score = if max_features == 0 {
        0
    } else {
        round_to_i64((p.key_features.len() as f64 / max_features as f64) * 10.0)
    };
    let mut pros = Vec::new();
    if !p.key_features.is_empty() {
        pros.push("Detailed feature list".to_string());
    }
    Bucket { score, max: 10, pros, cons: Vec::new(), trace: format!("+{score} feature richness") }
}

fn preference_match_bucket(p: &ProductCandidate, preferences: &[String]) -> Bucket {
    if preferences.is_empty() {
        return Bucket { score: 5, max: 10, pros: Vec::new(), cons: Vec::new(), trace: "+5 preference match (none requested)".to_string() };
    }
    let mut haystack = String::new();
    if let Some(n) = &p.name {
        haystack.push_str(&n.to_ascii_lowercase());
        haystack.push(' ');
    }
    if let Some(b) = &p.brand {
        haystack.push_str(&b.to_ascii_lowercase());
        haystack.push(' ');
    }
    for f in &p.key_features {
        haystack.push_str(&f.to_ascii_lowercase());
        haystack.push(' ');
    }
    for (k, v) in &p.specs {
        haystack.push_str(&k.to_ascii_lowercase());
        haystack.push(' ');
        haystack.push_str(&v.to_ascii_lowercase());
        haystack.push(' ');
    }
    let matched = preferences.iter().filter(|pref| haystack.contains(&pref.to_ascii_lowercase())).count();
    let score = round_to_i64((matched as f64 / preferences.len() as f64) * 10.0);
    let mut pros = Vec::new();
    let mut cons = Vec::new();
    if matched > 0 {
        pros.push(format!("Matches {matched}/{} preferences", preferences.len()));
    } else {
        cons.push("No preferences matched".to_string());
    }
    Bucket { score, max: 10, pros, cons, trace: format!("+{score} preference match") }
}

/// Scores each product (0-100), ranks descending with stable ties, and
/// returns one `RankedEntry` per input product.
pub fn compare(products: &[ProductCandidate], criteria: &CompareCriteria) -> Vec<RankedEntry> {
    let priced: Vec<f64> = products.iter().filter_map(|p| p.price).collect();
    let union_spec_keys: BTreeSet<String> = products.iter().flat_map(|p| p.specs.keys().cloned()).collect();
    let max_features = products.iter().map(|p| p.key_features.len()).max().unwrap_or(0);

    let mut entries: Vec<(usize, RankedEntry)> = products
        .iter()
        .enumerate()
        .map(|(idx, p)| {
            let buckets = vec![
                completeness_bucket(p),
                budget_bucket(p, criteria),
                relative_value_bucket(p, &priced),
                spec_richness_bucket(p, union_spec_keys.len()),
                feature_richness_bucket(p, max_features),
                preference_match_bucket(p, &criteria.preferences),
            ];

            let total: i64 = buckets.iter().map(|b| b.score).sum::<i64>().clamp(0, 100);
            let mut pros: Vec<String> = buckets.iter().flat_map(|b| b.pros.clone()).collect();
            let mut cons: Vec<String> = buckets.iter().flat_map(|b| b.cons.clone()).collect();
            pros.dedup();
            cons.dedup();
            let trace = buckets.iter().map(|b| b.trace.clone()).collect::<Vec<_>>().join("; ");
            let reason = format!("Score {total}/100: {trace}");
            let name = p.name.clone().unwrap_or_else(|| p.url.clone());

            (idx, RankedEntry { name, score: total, pros, cons, reason })
        })
        .collect();

    // Stable-descending: Rust's sort_by is stable, and ties keep original
    // insertion order because we sort on score only.
    entries.sort_by(|a, b| b.1.score.cmp(&a.1.score));
    entries.into_iter().map(|(_, e)| e).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn product(url: &str, price: Option<f64>, specs: &[(&str, &str)], features: &[&str]) -> ProductCandidate {
        let mut p = ProductCandidate::empty(url, "example.com");
        p.name = Some(url.to_string());
        p.price = price;
        p.currency = price.map(|_| "USD".to_string());
        p.specs = specs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect::<BTreeMap<_, _>>();
        p.key_features = features.iter().map(|f| f.to_string()).collect();
        p.confidence = 0.5;
        p
    }

    #[test]
    fn compare_preserves_product_count() {
        let products = vec![product("a", Some(10.0), &[], &[]), product("b", None, &[], &[])];
        let ranked = compare(&products, &CompareCriteria::default());
        assert_eq!(ranked.len(), products.len());
    }

    #[test]
    fn scores_stay_in_bounds() {
        let products = vec![
            product("a", Some(10.0), &[("a", "1")], &["f"]),
            product("b", Some(999.0), &[("a", "1"), ("b", "2")], &["f", "g"]),
        ];
        let ranked = compare(&products, &CompareCriteria::default());
        for r in &ranked {
            assert!((0..=100).contains(&r.score));
        }
    }

    #[test]
    fn budget_gate_pushes_over_budget_product_down() {
        let a = product("a", Some(50.0), &[("a", "1")], &["f"]);
        let b = product("b", Some(200.0), &[("a", "1"), ("b", "2")], &["f", "g"]);
        let criteria = CompareCriteria { max_budget: Some(100.0), currency: Some("USD".to_string()), use_case: "home".to_string(), preferences: Vec::new() };
        let ranked = compare(&[a, b], &criteria);
        assert!(ranked[0].score > ranked[1].score);
        assert!(ranked.iter().any(|r| r.cons.iter().any(|c| c == "Over budget")));
    }

    #[test]
    fn sort_is_stable_on_ties() {
        let a = product("a", None, &[], &[]);
        let b = product("b", None, &[], &[]);
        let ranked = compare(&[a, b], &CompareCriteria::default());
        assert_eq!(ranked[0].name, "a");
        assert_eq!(ranked[1].name, "b");
    }

    proptest! {
        #[test]
        fn scores_are_always_bounded_for_arbitrary_products(
            prices in prop::collection::vec(proptest::option::of(-100.0f64..2_000.0), 0..8),
            budget in proptest::option::of(0.0f64..1_500.0),
        ) {
            let products: Vec<ProductCandidate> = prices
                .iter()
                .enumerate()
                .map(|(i, price)| product(&format!("p{i}"), *price, &[], &[]))
                .collect();
            let criteria = CompareCriteria { max_budget: budget, currency: None, use_case: String::new(), preferences: Vec::new() };

            let ranked = compare(&products, &criteria);
            prop_assert_eq!(ranked.len(), products.len());
            for entry in &ranked {
                prop_assert!((0..=100).contains(&entry.score), "score {} out of bounds", entry.score);
            }
        }
    }
}
