//! Quality Scorer
//!
//! Deterministic depth score of a finding's attribute map, in `[0, 1]`.
//! Each check contributes a weighted fraction:
//!
//! | check                                   | weight |
//! |-----------------------------------------|--------|
//! | pricing is a number, range or "free"    | 0.35   |
//! | at least 3 specific (non-generic) features | 0.25 (proportional) |
//! | pros present                            | 0.10   |
//! | cons present                            | 0.10   |
//! | at least one source citation            | 0.20   |
//!
//! No I/O happens here so the scorer can run inline after every merge.

use serde::Serialize;

use crate::models::{Finding, FindingAttributes, Pricing, QueryKind};

pub const PRICING_WEIGHT: f64 = 0.35;
pub const FEATURES_WEIGHT: f64 = 0.25;
pub const PROS_WEIGHT: f64 = 0.10;
pub const CONS_WEIGHT: f64 = 0.10;
pub const SOURCES_WEIGHT: f64 = 0.20;

pub const MIN_SPECIFIC_FEATURES: usize = 3;

const CURRENCY_MARKERS: &[&str] = &["$", "€", "£", "¥", "₹", "usd", "eur", "gbp", "cad", "aud"];

const PLACEHOLDER_PHRASES: &[&str] = &[
    "contact sales",
    "contact us",
    "custom",
    "request a quote",
    "quote",
    "varies",
    "not disclosed",
    "not publicly",
    "unknown",
    "n/a",
    "tbd",
    "on request",
];

const GENERIC_FEATURES: &[&str] = &[
    "easy to use",
    "user-friendly",
    "user friendly",
    "intuitive",
    "intuitive interface",
    "powerful",
    "fast",
    "reliable",
    "secure",
    "scalable",
    "flexible",
    "customizable",
    "and more",
    "many features",
    "various features",
    "integrations",
    "great support",
    "good performance",
];

/// Parsed price: single value when `min == max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceRange {
    pub min: f64,
    pub max: f64,
}

/// Outcome of each heuristic for one finding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityChecks {
    pub pricing_concrete: bool,
    pub specific_features: usize,
    pub has_pros: bool,
    pub has_cons: bool,
    pub has_sources: bool,
}

impl QualityChecks {
    pub fn score(&self) -> f64 {
        let mut score = 0.0;
        if self.pricing_concrete {
            score += PRICING_WEIGHT;
        }
        let specific = self.specific_features.min(MIN_SPECIFIC_FEATURES);
        let feature_ratio = specific as f64 / MIN_SPECIFIC_FEATURES as f64;
        score += FEATURES_WEIGHT * feature_ratio;
        if self.has_pros {
            score += PROS_WEIGHT;
        }
        if self.has_cons {
            score += CONS_WEIGHT;
        }
        if self.has_sources {
            score += SOURCES_WEIGHT;
        }
        round3(score.clamp(0.0, 1.0))
    }

    /// Attribute kinds whose re-query would lift a failed check.
    pub fn weak_kinds(&self) -> Vec<QueryKind> {
        let mut kinds = Vec::new();
        if !self.pricing_concrete {
            kinds.push(QueryKind::Pricing);
        }
        if self.specific_features < MIN_SPECIFIC_FEATURES {
            kinds.push(QueryKind::Features);
        }
        if !self.has_pros || !self.has_cons || !self.has_sources {
            kinds.push(QueryKind::Reviews);
        }
        kinds
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Parse a price phrase like `"$12/user/mo"`, `"€10 - €20"`, `"Free"`.
/// Placeholder phrases without any figure yield `None`.
pub fn parse_price(raw: &str) -> Option<PriceRange> {
    let text = raw.trim().to_lowercase();
    if text.is_empty() {
        return None;
    }

    // "Enterprise: contact sales, 100+ seats" carries a figure but no price
    let placeholder = PLACEHOLDER_PHRASES.iter().any(|p| text.contains(p));
    if placeholder && !CURRENCY_MARKERS.iter().any(|c| text.contains(c)) {
        return None;
    }

    let numbers = extract_numbers(&text);
    if numbers.is_empty() {
        if text.starts_with("free") || text.contains("free forever") {
            return Some(PriceRange { min: 0.0, max: 0.0 });
        }
        return None;
    }

    let min = numbers.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = numbers.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    Some(PriceRange { min, max })
}

fn extract_numbers(text: &str) -> Vec<f64> {
    fn flush(current: &mut String, numbers: &mut Vec<f64>) {
        let cleaned: String = current.chars().filter(|c| *c != ',').collect();
        if let Ok(value) = cleaned.trim_end_matches('.').parse::<f64>() {
            if value.is_finite() {
                numbers.push(value);
            }
        }
        current.clear();
    }

    let mut numbers = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() || ((ch == '.' || ch == ',') && !current.is_empty()) {
            current.push(ch);
        } else if !current.is_empty() {
            flush(&mut current, &mut numbers);
        }
    }
    if !current.is_empty() {
        flush(&mut current, &mut numbers);
    }
    numbers
}

pub fn pricing_is_concrete(pricing: Option<&Pricing>) -> bool {
    pricing
        .map(|p| p.price_strings().any(|s| parse_price(s).is_some()))
        .unwrap_or(false)
}

/// A feature counts when it is more than a generic adjective.
pub fn is_specific_feature(feature: &str) -> bool {
    let text = feature.trim().to_lowercase();
    let text = text.trim_end_matches('.');
    if text.len() < 4 {
        return false;
    }
    !GENERIC_FEATURES.iter().any(|g| text == *g)
}

pub fn specific_feature_count(attributes: &FindingAttributes) -> usize {
    attributes
        .features
        .iter()
        .filter(|f| is_specific_feature(f))
        .count()
}

pub fn checks(finding: &Finding) -> QualityChecks {
    let attrs = &finding.attributes;
    QualityChecks {
        pricing_concrete: pricing_is_concrete(attrs.pricing.as_ref()),
        specific_features: specific_feature_count(attrs),
        has_pros: !attrs.pros.is_empty(),
        has_cons: !attrs.cons.is_empty(),
        has_sources: !finding.sources.is_empty(),
    }
}

/// Depth score of a finding. Error-flagged findings score zero.
pub fn score(finding: &Finding) -> f64 {
    if finding.is_errored() {
        return 0.0;
    }
    checks(finding).score()
}

/// Kinds to re-query for a shallow finding: failed checks plus kinds whose
/// query previously failed, in canonical order.
pub fn narrowed_kinds(finding: &Finding) -> Vec<QueryKind> {
    let weak = checks(finding).weak_kinds();
    QueryKind::ALL
        .into_iter()
        .filter(|kind| weak.contains(kind) || finding.missing.contains(kind))
        .collect()
}

/// Mean score over findings that did not error.
pub fn average(findings: &[Finding]) -> f64 {
    let scored: Vec<f64> = findings
        .iter()
        .filter(|f| !f.is_errored())
        .map(|f| f.quality_score)
        .collect();
    if scored.is_empty() {
        return 0.0;
    }
    round3(scored.iter().sum::<f64>() / scored.len() as f64)
}
