//! Findings Aggregator
//!
//! Owns the canonical findings of one mission. Every phase hands its raw
//! answers here as [`Contribution`]s; the aggregator dedupes by normalized
//! entity name, applies the patch, recomputes the quality score and publishes
//! one `finding` event per mutation while still holding the write lock, so the
//! event log sees mutations in the order they happened.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;

use crate::events::{EventBus, EventKind};
use crate::models::{Candidate, Finding, Pricing, QueryKind};
use crate::scoring;
use crate::utils::normalize_name;

/// Attribute-level change carried by one model answer.
#[derive(Debug, Clone)]
pub enum AttributePatch {
    Pricing(Pricing),
    Features {
        features: Vec<String>,
        description: Option<String>,
    },
    Reviews {
        pros: Vec<String>,
        cons: Vec<String>,
        summary: Option<String>,
    },
    Competitors {
        competitors: Vec<String>,
        integrations: Vec<String>,
        founded: Option<String>,
        funding: Option<String>,
    },
    UseCases {
        use_cases: Vec<String>,
        target_audience: Option<String>,
        best_for: Option<String>,
    },
    Comparison {
        other: String,
        note: String,
    },
    Validation {
        confirmed: bool,
        note: Option<String>,
    },
    /// The query for this kind failed after retries
    Missing(QueryKind),
    /// Entity research failed outright
    Error(String),
}

impl AttributePatch {
    /// Query kind that produced this patch, if it is a deep-dive answer.
    pub fn kind(&self) -> Option<QueryKind> {
        match self {
            AttributePatch::Pricing(_) => Some(QueryKind::Pricing),
            AttributePatch::Features { .. } => Some(QueryKind::Features),
            AttributePatch::Reviews { .. } => Some(QueryKind::Reviews),
            AttributePatch::Competitors { .. } => Some(QueryKind::Competitors),
            AttributePatch::UseCases { .. } => Some(QueryKind::UseCases),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AttributePatch::Pricing(_) => "pricing",
            AttributePatch::Features { .. } => "features",
            AttributePatch::Reviews { .. } => "reviews",
            AttributePatch::Competitors { .. } => "competitors",
            AttributePatch::UseCases { .. } => "use_cases",
            AttributePatch::Comparison { .. } => "comparison",
            AttributePatch::Validation { .. } => "validation",
            AttributePatch::Missing(_) => "missing",
            AttributePatch::Error(_) => "error",
        }
    }
}

/// A patch plus its provenance.
#[derive(Debug, Clone)]
pub struct Contribution {
    pub patch: AttributePatch,
    pub sources: Vec<String>,
    pub query: Option<String>,
}

impl Contribution {
    pub fn new(patch: AttributePatch) -> Self {
        Self {
            patch,
            sources: Vec::new(),
            query: None,
        }
    }

    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }
}

#[derive(Default)]
struct FindingsState {
    by_key: HashMap<String, Finding>,
    order: Vec<String>,
}

impl FindingsState {
    fn ordered(&self) -> Vec<Finding> {
        self.order
            .iter()
            .filter_map(|key| self.by_key.get(key).cloned())
            .collect()
    }
}

pub struct FindingsAggregator {
    mission_id: String,
    bus: Arc<EventBus>,
    state: RwLock<FindingsState>,
}

impl FindingsAggregator {
    pub fn new(mission_id: impl Into<String>, bus: Arc<EventBus>) -> Self {
        Self {
            mission_id: mission_id.into(),
            bus,
            state: RwLock::new(FindingsState::default()),
        }
    }

    /// Rebuild from a persisted snapshot without publishing events.
    pub async fn restore(&self, findings: Vec<Finding>) {
        let mut state = self.state.write().await;
        state.by_key.clear();
        state.order.clear();
        for finding in findings {
            if state.by_key.contains_key(&finding.key) {
                continue;
            }
            state.order.push(finding.key.clone());
            state.by_key.insert(finding.key.clone(), finding);
        }
    }

    /// Seed a finding for a discovered candidate. Returns `false` when an
    /// entity with the same normalized name already exists.
    pub async fn insert_candidate(&self, candidate: &Candidate) -> bool {
        let mut state = self.state.write().await;
        let key = candidate.key();
        if key.is_empty() || state.by_key.contains_key(&key) {
            return false;
        }
        let mut finding = Finding::from_candidate(candidate);
        finding.quality_score = scoring::score(&finding);
        self.publish(&finding, "discovered");
        state.order.push(key.clone());
        state.by_key.insert(key, finding);
        true
    }

    /// Apply a contribution, creating the finding if needed.
    pub async fn merge(&self, name: &str, contribution: Contribution) -> Option<Finding> {
        self.apply(name, contribution, true).await
    }

    /// Apply a contribution only if the finding already exists. Comparison
    /// and validation never create findings.
    pub async fn merge_existing(&self, name: &str, contribution: Contribution) -> Option<Finding> {
        self.apply(name, contribution, false).await
    }

    async fn apply(&self, name: &str, contribution: Contribution, create: bool) -> Option<Finding> {
        let key = normalize_name(name);
        if key.is_empty() {
            return None;
        }

        let mut state = self.state.write().await;
        if !state.by_key.contains_key(&key) {
            if !create {
                debug!(
                    mission_id = %self.mission_id,
                    entity = name,
                    "Ignoring update for unknown entity"
                );
                return None;
            }
            state.order.push(key.clone());
            state.by_key.insert(key.clone(), Finding::new(name.trim()));
        }

        let finding = state.by_key.get_mut(&key)?;
        let label = contribution.patch.label();
        apply_contribution(finding, contribution);
        finding.quality_score = scoring::score(finding);
        self.publish(finding, label);
        Some(finding.clone())
    }

    /// Close one deep-dive pass over an entity.
    pub async fn mark_deepened(&self, name: &str) {
        let key = normalize_name(name);
        let mut state = self.state.write().await;
        if let Some(finding) = state.by_key.get_mut(&key) {
            finding.research_iterations += 1;
            finding.last_deepened = Some(Utc::now());
            self.publish(finding, "deepened");
        }
    }

    /// Flag findings as re-researched. Returns how many were corrected for
    /// the first time, so repeated iterations count each finding once.
    pub async fn mark_corrected(&self, keys: &[String]) -> usize {
        let mut state = self.state.write().await;
        let mut marked = 0;
        for key in keys {
            if let Some(finding) = state.by_key.get_mut(key) {
                if !finding.corrected {
                    finding.corrected = true;
                    marked += 1;
                }
                self.publish(finding, "corrected");
            }
        }
        marked
    }

    /// Recompute every score. Only findings whose score moved are published.
    pub async fn rescore_all(&self) -> f64 {
        let mut state = self.state.write().await;
        let order = state.order.clone();
        for key in &order {
            if let Some(finding) = state.by_key.get_mut(key) {
                let score = scoring::score(finding);
                if (score - finding.quality_score).abs() > f64::EPSILON {
                    finding.quality_score = score;
                    self.publish(finding, "rescored");
                }
            }
        }
        scoring::average(&state.ordered())
    }

    pub async fn list(&self) -> Vec<Finding> {
        self.state.read().await.ordered()
    }

    pub async fn get(&self, name: &str) -> Option<Finding> {
        let key = normalize_name(name);
        self.state.read().await.by_key.get(&key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Findings without an error, best score first. Ties keep discovery order.
    pub async fn ranked(&self) -> Vec<Finding> {
        let mut findings: Vec<Finding> = self
            .list()
            .await
            .into_iter()
            .filter(|f| !f.is_errored())
            .collect();
        findings.sort_by(|a, b| b.quality_score.total_cmp(&a.quality_score));
        findings
    }

    pub async fn average(&self) -> f64 {
        scoring::average(&self.list().await)
    }

    fn publish(&self, finding: &Finding, update: &str) {
        self.bus.publish(
            &self.mission_id,
            EventKind::Finding,
            json!({
                "id": finding.id,
                "name": finding.name,
                "update": update,
                "quality_score": finding.quality_score,
                "verified": finding.verified,
                "unconfirmed": finding.unconfirmed,
                "corrected": finding.corrected,
                "error": finding.error,
                "attributes_populated": finding.attributes.populated_count(),
            }),
        );
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn replace_if_filled(target: &mut Option<String>, value: Option<String>) {
    if let Some(value) = non_empty(value) {
        *target = Some(value);
    }
}

/// Append values not already present (case-insensitive).
fn union_into(target: &mut Vec<String>, values: Vec<String>) {
    for value in values {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            continue;
        }
        let lowered = trimmed.to_lowercase();
        if !target.iter().any(|v| v.to_lowercase() == lowered) {
            target.push(trimmed.to_string());
        }
    }
}

fn apply_contribution(finding: &mut Finding, contribution: Contribution) {
    let Contribution { patch, sources, query } = contribution;
    let attrs = &mut finding.attributes;

    if let Some(kind) = patch.kind() {
        finding.missing.remove(&kind);
    }

    match patch {
        AttributePatch::Pricing(pricing) => {
            let has_content = pricing.price_strings().any(|p| !p.trim().is_empty())
                || pricing.free_trial.is_some();
            // Never trade a concrete price for a placeholder.
            let regresses = scoring::pricing_is_concrete(attrs.pricing.as_ref())
                && !scoring::pricing_is_concrete(Some(&pricing));
            if has_content && !regresses {
                attrs.pricing = Some(pricing);
            }
        }
        AttributePatch::Features {
            features,
            description,
        } => {
            union_into(&mut attrs.features, features);
            if let Some(description) = non_empty(description) {
                attrs.description = description;
            }
        }
        AttributePatch::Reviews { pros, cons, summary } => {
            union_into(&mut attrs.pros, pros);
            union_into(&mut attrs.cons, cons);
            replace_if_filled(&mut attrs.reviews_summary, summary);
        }
        AttributePatch::Competitors {
            competitors,
            integrations,
            founded,
            funding,
        } => {
            union_into(&mut attrs.competitors, competitors);
            union_into(&mut attrs.integrations, integrations);
            replace_if_filled(&mut attrs.founded, founded);
            replace_if_filled(&mut attrs.funding, funding);
        }
        AttributePatch::UseCases {
            use_cases,
            target_audience,
            best_for,
        } => {
            union_into(&mut attrs.use_cases, use_cases);
            replace_if_filled(&mut attrs.target_audience, target_audience);
            replace_if_filled(&mut attrs.best_for, best_for);
        }
        AttributePatch::Comparison { other, note } => {
            if !note.trim().is_empty() {
                attrs.comparison_notes.insert(other.clone(), note);
            }
            union_into(&mut attrs.competitors, vec![other]);
        }
        AttributePatch::Validation { confirmed, note } => {
            finding.verified = confirmed;
            finding.unconfirmed = !confirmed;
            finding.validation_note = non_empty(note);
        }
        AttributePatch::Missing(kind) => {
            finding.missing.insert(kind);
        }
        AttributePatch::Error(reason) => {
            finding.error = Some(reason);
            finding.verified = false;
        }
    }

    union_into(&mut finding.sources, sources);
    if let Some(query) = query {
        finding.research_queries.push(query);
    }
}
