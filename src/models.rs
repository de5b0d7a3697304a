use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::config::Config;
use crate::mission::MissionEngine;
use crate::utils::normalize_name;

#[derive(Clone)]
pub struct AppState {
    pub engine: MissionEngine,
    pub config: Config,
}

/// The five targeted angles of a deep dive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Pricing,
    Features,
    Reviews,
    Competitors,
    UseCases,
}

impl QueryKind {
    pub const ALL: [QueryKind; 5] = [
        QueryKind::Pricing,
        QueryKind::Features,
        QueryKind::Reviews,
        QueryKind::Competitors,
        QueryKind::UseCases,
    ];

    /// Kinds the quality scorer checks; every deep dive covers them.
    pub const SCORED: [QueryKind; 3] =
        [QueryKind::Pricing, QueryKind::Features, QueryKind::Reviews];

    /// Map a free-form plan attribute ("pricing tiers", "integrations",
    /// "target audience") onto the kind that researches it.
    pub fn from_attribute(attribute: &str) -> Option<QueryKind> {
        let attribute = attribute.trim().to_lowercase();
        let matches = |words: &[&str]| words.iter().any(|w| attribute.contains(w));
        if matches(&["pric", "cost", "tier", "free trial"]) {
            Some(QueryKind::Pricing)
        } else if matches(&["feature", "capabilit", "functionality"]) {
            Some(QueryKind::Features)
        } else if matches(&["review", "pros", "cons", "rating", "sentiment"]) {
            Some(QueryKind::Reviews)
        } else if matches(&["competitor", "alternative", "integration", "funding", "founded"]) {
            Some(QueryKind::Competitors)
        } else if matches(&[
            "use case", "use_case", "usecase", "audience", "best for", "best_for",
        ]) {
            Some(QueryKind::UseCases)
        } else {
            None
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            QueryKind::Pricing => "pricing",
            QueryKind::Features => "features",
            QueryKind::Reviews => "reviews",
            QueryKind::Competitors => "competitors",
            QueryKind::UseCases => "use_cases",
        }
    }
}

impl std::fmt::Display for QueryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// An entity surfaced during discovery, not yet researched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub name: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub discovered_via: String,
}

impl Candidate {
    pub fn key(&self) -> String {
        normalize_name(&self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PricingTier {
    pub name: String,
    pub price: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_price: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tiers: Vec<PricingTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free_trial: Option<bool>,
}

impl Pricing {
    /// Every price string carried by this pricing block.
    pub fn price_strings(&self) -> impl Iterator<Item = &str> {
        self.starting_price
            .as_deref()
            .into_iter()
            .chain(self.tiers.iter().map(|t| t.price.as_str()))
    }

    /// Short human form used in exports and synthesis.
    pub fn summary(&self) -> String {
        match (&self.starting_price, self.tiers.first()) {
            (Some(start), _) => start.clone(),
            (None, Some(tier)) => format!("{}: {}", tier.name, tier.price),
            (None, None) => String::new(),
        }
    }
}

/// Researched attributes of an entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindingAttributes {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub pricing: Option<Pricing>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub pros: Vec<String>,
    #[serde(default)]
    pub cons: Vec<String>,
    #[serde(default)]
    pub use_cases: Vec<String>,
    #[serde(default)]
    pub target_audience: Option<String>,
    #[serde(default)]
    pub best_for: Option<String>,
    #[serde(default)]
    pub competitors: Vec<String>,
    #[serde(default)]
    pub integrations: Vec<String>,
    #[serde(default)]
    pub reviews_summary: Option<String>,
    #[serde(default)]
    pub founded: Option<String>,
    #[serde(default)]
    pub funding: Option<String>,
    /// Keyed by the other entity's display name
    #[serde(default)]
    pub comparison_notes: BTreeMap<String, String>,
}

fn filled(value: &Option<String>) -> bool {
    value.as_deref().map(|v| !v.trim().is_empty()).unwrap_or(false)
}

impl FindingAttributes {
    /// Number of populated attributes.
    pub fn populated_count(&self) -> usize {
        [
            !self.description.trim().is_empty(),
            !self.category.trim().is_empty(),
            filled(&self.website),
            self.pricing.is_some(),
            !self.features.is_empty(),
            !self.pros.is_empty(),
            !self.cons.is_empty(),
            !self.use_cases.is_empty(),
            filled(&self.target_audience),
            filled(&self.best_for),
            !self.competitors.is_empty(),
            !self.integrations.is_empty(),
            filled(&self.reviews_summary),
            filled(&self.founded),
            filled(&self.funding),
            !self.comparison_notes.is_empty(),
        ]
        .iter()
        .filter(|populated| **populated)
        .count()
    }
}

/// The structured record produced for one researched entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub name: String,
    /// Normalized identity, unique within a mission
    pub key: String,
    pub attributes: FindingAttributes,
    pub quality_score: f64,
    pub verified: bool,
    /// Validation could not re-confirm the cited facts
    #[serde(default)]
    pub unconfirmed: bool,
    #[serde(default)]
    pub validation_note: Option<String>,
    pub corrected: bool,
    pub error: Option<String>,
    /// Attribute sets whose query failed
    #[serde(default)]
    pub missing: BTreeSet<QueryKind>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub research_queries: Vec<String>,
    #[serde(default)]
    pub research_iterations: u32,
    pub discovered_at: DateTime<Utc>,
    pub last_deepened: Option<DateTime<Utc>>,
}

impl Finding {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let key = normalize_name(&name);
        Self {
            id: uuid::Uuid::new_v4().simple().to_string()[..12].to_string(),
            name,
            key,
            attributes: FindingAttributes::default(),
            quality_score: 0.0,
            verified: false,
            unconfirmed: false,
            validation_note: None,
            corrected: false,
            error: None,
            missing: BTreeSet::new(),
            sources: Vec::new(),
            research_queries: Vec::new(),
            research_iterations: 0,
            discovered_at: Utc::now(),
            last_deepened: None,
        }
    }

    pub fn from_candidate(candidate: &Candidate) -> Self {
        let mut finding = Self::new(candidate.name.trim());
        finding.attributes.category = candidate.category.clone();
        finding.attributes.description = candidate.rationale.clone();
        finding.attributes.website = candidate.website.clone();
        finding
    }

    pub fn is_errored(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
    Markdown,
    Pdf,
}

impl ExportFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "json" => Some(ExportFormat::Json),
            "csv" => Some(ExportFormat::Csv),
            "md" | "markdown" => Some(ExportFormat::Markdown),
            "pdf" => Some(ExportFormat::Pdf),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Markdown => "md",
            ExportFormat::Pdf => "pdf",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Markdown => "text/markdown; charset=utf-8",
            ExportFormat::Pdf => "application/pdf",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportStatus {
    Pending,
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRecord {
    pub id: String,
    pub format: ExportFormat,
    pub status: ExportStatus,
    pub record_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ExportRecord {
    pub fn pending(format: ExportFormat, record_count: usize) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string()[..8].to_string(),
            format,
            status: ExportStatus::Pending,
            record_count,
            file: None,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Name of the written file, for successful exports.
    pub fn file_name(&self) -> Option<&str> {
        if self.status != ExportStatus::Success {
            return None;
        }
        std::path::Path::new(self.file.as_deref()?)
            .file_name()?
            .to_str()
    }
}

// API Request/Response types

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateMissionRequest {
    #[validate(length(min = 1, max = 2000))]
    pub goal: String,
    #[serde(default)]
    #[validate(range(min = 0.0, max = 1.0))]
    pub quality_threshold: Option<f64>,
    #[serde(default)]
    #[validate(range(min = 1, max = 100))]
    pub target_count: Option<usize>,
    #[serde(default)]
    pub max_duration_secs: Option<u64>,
    #[serde(default)]
    pub checkpoint_interval_secs: Option<u64>,
    #[serde(default)]
    pub export_formats: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct MissionCreatedResponse {
    pub mission_id: String,
    pub status: crate::mission::MissionState,
    pub message: String,
    pub stream_url: String,
    pub started_at: DateTime<Utc>,
}

impl MissionCreatedResponse {
    pub fn new(status: crate::mission::MissionStatus, message: String) -> Self {
        Self {
            stream_url: format!("/api/status/{}/stream", status.mission_id),
            message,
            mission_id: status.mission_id,
            status: status.state,
            started_at: status.created_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct FindingsQuery {
    pub min_score: Option<f64>,
    #[serde(default)]
    pub verified_only: bool,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct FindingsResponse {
    pub mission_id: String,
    pub findings: Vec<Finding>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct MissionListQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct MissionListResponse {
    pub missions: Vec<crate::mission::MissionSummary>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

/// A written export file and where to fetch it.
#[derive(Debug, Serialize)]
pub struct ExportFile {
    pub export_id: String,
    pub format: ExportFormat,
    pub filename: String,
    pub download_url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ExportFilesResponse {
    pub mission_id: String,
    pub files: Vec<ExportFile>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct FindingsSummary {
    pub mission_id: String,
    pub total_findings: usize,
    pub average_quality: f64,
    pub min_quality: f64,
    pub max_quality: f64,
    pub verified_count: usize,
    pub unconfirmed_count: usize,
    pub corrected_count: usize,
    pub error_count: usize,
    pub by_source: BTreeMap<String, usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExportRequest {
    #[serde(default)]
    pub formats: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ExportResponse {
    pub mission_id: String,
    pub exports: Vec<ExportRecord>,
    pub total_findings: usize,
    pub exported_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    pub from: Option<u64>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub missions: usize,
}
