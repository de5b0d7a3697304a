//! Mission State Machine
//!
//! A mission walks eight ordered phases:
//!
//! ```text
//! Plan ─▶ Discover ─▶ DeepDive ─▶ Compare ─▶ Validate ─▶ Score ─▶ SelfCorrect ─▶ Synthesize
//!                                                          ▲           │
//!                                                          └───────────┘
//!                                                       (narrowed re-dives)
//! ```
//!
//! Each phase maps onto a lifecycle [`MissionState`]; the lifecycle only ever
//! moves through [`MissionHandle::transition`], which checks the edge against
//! the graph in [`state`] and publishes a `status` event.

pub mod engine;
pub mod handle;
pub mod runner;
pub mod state;

pub use engine::MissionEngine;
pub use handle::{MissionControl, MissionHandle};
pub use state::MissionState;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::agents::PlannedQuery;
use crate::config::MissionConfig;
use crate::events::MissionEvent;
use crate::llm::schema::{ResearchPlan, SynthesisReport};
use crate::models::{Candidate, CreateMissionRequest, ExportFormat, ExportRecord, Finding};
use crate::types::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Plan,
    Discover,
    DeepDive,
    Compare,
    Validate,
    Score,
    SelfCorrect,
    Synthesize,
}

impl Phase {
    pub const COUNT: usize = 8;

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn next(&self) -> Option<Phase> {
        match self {
            Phase::Plan => Some(Phase::Discover),
            Phase::Discover => Some(Phase::DeepDive),
            Phase::DeepDive => Some(Phase::Compare),
            Phase::Compare => Some(Phase::Validate),
            Phase::Validate => Some(Phase::Score),
            Phase::Score => Some(Phase::SelfCorrect),
            Phase::SelfCorrect => Some(Phase::Synthesize),
            Phase::Synthesize => None,
        }
    }

    pub fn lifecycle_state(&self) -> MissionState {
        match self {
            Phase::Plan => MissionState::Planning,
            Phase::Discover | Phase::DeepDive => MissionState::Researching,
            Phase::Compare | Phase::Validate => MissionState::Analyzing,
            Phase::Score => MissionState::Scoring,
            Phase::SelfCorrect => MissionState::Correcting,
            Phase::Synthesize => MissionState::Exporting,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Phase::Plan => "plan",
            Phase::Discover => "discover",
            Phase::DeepDive => "deep_dive",
            Phase::Compare => "compare",
            Phase::Validate => "validate",
            Phase::Score => "score",
            Phase::SelfCorrect => "self_correct",
            Phase::Synthesize => "synthesize",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Upper bound on a mission's target count, from any source.
pub const MAX_TARGET_COUNT: usize = 100;

/// User-tunable knobs of one mission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct MissionCriteria {
    #[validate(range(min = 0.0, max = 1.0))]
    pub quality_threshold: f64,
    #[validate(range(min = 1))]
    pub target_count: usize,
    /// Set when the caller chose `target_count`; otherwise the plan's
    /// suggestion replaces the configured default.
    #[serde(default)]
    pub target_fixed: bool,
    #[validate(range(min = 1))]
    pub max_duration_secs: u64,
    #[validate(range(min = 1))]
    pub checkpoint_interval_secs: u64,
    pub export_formats: Vec<ExportFormat>,
}

impl MissionCriteria {
    /// Derive checks plus finiteness, which range checks let NaN through.
    pub fn check(&self) -> AppResult<()> {
        self.validate()?;
        if !self.quality_threshold.is_finite() {
            return Err(AppError::Validation(
                "quality_threshold must be a finite number".to_string(),
            ));
        }
        Ok(())
    }

    /// Adopt the plan's suggested target unless the caller fixed one.
    pub fn adopt_suggested_target(&mut self, suggested: Option<usize>) {
        if self.target_fixed {
            return;
        }
        if let Some(target) = suggested.filter(|t| *t > 0) {
            self.target_count = target.min(MAX_TARGET_COUNT);
        }
    }

    pub fn from_config(config: &MissionConfig) -> Self {
        Self {
            quality_threshold: config.default_quality_threshold,
            target_count: config.default_target_count,
            target_fixed: false,
            max_duration_secs: config.max_duration_secs,
            checkpoint_interval_secs: config.checkpoint_interval_secs,
            export_formats: config
                .default_export_formats
                .iter()
                .filter_map(|f| ExportFormat::parse(f))
                .collect(),
        }
    }

    /// Overlay request fields on configured defaults.
    pub fn from_request(request: &CreateMissionRequest, config: &MissionConfig) -> AppResult<Self> {
        let mut criteria = Self::from_config(config);
        if let Some(threshold) = request.quality_threshold {
            criteria.quality_threshold = threshold;
        }
        if let Some(target) = request.target_count {
            criteria.target_count = target;
            criteria.target_fixed = true;
        }
        if let Some(secs) = request.max_duration_secs {
            criteria.max_duration_secs = secs;
        }
        if let Some(secs) = request.checkpoint_interval_secs {
            criteria.checkpoint_interval_secs = secs;
        }
        if let Some(formats) = &request.export_formats {
            criteria.export_formats = parse_formats(formats)?;
        }
        Ok(criteria)
    }
}

pub fn parse_formats(raw: &[String]) -> AppResult<Vec<ExportFormat>> {
    let mut formats = Vec::new();
    for name in raw {
        let format = ExportFormat::parse(name)
            .ok_or_else(|| AppError::Validation(format!("Unknown export format: {}", name)))?;
        if !formats.contains(&format) {
            formats.push(format);
        }
    }
    Ok(formats)
}

pub fn generate_mission_id() -> String {
    format!("chr_{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
}

/// The mission record. Mutated only by its [`MissionHandle`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mission {
    pub id: String,
    pub goal: String,
    pub criteria: MissionCriteria,
    pub phase: Phase,
    pub state: MissionState,
    pub paused_from: Option<MissionState>,
    pub activity: String,
    pub plan: Option<ResearchPlan>,
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    /// Deep-dive queries not yet submitted when a pause was honored
    #[serde(default)]
    pub pending_queries: Vec<PlannedQuery>,
    #[serde(default)]
    pub in_correction: bool,
    #[serde(default)]
    pub correction_iterations: u32,
    #[serde(default)]
    pub corrections_made: usize,
    #[serde(default)]
    pub quality_average: f64,
    /// Time spent running, excluding pauses
    #[serde(default)]
    pub active_millis: u64,
    pub report: Option<SynthesisReport>,
    #[serde(default)]
    pub exports: Vec<ExportRecord>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Mission {
    pub fn new(goal: impl Into<String>, criteria: MissionCriteria) -> Self {
        let now = Utc::now();
        Self {
            id: generate_mission_id(),
            goal: goal.into(),
            criteria,
            phase: Phase::Plan,
            state: MissionState::Pending,
            paused_from: None,
            activity: "Mission created".to_string(),
            plan: None,
            candidates: Vec::new(),
            pending_queries: Vec::new(),
            in_correction: false,
            correction_iterations: 0,
            corrections_made: 0,
            quality_average: 0.0,
            active_millis: 0,
            report: None,
            exports: Vec::new(),
            failure_reason: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn completion_percentage(&self) -> f64 {
        if self.state == MissionState::Completed {
            return 100.0;
        }
        (self.phase.index() as f64 / Phase::COUNT as f64 * 100.0).round()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionProgress {
    pub findings_count: usize,
    pub target_count: usize,
    pub current_phase: Phase,
    pub quality_average: f64,
    pub corrections_made: usize,
    pub completion_percentage: f64,
}

/// Consistent point-in-time view of a mission.
#[derive(Debug, Clone, Serialize)]
pub struct MissionStatus {
    pub mission_id: String,
    pub goal: String,
    pub state: MissionState,
    pub phase: Phase,
    pub activity: String,
    pub paused_from: Option<MissionState>,
    pub progress: MissionProgress,
    pub correction_iterations: u32,
    pub pending_queries: usize,
    pub failure_reason: Option<String>,
    pub report: Option<SynthesisReport>,
    pub exports: Vec<ExportRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl MissionStatus {
    pub fn from_mission(mission: &Mission, findings_count: usize) -> Self {
        Self {
            mission_id: mission.id.clone(),
            goal: mission.goal.clone(),
            state: mission.state,
            phase: mission.phase,
            activity: mission.activity.clone(),
            paused_from: mission.paused_from,
            progress: MissionProgress {
                findings_count,
                target_count: mission.criteria.target_count,
                current_phase: mission.phase,
                quality_average: mission.quality_average,
                corrections_made: mission.corrections_made,
                completion_percentage: mission.completion_percentage(),
            },
            correction_iterations: mission.correction_iterations,
            pending_queries: mission.pending_queries.len(),
            failure_reason: mission.failure_reason.clone(),
            report: mission.report.clone(),
            exports: mission.exports.clone(),
            created_at: mission.created_at,
            updated_at: mission.updated_at,
            completed_at: mission.completed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MissionSummary {
    pub mission_id: String,
    pub goal: String,
    pub state: MissionState,
    pub phase: Phase,
    pub findings_count: usize,
    pub quality_average: f64,
    pub created_at: DateTime<Utc>,
}

/// Unit of persistence: the mission, its findings and its event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionSnapshot {
    pub mission: Mission,
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub events: Vec<MissionEvent>,
    pub saved_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn criteria() -> MissionCriteria {
        MissionCriteria::from_config(&MissionConfig::default())
    }

    #[test]
    fn test_phase_order_and_states() {
        let mut phase = Phase::Plan;
        let mut seen = vec![phase];
        while let Some(next) = phase.next() {
            assert!(next > phase);
            phase = next;
            seen.push(phase);
        }
        assert_eq!(seen.len(), Phase::COUNT);
        assert_eq!(Phase::DeepDive.lifecycle_state(), MissionState::Researching);
        assert_eq!(Phase::Validate.lifecycle_state(), MissionState::Analyzing);
        assert_eq!(Phase::Synthesize.lifecycle_state(), MissionState::Exporting);
    }

    #[test]
    fn test_default_criteria_validate() {
        let c = criteria();
        assert!(c.check().is_ok());
        assert_eq!(c.quality_threshold, 0.7);
        assert_eq!(c.export_formats, vec![ExportFormat::Json, ExportFormat::Markdown]);
    }

    #[test]
    fn test_invalid_criteria_rejected() {
        let mut c = criteria();
        c.quality_threshold = 1.5;
        assert!(matches!(c.check(), Err(AppError::Validation(_))));

        let mut c = criteria();
        c.quality_threshold = f64::NAN;
        assert!(matches!(c.check(), Err(AppError::Validation(_))));

        let mut c = criteria();
        c.target_count = 0;
        assert!(c.check().is_err());

        let mut c = criteria();
        c.max_duration_secs = 0;
        assert!(c.check().is_err());
    }

    #[test]
    fn test_suggested_target_only_replaces_default() {
        let config = MissionConfig::default();
        let mut request = CreateMissionRequest {
            goal: "CRM tools".into(),
            quality_threshold: None,
            target_count: None,
            max_duration_secs: None,
            checkpoint_interval_secs: None,
            export_formats: None,
        };

        let mut open = MissionCriteria::from_request(&request, &config).unwrap();
        assert!(!open.target_fixed);
        open.adopt_suggested_target(Some(6));
        assert_eq!(open.target_count, 6);
        open.adopt_suggested_target(Some(500));
        assert_eq!(open.target_count, MAX_TARGET_COUNT);
        open.adopt_suggested_target(Some(0));
        assert_eq!(open.target_count, MAX_TARGET_COUNT);

        request.target_count = Some(4);
        let mut fixed = MissionCriteria::from_request(&request, &config).unwrap();
        assert!(fixed.target_fixed);
        fixed.adopt_suggested_target(Some(6));
        assert_eq!(fixed.target_count, 4);
    }

    #[test]
    fn test_unknown_export_format_rejected() {
        let formats = vec!["json".to_string(), "xlsx".to_string()];
        assert!(matches!(parse_formats(&formats), Err(AppError::Validation(_))));
        let formats = vec!["json".to_string(), "JSON".to_string(), "csv".to_string()];
        assert_eq!(parse_formats(&formats).unwrap(), vec![ExportFormat::Json, ExportFormat::Csv]);
    }

    #[test]
    fn test_mission_id_format() {
        let id = generate_mission_id();
        assert!(id.starts_with("chr_"));
        assert_eq!(id.len(), 12);
    }

    #[test]
    fn test_completion_percentage() {
        let mut mission = Mission::new("goal", criteria());
        assert_eq!(mission.completion_percentage(), 0.0);
        mission.phase = Phase::Score;
        assert_eq!(mission.completion_percentage(), 63.0);
        mission.state = MissionState::Completed;
        assert_eq!(mission.completion_percentage(), 100.0);
    }
}
