//! Mission runner
//!
//! One orchestrator task per mission. The runner walks the phases starting
//! at `mission.phase`, so a resumed mission continues where it paused. Pause
//! and cancel are checked at every phase boundary and between deep-dive
//! submissions; an in-flight model call always completes.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{info, warn};

use super::{MissionHandle, MissionState, Phase};
use crate::agents::correction::{narrowed_queries, shallow_findings};
use crate::agents::{
    ComparisonAgent, DeepDiveOutcome, DeepDiveScheduler, DiscoveryAgent, PlannedQuery,
    PlanningAgent, QueryPlanner, SynthesisAgent, ValidationAgent,
};
use crate::config::MissionConfig;
use crate::events::EventKind;
use crate::export::Exporter;
use crate::llm::ResearchModel;
use crate::models::{ExportFormat, ExportRecord, ExportStatus, Finding, QueryKind};
use crate::storage::MissionStore;
use crate::types::{AppError, AppResult};

pub const CANCELLED_REASON: &str = "cancelled by user";

enum PhaseOutcome {
    Done,
    /// Stopped early because a pause or cancel was requested
    Interrupted,
}

enum Exit {
    Completed,
    Paused,
    Cancelled,
}

pub struct MissionRunner {
    handle: Arc<MissionHandle>,
    model: ResearchModel,
    store: Arc<dyn MissionStore>,
    exporter: Arc<dyn Exporter>,
    config: MissionConfig,
    started: Instant,
    /// Active time accumulated by earlier runs of this mission
    prior_active: Duration,
    budget: Duration,
}

impl MissionRunner {
    pub fn new(
        handle: Arc<MissionHandle>,
        model: ResearchModel,
        store: Arc<dyn MissionStore>,
        exporter: Arc<dyn Exporter>,
        config: MissionConfig,
    ) -> Self {
        Self {
            handle,
            model,
            store,
            exporter,
            config,
            started: Instant::now(),
            prior_active: Duration::ZERO,
            budget: Duration::MAX,
        }
    }

    /// Drive the mission until it completes, fails or honors a pause. The
    /// caller has already marked the handle as running.
    pub async fn run(mut self) {
        self.started = Instant::now();
        {
            let mission = self.handle.mission.read().await;
            self.prior_active = Duration::from_millis(mission.active_millis);
            self.budget = Duration::from_secs(mission.criteria.max_duration_secs);
        }
        info!(mission_id = %self.handle.id, "Mission runner started");

        let result = self.drive().await;
        self.finish(result).await;
    }

    async fn finish(&self, result: AppResult<Exit>) {
        let mut mission = self.handle.mission.write().await;
        mission.active_millis += self.started.elapsed().as_millis() as u64;

        match result {
            Ok(Exit::Completed) => {
                info!(
                    mission_id = %mission.id,
                    active_ms = mission.active_millis,
                    "Mission completed"
                );
            }
            Ok(Exit::Paused) => {
                if !mission.state.is_terminal() && mission.state != MissionState::Paused {
                    let activity = format!("Paused during {}", mission.phase);
                    let paused = self
                        .handle
                        .transition_locked(&mut mission, MissionState::Paused, activity);
                    if let Err(err) = paused {
                        warn!(mission_id = %mission.id, error = %err, "Could not pause mission");
                    }
                }
                self.handle.control.clear_pause();
                info!(mission_id = %mission.id, phase = %mission.phase, "Mission paused");
            }
            Ok(Exit::Cancelled) => {
                self.handle.fail_locked(&mut mission, CANCELLED_REASON).await;
            }
            Err(err) => {
                warn!(mission_id = %mission.id, error = %err, "Mission failed");
                self.handle.fail_locked(&mut mission, &err.to_string()).await;
            }
        }

        // Snapshot before releasing the lock so a teardown racing this
        // save cannot persist an emptied event log.
        let snapshot = self.handle.snapshot_of(&mission).await;
        self.handle.set_running(false);
        drop(mission);
        self.handle.save(self.store.as_ref(), &snapshot).await;
    }

    async fn drive(&self) -> AppResult<Exit> {
        loop {
            let control = &self.handle.control;
            if control.cancel_requested() {
                return Ok(Exit::Cancelled);
            }
            if control.pause_requested() {
                return Ok(Exit::Paused);
            }

            let phase = self.enter_phase().await?;
            let outcome = match phase {
                Phase::Plan => self.plan().await?,
                Phase::Discover => self.discover().await?,
                Phase::DeepDive => self.deep_dive().await?,
                Phase::Compare => self.compare().await?,
                Phase::Validate => self.validate().await?,
                Phase::Score => self.score().await?,
                Phase::SelfCorrect => self.self_correct().await?,
                Phase::Synthesize => self.synthesize().await?,
            };

            match outcome {
                PhaseOutcome::Interrupted => {
                    return Ok(if control.cancel_requested() {
                        Exit::Cancelled
                    } else {
                        Exit::Paused
                    });
                }
                PhaseOutcome::Done => match phase.next() {
                    Some(next) => {
                        self.handle.update(|m| m.phase = next).await;
                        self.handle.publish_progress().await;
                        self.handle.checkpoint(self.store.as_ref(), false).await;
                    }
                    None => return Ok(Exit::Completed),
                },
            }
        }
    }

    /// Move the lifecycle into the state of the current phase.
    async fn enter_phase(&self) -> AppResult<Phase> {
        let mut mission = self.handle.mission.write().await;
        let phase = mission.phase;
        let target = phase.lifecycle_state();
        let self_loop = matches!(target, MissionState::Researching | MissionState::Analyzing);
        let resuming_correction = phase == Phase::SelfCorrect && mission.in_correction;

        if resuming_correction || (mission.state == target && !self_loop) {
            return Ok(phase);
        }
        let activity = match phase {
            Phase::Plan => "Planning research strategy",
            Phase::Discover => "Discovering candidates",
            Phase::DeepDive => "Researching candidates in depth",
            Phase::Compare => "Comparing top findings",
            Phase::Validate => "Validating top findings",
            Phase::Score => "Scoring findings",
            Phase::SelfCorrect => "Checking for shallow findings",
            Phase::Synthesize => "Synthesizing report",
        };
        self.handle
            .transition_locked(&mut mission, target, activity.to_string())?;
        Ok(phase)
    }

    fn deadline_passed(&self) -> bool {
        self.prior_active + self.started.elapsed() >= self.budget
    }

    fn publish_action(&self, action: &str, data: serde_json::Value) {
        let mut payload = json!({ "action": action });
        if let (Some(target), Some(extra)) = (payload.as_object_mut(), data.as_object()) {
            target.extend(extra.clone());
        }
        self.handle
            .bus()
            .publish(&self.handle.id, EventKind::Action, payload);
    }

    async fn goal(&self) -> String {
        self.handle.mission.read().await.goal.clone()
    }

    async fn plan(&self) -> AppResult<PhaseOutcome> {
        let (goal, target) = {
            let mission = self.handle.mission.read().await;
            (mission.goal.clone(), mission.criteria.target_count)
        };
        let plan = PlanningAgent::generate_plan(&self.model, &goal, target).await?;
        let kinds = QueryPlanner::kinds_for(&plan.required_attributes);
        let target = self
            .handle
            .update(|m| {
                m.criteria.adopt_suggested_target(plan.suggested_target);
                m.plan = Some(plan.clone());
                m.criteria.target_count
            })
            .await;
        self.publish_action(
            "plan",
            json!({
                "strategy": plan.strategy,
                "discovery_queries": plan.discovery_queries.len(),
                "target_count": target,
                "query_kinds": kinds,
            }),
        );
        Ok(PhaseOutcome::Done)
    }

    async fn discover(&self) -> AppResult<PhaseOutcome> {
        let (goal, target, plan) = {
            let mission = self.handle.mission.read().await;
            (
                mission.goal.clone(),
                mission.criteria.target_count,
                mission.plan.clone().unwrap_or_default(),
            )
        };

        let candidates = DiscoveryAgent::discover(
            &self.model,
            &goal,
            &plan,
            self.config.discovery_queries,
            target,
        )
        .await?;
        if candidates.is_empty() {
            return Err(AppError::Internal("discovery surfaced no candidates".to_string()));
        }

        self.publish_action(
            "discover",
            json!({
                "candidates": candidates.iter().map(|c| c.name.clone()).collect::<Vec<_>>(),
            }),
        );
        self.handle.update(|m| m.candidates = candidates).await;
        Ok(PhaseOutcome::Done)
    }

    async fn deep_dive(&self) -> AppResult<PhaseOutcome> {
        let queries: Vec<PlannedQuery> = {
            let known: HashSet<String> = self
                .handle
                .findings
                .list()
                .await
                .into_iter()
                .map(|f| f.key)
                .collect();
            let mission = self.handle.mission.read().await;
            if mission.pending_queries.is_empty() {
                let kinds = mission
                    .plan
                    .as_ref()
                    .map(|plan| QueryPlanner::kinds_for(&plan.required_attributes))
                    .unwrap_or_else(|| QueryKind::ALL.to_vec());
                mission
                    .candidates
                    .iter()
                    .filter(|c| !known.contains(&c.key()))
                    .flat_map(|c| QueryPlanner::plan_kinds(&mission.goal, c.name.trim(), &kinds))
                    .collect()
            } else {
                mission.pending_queries.clone()
            }
        };

        let outcome = self.research(queries).await?;
        Ok(if outcome.interrupted() {
            PhaseOutcome::Interrupted
        } else {
            PhaseOutcome::Done
        })
    }

    /// Run queries through the scheduler; unsubmitted ones are kept on the
    /// mission for the next run.
    async fn research(&self, queries: Vec<PlannedQuery>) -> AppResult<DeepDiveOutcome> {
        let seeds = self.handle.mission.read().await.candidates.clone();
        let scheduler = DeepDiveScheduler::new(
            self.handle.id.clone(),
            self.model.clone(),
            self.handle.findings.clone(),
            self.handle.control.clone(),
            self.handle.bus().clone(),
            self.config.max_in_flight_per_mission,
        );

        let mut outcome = scheduler.run(queries, &seeds).await;
        let pending = outcome.pending.clone();
        self.handle.update(|m| m.pending_queries = pending).await;
        self.handle.publish_progress().await;

        match outcome.fatal.take() {
            Some(err) => Err(err.into()),
            None => Ok(outcome),
        }
    }

    async fn compare(&self) -> AppResult<PhaseOutcome> {
        if self.deadline_passed() {
            info!(mission_id = %self.handle.id, "Time budget spent, skipping comparison");
            return Ok(PhaseOutcome::Done);
        }
        let goal = self.goal().await;
        let compared = ComparisonAgent::compare(
            &self.model,
            &self.handle.findings,
            &goal,
            self.config.comparison_pairs,
        )
        .await?;
        self.publish_action("compare", json!({ "pairs": compared }));
        Ok(PhaseOutcome::Done)
    }

    async fn validate(&self) -> AppResult<PhaseOutcome> {
        if self.deadline_passed() {
            info!(mission_id = %self.handle.id, "Time budget spent, skipping validation");
            return Ok(PhaseOutcome::Done);
        }
        let sample = self.config.validation_sample;
        let confirmed =
            ValidationAgent::validate(&self.model, &self.handle.findings, sample).await?;
        self.publish_action("validate", json!({ "confirmed": confirmed }));
        Ok(PhaseOutcome::Done)
    }

    async fn rescore(&self) -> f64 {
        let average = self.handle.findings.rescore_all().await;
        self.handle.update(|m| m.quality_average = average).await;
        self.handle.publish_progress().await;
        average
    }

    async fn score(&self) -> AppResult<PhaseOutcome> {
        let average = self.rescore().await;
        info!(mission_id = %self.handle.id, quality_average = average, "Findings scored");
        Ok(PhaseOutcome::Done)
    }

    /// Score, pick shallow findings, re-dive with narrowed queries, repeat.
    /// Driven by the lifecycle state so a pause anywhere in an iteration
    /// resumes at the right step.
    async fn self_correct(&self) -> AppResult<PhaseOutcome> {
        self.handle.update(|m| m.in_correction = true).await;

        loop {
            let (state, pending) = {
                let mission = self.handle.mission.read().await;
                (mission.state, mission.pending_queries.clone())
            };

            match state {
                MissionState::Researching => {
                    if !pending.is_empty() {
                        let outcome = self.research(pending).await?;
                        let corrected =
                            self.handle.findings.mark_corrected(&outcome.researched).await;
                        self.handle.update(|m| m.corrections_made += corrected).await;
                        if outcome.interrupted() {
                            return Ok(PhaseOutcome::Interrupted);
                        }
                    }
                    self.handle
                        .transition(MissionState::Scoring, "Rescoring corrected findings")
                        .await?;
                }
                MissionState::Scoring => {
                    self.rescore().await;
                    self.handle
                        .transition(MissionState::Correcting, "Checking for shallow findings")
                        .await?;
                }
                MissionState::Correcting => {
                    if self.handle.control.should_stop() {
                        return Ok(PhaseOutcome::Interrupted);
                    }

                    self.rescore().await;
                    let (goal, threshold, iterations) = {
                        let mission = self.handle.mission.read().await;
                        (
                            mission.goal.clone(),
                            mission.criteria.quality_threshold,
                            mission.correction_iterations,
                        )
                    };
                    let shallow = shallow_findings(&self.handle.findings.list().await, threshold);

                    if shallow.is_empty() {
                        info!(mission_id = %self.handle.id, "No shallow findings left");
                        break;
                    }
                    if iterations >= self.config.correction_max_iterations {
                        info!(
                            mission_id = %self.handle.id,
                            remaining = shallow.len(),
                            "Correction budget spent, keeping last scores"
                        );
                        break;
                    }
                    if self.deadline_passed() {
                        info!(
                            mission_id = %self.handle.id,
                            "Time budget spent, skipping correction"
                        );
                        break;
                    }

                    let iteration = iterations + 1;
                    let queries = narrowed_queries(&goal, &shallow);
                    self.publish_action(
                        "self_correct",
                        json!({
                            "iteration": iteration,
                            "shallow": shallow.iter().map(|f| f.name.clone()).collect::<Vec<_>>(),
                            "queries": queries.len(),
                        }),
                    );
                    info!(
                        mission_id = %self.handle.id,
                        iteration,
                        shallow = shallow.len(),
                        queries = queries.len(),
                        "Self-correction iteration"
                    );

                    let mut mission = self.handle.mission.write().await;
                    mission.correction_iterations = iteration;
                    mission.pending_queries = queries;
                    self.handle.transition_locked(
                        &mut mission,
                        MissionState::Researching,
                        format!("Re-researching {} shallow findings", shallow.len()),
                    )?;
                }
                other => {
                    return Err(AppError::InvalidState(format!(
                        "self-correction cannot run in state {}",
                        other
                    )));
                }
            }
        }

        self.handle.update(|m| m.in_correction = false).await;
        Ok(PhaseOutcome::Done)
    }

    async fn synthesize(&self) -> AppResult<PhaseOutcome> {
        let goal = self.goal().await;
        let ranked = self.handle.findings.ranked().await;
        let report = SynthesisAgent::synthesize(&self.model, &goal, &ranked).await?;
        self.handle.update(|m| m.report = Some(report)).await;

        let formats = self.handle.mission.read().await.criteria.export_formats.clone();
        let records = run_exports(&self.handle, self.exporter.as_ref(), &formats).await;

        let findings_count = self.handle.findings.len().await;
        let mut mission = self.handle.mission.write().await;
        mission.exports.extend(records);
        self.handle.transition_locked(
            &mut mission,
            MissionState::Completed,
            "Mission complete".to_string(),
        )?;
        self.handle.bus().publish(
            &mission.id,
            EventKind::Complete,
            json!({
                "findings_count": findings_count,
                "quality_average": mission.quality_average,
                "corrections_made": mission.corrections_made,
                "report": mission.report,
                "exports": mission.exports,
            }),
        );
        Ok(PhaseOutcome::Done)
    }
}

/// Render every format through the exporter, one record each. Progress is
/// published while the mission's event stream is still open.
pub async fn run_exports(
    handle: &MissionHandle,
    exporter: &dyn Exporter,
    formats: &[ExportFormat],
) -> Vec<ExportRecord> {
    let mission = handle.mission.read().await.clone();
    let findings: Vec<Finding> = handle.findings.list().await;
    let bus = handle.bus();
    let live = !bus.is_closed(&handle.id);

    let mut records = Vec::with_capacity(formats.len());
    for &format in formats {
        let mut record = ExportRecord::pending(format, findings.len());
        match exporter.render(&mission, &findings, &record).await {
            Ok(file) => {
                record.status = ExportStatus::Success;
                record.file = Some(file);
            }
            Err(err) => {
                warn!(mission_id = %handle.id, format = %format, error = %err, "Export failed");
                record.status = ExportStatus::Failed;
                record.error = Some(err.to_string());
                if live {
                    bus.publish(
                        &handle.id,
                        EventKind::Error,
                        json!({
                            "scope": "export",
                            "format": format,
                            "error": err.to_string(),
                        }),
                    );
                }
            }
        }
        if live {
            bus.publish(
                &handle.id,
                EventKind::Action,
                json!({ "action": "export", "export": record }),
            );
        }
        records.push(record);
    }
    records
}
