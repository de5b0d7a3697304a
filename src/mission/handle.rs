use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use super::{Mission, MissionSnapshot, MissionState, MissionStatus, MissionSummary};
use crate::events::{EventBus, EventKind, MISSION_SCOPE};
use crate::findings::FindingsAggregator;
use crate::storage::MissionStore;
use crate::types::{AppError, AppResult};

/// Cooperative pause/cancel flags, checked between submissions and at phase
/// boundaries.
#[derive(Debug, Default)]
pub struct MissionControl {
    pause: AtomicBool,
    cancel: AtomicBool,
}

impl MissionControl {
    pub fn request_pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
    }

    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn pause_requested(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// No further work should be submitted.
    pub fn should_stop(&self) -> bool {
        self.pause_requested() || self.cancel_requested()
    }

    pub fn clear_pause(&self) {
        self.pause.store(false, Ordering::SeqCst);
    }
}

/// Registry entry for one mission: the record, its findings and its flags.
pub struct MissionHandle {
    pub id: String,
    pub mission: RwLock<Mission>,
    pub findings: Arc<FindingsAggregator>,
    pub control: Arc<MissionControl>,
    bus: Arc<EventBus>,
    /// An orchestrator task is driving this mission. Read and written only
    /// while holding the `mission` write lock.
    running: AtomicBool,
    last_checkpoint: Mutex<Option<Instant>>,
}

impl MissionHandle {
    pub fn new(mission: Mission, bus: Arc<EventBus>) -> Self {
        let id = mission.id.clone();
        Self {
            findings: Arc::new(FindingsAggregator::new(id.clone(), bus.clone())),
            id,
            mission: RwLock::new(mission),
            control: Arc::new(MissionControl::default()),
            bus,
            running: AtomicBool::new(false),
            last_checkpoint: Mutex::new(None),
        }
    }

    /// Rebuild a handle from persistence, including its event log.
    pub async fn restore(snapshot: MissionSnapshot, bus: Arc<EventBus>) -> Self {
        let MissionSnapshot {
            mission,
            findings,
            events,
            ..
        } = snapshot;
        bus.restore(&mission.id, events);
        let handle = Self::new(mission, bus);
        handle.findings.restore(findings).await;
        handle
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Mark the orchestrator as running; call with the mission lock held.
    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// Move the lifecycle along one edge of the graph and publish a status
    /// event.
    pub async fn transition(&self, to: MissionState, activity: impl Into<String>) -> AppResult<()> {
        let mut mission = self.mission.write().await;
        self.transition_locked(&mut mission, to, activity.into())
    }

    pub(crate) fn transition_locked(
        &self,
        mission: &mut Mission,
        to: MissionState,
        activity: String,
    ) -> AppResult<()> {
        let from = mission.state;
        if !from.can_transition_to(to, mission.paused_from, mission.in_correction) {
            return Err(AppError::InvalidState(format!(
                "mission {} cannot move from {} to {}",
                mission.id, from, to
            )));
        }

        if to == MissionState::Paused {
            mission.paused_from = Some(from);
        } else if from == MissionState::Paused {
            mission.paused_from = None;
        }
        mission.state = to;
        mission.activity = activity;
        mission.updated_at = Utc::now();
        if to.is_terminal() {
            mission.completed_at = Some(mission.updated_at);
        }

        info!(
            mission_id = %mission.id,
            from = %from,
            to = %to,
            phase = %mission.phase,
            "Mission transition"
        );
        self.bus.publish(
            &mission.id,
            EventKind::Status,
            json!({
                "state": to,
                "previous_state": from,
                "phase": mission.phase,
                "activity": mission.activity,
            }),
        );
        Ok(())
    }

    /// Fail the mission and publish its single terminal `error` event. No-op
    /// when the mission is already terminal.
    pub(crate) async fn fail_locked(&self, mission: &mut Mission, reason: &str) {
        if mission.state.is_terminal() {
            return;
        }
        let findings_count = self.findings.len().await;
        mission.failure_reason = Some(reason.to_string());
        let activity = format!("Failed: {}", reason);
        if let Err(err) = self.transition_locked(mission, MissionState::Failed, activity) {
            warn!(mission_id = %mission.id, error = %err, "Could not record failure");
            return;
        }
        let status = MissionStatus::from_mission(mission, findings_count);
        self.bus.publish(
            &mission.id,
            EventKind::Error,
            json!({
                "scope": MISSION_SCOPE,
                "error": reason,
                "status": status,
            }),
        );
    }

    pub async fn update<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&mut Mission) -> T,
    {
        let mut mission = self.mission.write().await;
        let result = f(&mut mission);
        mission.updated_at = Utc::now();
        result
    }

    pub async fn status(&self) -> MissionStatus {
        let findings_count = self.findings.len().await;
        let mission = self.mission.read().await;
        MissionStatus::from_mission(&mission, findings_count)
    }

    pub async fn summary(&self) -> MissionSummary {
        let findings_count = self.findings.len().await;
        let mission = self.mission.read().await;
        MissionSummary {
            mission_id: mission.id.clone(),
            goal: mission.goal.clone(),
            state: mission.state,
            phase: mission.phase,
            findings_count,
            quality_average: mission.quality_average,
            created_at: mission.created_at,
        }
    }

    /// Publish the progress counters.
    pub async fn publish_progress(&self) {
        let status = self.status().await;
        self.bus.publish(
            &self.id,
            EventKind::Progress,
            serde_json::to_value(&status.progress).unwrap_or_default(),
        );
    }

    pub async fn snapshot(&self) -> MissionSnapshot {
        let mission = self.mission.read().await;
        self.snapshot_of(&mission).await
    }

    /// Snapshot of an already locked mission record.
    pub(crate) async fn snapshot_of(&self, mission: &Mission) -> MissionSnapshot {
        MissionSnapshot {
            mission: mission.clone(),
            findings: self.findings.list().await,
            events: self.bus.history(&mission.id, 0, usize::MAX),
            saved_at: Utc::now(),
        }
    }

    /// Persist a snapshot when forced or when the checkpoint interval has
    /// elapsed. Failures are logged; the next boundary tries again.
    pub async fn checkpoint(&self, store: &dyn MissionStore, force: bool) -> bool {
        let interval = {
            let mission = self.mission.read().await;
            std::time::Duration::from_secs(mission.criteria.checkpoint_interval_secs)
        };

        let last = *self.last_checkpoint.lock().await;
        let due = force || last.map(|at| at.elapsed() >= interval).unwrap_or(true);
        if !due {
            return false;
        }

        let snapshot = self.snapshot().await;
        self.save(store, &snapshot).await
    }

    pub(crate) async fn save(&self, store: &dyn MissionStore, snapshot: &MissionSnapshot) -> bool {
        let mut last = self.last_checkpoint.lock().await;
        match store.save(snapshot).await {
            Ok(()) => {
                *last = Some(Instant::now());
                true
            }
            Err(err) => {
                warn!(
                    mission_id = %self.id,
                    error = %err,
                    "Checkpoint failed, retrying at next boundary"
                );
                false
            }
        }
    }
}
