use std::collections::HashMap;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio::sync::{RwLock, Semaphore};
use tracing::{info, warn};
use validator::Validate;

use super::runner::{run_exports, MissionRunner, CANCELLED_REASON};
use super::{Mission, MissionCriteria, MissionHandle, MissionState, MissionStatus, MissionSummary};
use crate::config::{LLMConfig, MissionConfig};
use crate::events::{EventBus, EventSubscription, MissionEvent};
use crate::export::Exporter;
use crate::llm::{LLMAdapter, ResearchModel};
use crate::models::{CreateMissionRequest, ExportFormat, ExportRecord, Finding};
use crate::storage::MissionStore;
use crate::types::{AppError, AppResult};
use crate::utils::{normalize_name, RetryPolicy};

struct EngineInner {
    registry: RwLock<HashMap<String, Arc<MissionHandle>>>,
    adapter: Arc<dyn LLMAdapter>,
    store: Arc<dyn MissionStore>,
    exporter: Arc<dyn Exporter>,
    bus: Arc<EventBus>,
    config: MissionConfig,
    model: String,
    retry: RetryPolicy,
    call_timeout: Duration,
    global_permits: Option<Arc<Semaphore>>,
    pacer: Option<Arc<DefaultDirectRateLimiter>>,
}

/// Owns the mission registry and spawns one runner task per active mission.
/// Cheap to clone; shared through axum state.
#[derive(Clone)]
pub struct MissionEngine {
    inner: Arc<EngineInner>,
}

impl MissionEngine {
    pub fn new(
        config: MissionConfig,
        llm: &LLMConfig,
        adapter: Arc<dyn LLMAdapter>,
        store: Arc<dyn MissionStore>,
        exporter: Arc<dyn Exporter>,
    ) -> Self {
        let pacer = llm
            .requests_per_second
            .and_then(NonZeroU32::new)
            .map(|rps| Arc::new(RateLimiter::direct(Quota::per_second(rps))));
        let global_permits = config
            .global_max_in_flight
            .map(|permits| Arc::new(Semaphore::new(permits.max(1))));

        Self {
            inner: Arc::new(EngineInner {
                registry: RwLock::new(HashMap::new()),
                adapter,
                store,
                exporter,
                bus: Arc::new(EventBus::new(config.heartbeat_interval())),
                model: llm.default_model.clone(),
                retry: RetryPolicy::new(
                    llm.max_retries,
                    Duration::from_millis(llm.retry_base_delay_ms),
                ),
                call_timeout: Duration::from_secs(llm.request_timeout_secs.max(1)),
                config,
                global_permits,
                pacer,
            }),
        }
    }

    pub fn config(&self) -> &MissionConfig {
        &self.inner.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.inner.bus
    }

    /// Register a mission, move it to `planning` and spawn its runner.
    pub async fn start(&self, goal: &str, criteria: MissionCriteria) -> AppResult<MissionStatus> {
        let goal = goal.trim();
        if goal.is_empty() {
            return Err(AppError::Validation("goal must not be empty".to_string()));
        }
        criteria.check()?;

        let mission = Mission::new(goal, criteria);
        let handle = Arc::new(MissionHandle::new(mission, self.inner.bus.clone()));
        self.inner
            .registry
            .write()
            .await
            .insert(handle.id.clone(), handle.clone());

        {
            let mut mission = handle.mission.write().await;
            handle.transition_locked(
                &mut mission,
                MissionState::Planning,
                "Mission started".to_string(),
            )?;
            handle.set_running(true);
        }
        info!(mission_id = %handle.id, goal, "Mission started");

        self.spawn_runner(handle.clone());
        Ok(handle.status().await)
    }

    pub async fn start_request(&self, request: &CreateMissionRequest) -> AppResult<MissionStatus> {
        request.validate()?;
        let criteria = MissionCriteria::from_request(request, &self.inner.config)?;
        self.start(&request.goal, criteria).await
    }

    fn spawn_runner(&self, handle: Arc<MissionHandle>) {
        let inner = &self.inner;
        let model = ResearchModel::new(
            inner.adapter.clone(),
            inner.model.clone(),
            inner.config.max_in_flight_per_mission,
        )
        .with_global_permits(inner.global_permits.clone())
        .with_pacer(inner.pacer.clone())
        .with_retry(inner.retry.clone())
        .with_timeout(inner.call_timeout);

        let runner = MissionRunner::new(
            handle,
            model,
            inner.store.clone(),
            inner.exporter.clone(),
            inner.config.clone(),
        );
        tokio::spawn(runner.run());
    }

    /// Registered handle, restoring it from the store when it is not in
    /// memory.
    async fn handle(&self, mission_id: &str) -> AppResult<Arc<MissionHandle>> {
        if let Some(handle) = self.inner.registry.read().await.get(mission_id) {
            return Ok(handle.clone());
        }

        let snapshot = self
            .inner
            .store
            .load(mission_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Mission {} not found", mission_id)))?;

        let mut registry = self.inner.registry.write().await;
        if let Some(handle) = registry.get(mission_id) {
            return Ok(handle.clone());
        }
        let state = snapshot.mission.state;
        let handle = Arc::new(MissionHandle::restore(snapshot, self.inner.bus.clone()).await);
        info!(mission_id, state = %state, "Mission restored from store");
        registry.insert(mission_id.to_string(), handle.clone());
        Ok(handle)
    }

    /// Ask the runner to pause at its next check point. Pausing a paused
    /// mission is a no-op.
    pub async fn pause(&self, mission_id: &str) -> AppResult<MissionStatus> {
        let handle = self.handle(mission_id).await?;
        let paused_directly = {
            let mut mission = handle.mission.write().await;
            match mission.state {
                MissionState::Paused => false,
                state if state.is_terminal() => {
                    return Err(AppError::InvalidState(format!(
                        "mission {} is {} and cannot be paused",
                        mission_id, state
                    )));
                }
                _ if handle.is_running() => {
                    handle.control.request_pause();
                    info!(mission_id, "Pause requested");
                    false
                }
                _ => {
                    let activity = format!("Paused during {}", mission.phase);
                    handle.transition_locked(&mut mission, MissionState::Paused, activity)?;
                    true
                }
            }
        };
        if paused_directly {
            handle.checkpoint(self.inner.store.as_ref(), true).await;
        }
        Ok(handle.status().await)
    }

    /// Continue a paused mission from the phase it paused in.
    pub async fn resume(&self, mission_id: &str) -> AppResult<MissionStatus> {
        let handle = self.handle(mission_id).await?;
        {
            let mut mission = handle.mission.write().await;
            if mission.state != MissionState::Paused || handle.is_running() {
                return Err(AppError::InvalidState(format!(
                    "mission {} is {}, only paused missions can resume",
                    mission_id, mission.state
                )));
            }
            let to = mission.paused_from.ok_or_else(|| {
                AppError::Internal(format!("mission {} has no paused-from state", mission_id))
            })?;
            handle.control.clear_pause();
            let activity = format!("Resumed {}", mission.phase);
            handle.transition_locked(&mut mission, to, activity)?;
            handle.set_running(true);
        }
        info!(mission_id, "Mission resumed");

        self.spawn_runner(handle.clone());
        Ok(handle.status().await)
    }

    /// Fail the mission with "cancelled by user". A running mission honors
    /// the request at its next check point.
    pub async fn cancel(&self, mission_id: &str) -> AppResult<MissionStatus> {
        let handle = self.handle(mission_id).await?;
        let cancelled_directly = {
            let mut mission = handle.mission.write().await;
            if mission.state.is_terminal() {
                return Err(AppError::InvalidState(format!(
                    "mission {} already {}",
                    mission_id, mission.state
                )));
            }
            if handle.is_running() {
                handle.control.request_cancel();
                info!(mission_id, "Cancel requested");
                false
            } else {
                handle.fail_locked(&mut mission, CANCELLED_REASON).await;
                true
            }
        };
        if cancelled_directly {
            handle.checkpoint(self.inner.store.as_ref(), true).await;
        }
        Ok(handle.status().await)
    }

    pub async fn status(&self, mission_id: &str) -> AppResult<MissionStatus> {
        Ok(self.handle(mission_id).await?.status().await)
    }

    /// Registered missions, newest first.
    pub async fn list(&self) -> Vec<MissionSummary> {
        let handles: Vec<Arc<MissionHandle>> =
            self.inner.registry.read().await.values().cloned().collect();
        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            summaries.push(handle.summary().await);
        }
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries
    }

    pub async fn mission_count(&self) -> usize {
        self.inner.registry.read().await.len()
    }

    pub async fn findings(&self, mission_id: &str) -> AppResult<Vec<Finding>> {
        Ok(self.handle(mission_id).await?.findings.list().await)
    }

    /// One finding, by id or by normalized name.
    pub async fn finding(&self, mission_id: &str, finding_id: &str) -> AppResult<Finding> {
        let findings = self.findings(mission_id).await?;
        let key = normalize_name(finding_id);
        findings
            .into_iter()
            .find(|f| f.id == finding_id || f.key == key)
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "Finding {} not found in mission {}",
                    finding_id, mission_id
                ))
            })
    }

    /// Export the current findings. `None` uses the mission's configured
    /// formats.
    pub async fn export(
        &self,
        mission_id: &str,
        formats: Option<Vec<ExportFormat>>,
    ) -> AppResult<Vec<ExportRecord>> {
        let handle = self.handle(mission_id).await?;
        let formats = match formats {
            Some(formats) => formats,
            None => handle.mission.read().await.criteria.export_formats.clone(),
        };
        if formats.is_empty() {
            return Err(AppError::Validation("no export formats requested".to_string()));
        }

        let records = run_exports(&handle, self.inner.exporter.as_ref(), &formats).await;
        handle.update(|m| m.exports.extend(records.clone())).await;
        handle.checkpoint(self.inner.store.as_ref(), true).await;
        Ok(records)
    }

    pub async fn exports(&self, mission_id: &str) -> AppResult<Vec<ExportRecord>> {
        let handle = self.handle(mission_id).await?;
        let exports = handle.mission.read().await.exports.clone();
        Ok(exports)
    }

    /// The successful export of this mission written as `filename`. Only
    /// recorded files resolve, so arbitrary paths never do.
    pub async fn export_file(
        &self,
        mission_id: &str,
        filename: &str,
    ) -> AppResult<(ExportRecord, PathBuf)> {
        let exports = self.exports(mission_id).await?;
        exports
            .into_iter()
            .find(|record| record.file_name() == Some(filename))
            .and_then(|record| {
                let path = PathBuf::from(record.file.as_deref()?);
                Some((record, path))
            })
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "Export file {} not found for mission {}",
                    filename, mission_id
                ))
            })
    }

    /// Start a fresh mission with the goal and criteria of a failed one.
    pub async fn retry(&self, mission_id: &str) -> AppResult<MissionStatus> {
        let handle = self.handle(mission_id).await?;
        let (goal, criteria) = {
            let mission = handle.mission.read().await;
            if mission.state != MissionState::Failed {
                return Err(AppError::InvalidState(format!(
                    "mission {} is {}, only failed missions can be retried",
                    mission_id, mission.state
                )));
            }
            (mission.goal.clone(), mission.criteria.clone())
        };

        let status = self.start(&goal, criteria).await?;
        info!(mission_id, retry_id = %status.mission_id, "Mission retried");
        Ok(status)
    }

    /// Replay from `from_seq` (inclusive), then tail live events.
    pub async fn subscribe(&self, mission_id: &str, from_seq: u64) -> AppResult<EventSubscription> {
        self.handle(mission_id).await?;
        Ok(self.inner.bus.subscribe(mission_id, from_seq))
    }

    pub async fn history(
        &self,
        mission_id: &str,
        from_seq: u64,
        limit: usize,
    ) -> AppResult<Vec<MissionEvent>> {
        self.handle(mission_id).await?;
        Ok(self.inner.bus.history(mission_id, from_seq, limit))
    }

    /// Drop a terminal or paused mission from memory after a final snapshot.
    pub async fn teardown(&self, mission_id: &str) -> AppResult<()> {
        let handle = self.handle(mission_id).await?;
        {
            let mission = handle.mission.read().await;
            let settled = mission.state.is_terminal() || mission.state == MissionState::Paused;
            if !settled || handle.is_running() {
                return Err(AppError::InvalidState(format!(
                    "mission {} is {} and still active",
                    mission_id, mission.state
                )));
            }
        }
        if !handle.checkpoint(self.inner.store.as_ref(), true).await {
            warn!(mission_id, "Final snapshot failed, tearing down anyway");
        }
        self.inner.registry.write().await.remove(mission_id);
        self.inner.bus.remove(mission_id);
        info!(mission_id, "Mission torn down");
        Ok(())
    }

    /// Tear down terminal missions that finished longer than `retention` ago.
    pub async fn sweep_expired(&self, retention: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention))
        else {
            return 0;
        };
        let handles: Vec<Arc<MissionHandle>> =
            self.inner.registry.read().await.values().cloned().collect();

        let mut expired = Vec::new();
        for handle in handles {
            let mission = handle.mission.read().await;
            let aged_out = mission.completed_at.map(|at| at < cutoff).unwrap_or(false);
            if mission.state.is_terminal() && aged_out {
                expired.push(handle.id.clone());
            }
        }

        let mut removed = 0;
        for id in expired {
            match self.teardown(&id).await {
                Ok(()) => removed += 1,
                Err(err) => warn!(mission_id = %id, error = %err, "Sweep skipped mission"),
            }
        }
        if removed > 0 {
            info!(removed, "Expired missions swept");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::export::FileExporter;
    use crate::storage::MemoryMissionStore;
    use crate::types::{LLMRequest, LLMResponse, ProviderError};
    use async_trait::async_trait;

    struct RejectingAdapter;

    #[async_trait]
    impl LLMAdapter for RejectingAdapter {
        async fn create_chat_completion(
            &self,
            _request: &LLMRequest,
        ) -> Result<LLMResponse, ProviderError> {
            Err(ProviderError::Auth("API key not valid".into()))
        }
    }

    fn engine(dir: &std::path::Path) -> MissionEngine {
        let llm = LLMConfig {
            retry_base_delay_ms: 1,
            ..LLMConfig::default()
        };
        MissionEngine::new(
            MissionConfig::default(),
            &llm,
            Arc::new(RejectingAdapter),
            Arc::new(MemoryMissionStore::new()),
            Arc::new(FileExporter::new(dir)),
        )
    }

    fn criteria() -> MissionCriteria {
        MissionCriteria::from_config(&MissionConfig::default())
    }

    async fn run_to_end(engine: &MissionEngine, id: &str) -> Vec<MissionEvent> {
        let mut subscription = engine.subscribe(id, 1).await.unwrap();
        let mut events = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = subscription.next().await {
                events.push(event);
            }
        })
        .await
        .unwrap();
        events
    }

    #[tokio::test]
    async fn test_start_validates_input() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());

        let err = engine.start("   ", criteria()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let mut bad = criteria();
        bad.quality_threshold = f64::NAN;
        assert!(matches!(engine.start("CRMs", bad).await, Err(AppError::Validation(_))));

        let mut bad = criteria();
        bad.target_count = 0;
        assert!(matches!(engine.start("CRMs", bad).await, Err(AppError::Validation(_))));
        assert_eq!(engine.mission_count().await, 0);
    }

    #[tokio::test]
    async fn test_auth_failure_fails_mission_once() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let status = engine.start("CRM tools for startups", criteria()).await.unwrap();
        assert_eq!(status.state, MissionState::Planning);

        let events = run_to_end(&engine, &status.mission_id).await;
        let errors: Vec<&MissionEvent> =
            events.iter().filter(|e| e.kind == EventKind::Error).collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].is_terminal());
        assert!(errors[0].data["error"].as_str().unwrap().contains("API key not valid"));

        let status = engine.status(&status.mission_id).await.unwrap();
        assert_eq!(status.state, MissionState::Failed);
        assert_eq!(status.progress.findings_count, 0);
    }

    #[tokio::test]
    async fn test_control_on_terminal_mission_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let id = engine.start("CRM tools", criteria()).await.unwrap().mission_id;
        run_to_end(&engine, &id).await;

        assert!(matches!(engine.pause(&id).await, Err(AppError::InvalidState(_))));
        assert!(matches!(engine.resume(&id).await, Err(AppError::InvalidState(_))));
        assert!(matches!(engine.cancel(&id).await, Err(AppError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_unknown_mission_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        assert!(matches!(engine.status("chr_00000000").await, Err(AppError::NotFound(_))));
        assert!(matches!(engine.pause("chr_00000000").await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_teardown_then_restore_from_store() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let id = engine.start("CRM tools", criteria()).await.unwrap().mission_id;
        let events = run_to_end(&engine, &id).await;

        engine.teardown(&id).await.unwrap();
        assert_eq!(engine.mission_count().await, 0);

        let status = engine.status(&id).await.unwrap();
        assert_eq!(status.state, MissionState::Failed);
        let history = engine.history(&id, 1, usize::MAX).await.unwrap();
        assert_eq!(history.len(), events.len());
    }

    #[tokio::test]
    async fn test_sweep_keeps_recent_missions() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let id = engine.start("CRM tools", criteria()).await.unwrap().mission_id;
        run_to_end(&engine, &id).await;

        assert_eq!(engine.sweep_expired(Duration::from_secs(3600)).await, 0);
        assert_eq!(engine.sweep_expired(Duration::ZERO).await, 1);
        assert!(engine.list().await.is_empty());
    }
}
