mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chronicle::events::EventKind;
use chronicle::mission::{MissionCriteria, MissionState};
use chronicle::models::{ExportStatus, Finding, QueryKind};
use common::{
    drain, engine, mission_config, wait_for_state, ScriptedAdapter, ENTITIES, GOAL,
    PLACEHOLDER_ENTITIES,
};
use tokio_test::assert_ok;

fn criteria() -> MissionCriteria {
    MissionCriteria::from_config(&mission_config())
}

fn by_name<'a>(findings: &'a [Finding], name: &str) -> &'a Finding {
    findings
        .iter()
        .find(|f| f.name == name)
        .unwrap_or_else(|| panic!("no finding for {}", name))
}

#[tokio::test]
async fn test_mission_corrects_placeholder_pricing_and_completes() {
    let adapter = Arc::new(ScriptedAdapter::default());
    let (engine, _dir) = engine(adapter.clone());

    let started = assert_ok!(engine.start(GOAL, criteria()).await);
    assert_eq!(started.state, MissionState::Planning);

    let events = drain(&engine, &started.mission_id).await;
    let status = engine.status(&started.mission_id).await.unwrap();
    assert_eq!(status.state, MissionState::Completed);
    assert_eq!(status.correction_iterations, 1);
    assert_eq!(status.progress.corrections_made, 3);
    assert_eq!(status.pending_queries, 0);
    assert!(adapter.saw_narrowed_pricing.load(Ordering::SeqCst));

    let findings = engine.findings(&started.mission_id).await.unwrap();
    assert_eq!(findings.len(), ENTITIES.len());
    assert!(findings.iter().filter(|f| f.quality_score >= 0.7).count() >= 5);
    for name in PLACEHOLDER_ENTITIES {
        let finding = by_name(&findings, name);
        assert!(finding.corrected, "{} should be corrected", name);
        assert_eq!(finding.quality_score, 1.0);
        let pricing = finding.attributes.pricing.as_ref().unwrap();
        assert_eq!(pricing.starting_price.as_deref(), Some("$29/user/month"));
    }
    assert!(!by_name(&findings, "Acme CRM").corrected);
    assert!(findings.iter().all(|f| f.verified));

    let report = status.report.as_ref().unwrap();
    assert_eq!(report.executive_summary, "Acme CRM leads for early-stage teams.");
    assert_eq!(status.exports.len(), 2);
    assert!(status.exports.iter().all(|e| e.status == ExportStatus::Success));

    // Gapless log ending in exactly one completion.
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.seq, i as u64 + 1);
    }
    let last = events.last().unwrap();
    assert_eq!(last.kind, EventKind::Complete);
    assert_eq!(last.data["findings_count"], 8);
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

    let states: Vec<&str> = events
        .iter()
        .filter(|e| e.kind == EventKind::Status)
        .filter_map(|e| e.data["state"].as_str())
        .collect();
    assert_eq!(states.first(), Some(&"planning"));
    assert!(states.contains(&"correcting"));
    assert_eq!(states.last(), Some(&"completed"));
}

#[tokio::test]
async fn test_rate_limited_pricing_query_is_retried() {
    let adapter = Arc::new(ScriptedAdapter {
        rate_limited: Some(("Bolt CRM", 2)),
        ..ScriptedAdapter::default()
    });
    let (engine, _dir) = engine(adapter.clone());

    let started = engine.start(GOAL, criteria()).await.unwrap();
    let events = drain(&engine, &started.mission_id).await;
    assert_eq!(events.last().unwrap().kind, EventKind::Complete);

    // Two 429s, then the answer.
    assert_eq!(adapter.calls_for("Bolt CRM", "What does"), 3);

    let findings = engine.findings(&started.mission_id).await.unwrap();
    let bolt = by_name(&findings, "Bolt CRM");
    assert!(bolt.missing.is_empty());
    assert!(bolt.error.is_none());
    assert_eq!(bolt.quality_score, 1.0);
    assert!(!events
        .iter()
        .any(|e| e.kind == EventKind::Error && e.data["entity"] == "Bolt CRM"));
}

#[tokio::test]
async fn test_auth_failure_during_discovery_fails_mission_once() {
    let adapter = Arc::new(ScriptedAdapter {
        auth_on_discovery: true,
        ..ScriptedAdapter::default()
    });
    let (engine, _dir) = engine(adapter);

    let started = engine.start(GOAL, criteria()).await.unwrap();
    let events = drain(&engine, &started.mission_id).await;
    let last = events.last().unwrap();
    assert_eq!(last.kind, EventKind::Error);
    assert_eq!(last.data["scope"], "mission");

    let status = wait_for_state(&engine, &started.mission_id, MissionState::Failed).await;
    assert!(status.failure_reason.unwrap().contains("API key not valid"));
    assert!(engine.findings(&started.mission_id).await.unwrap().is_empty());

    let history = engine.history(&started.mission_id, 1, 1000).await.unwrap();
    assert_eq!(history.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(!history.iter().any(|e| e.kind == EventKind::Complete));
}

#[tokio::test]
async fn test_pause_mid_deep_dive_then_resume() {
    let (adapter, gate) = ScriptedAdapter::gated();
    let adapter = Arc::new(adapter);
    let (engine, _dir) = engine(adapter.clone());

    let started = engine.start(GOAL, criteria()).await.unwrap();
    let id = started.mission_id.clone();

    common::wait_for(|| adapter.gated_waiters.load(Ordering::SeqCst) > 0).await;
    let pausing = engine.pause(&id).await.unwrap();
    assert_eq!(pausing.state, MissionState::Researching);

    gate.add_permits(1000);
    let paused = wait_for_state(&engine, &id, MissionState::Paused).await;
    assert_eq!(paused.paused_from, Some(MissionState::Researching));
    assert!(paused.pending_queries > 0);

    // In-flight answers were kept.
    let before = engine.findings(&id).await.unwrap();
    assert!(!before.is_empty());
    assert!(before.len() < ENTITIES.len());

    // Pausing again is a no-op.
    assert_eq!(engine.pause(&id).await.unwrap().state, MissionState::Paused);

    let resumed = engine.resume(&id).await.unwrap();
    assert_eq!(resumed.state, MissionState::Researching);

    let events = drain(&engine, &id).await;
    assert_eq!(events.last().unwrap().kind, EventKind::Complete);
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.seq, i as u64 + 1);
    }
    assert!(events
        .iter()
        .any(|e| e.kind == EventKind::Status && e.data["state"] == "paused"));

    let status = engine.status(&id).await.unwrap();
    assert_eq!(status.state, MissionState::Completed);
    assert_eq!(status.pending_queries, 0);
    let findings = engine.findings(&id).await.unwrap();
    assert_eq!(findings.len(), ENTITIES.len());
    // Each entity's pricing query ran exactly once across both runs.
    for name in ENTITIES {
        let pricing = adapter.calls_for(name, "What does");
        assert_eq!(pricing - adapter.calls_for(name, "contact sales"), 1);
    }
}

#[tokio::test]
async fn test_correction_loop_stops_at_iteration_cap() {
    let adapter = Arc::new(ScriptedAdapter {
        placeholder_forever: true,
        ..ScriptedAdapter::default()
    });
    let (engine, _dir) = engine(adapter.clone());

    let started = engine.start(GOAL, criteria()).await.unwrap();
    let events = drain(&engine, &started.mission_id).await;
    assert_eq!(events.last().unwrap().kind, EventKind::Complete);

    let status = engine.status(&started.mission_id).await.unwrap();
    assert_eq!(status.state, MissionState::Completed);
    assert_eq!(status.correction_iterations, mission_config().correction_max_iterations);

    // Three iterations over the same three findings count three corrections.
    assert_eq!(status.progress.corrections_made, 3);

    let findings = engine.findings(&started.mission_id).await.unwrap();
    for name in PLACEHOLDER_ENTITIES {
        let finding = by_name(&findings, name);
        assert!(finding.corrected);
        assert_eq!(finding.quality_score, 0.65);
        assert_eq!(adapter.calls_for(name, "contact sales"), 3);
    }
}

#[tokio::test]
async fn test_control_on_completed_mission_is_rejected() {
    let (engine, _dir) = engine(Arc::new(ScriptedAdapter::default()));
    let started = engine.start(GOAL, criteria()).await.unwrap();
    drain(&engine, &started.mission_id).await;
    wait_for_state(&engine, &started.mission_id, MissionState::Completed).await;

    assert!(engine.pause(&started.mission_id).await.is_err());
    assert!(engine.resume(&started.mission_id).await.is_err());
    assert!(engine.cancel(&started.mission_id).await.is_err());
}

fn calls_across_entities(adapter: &ScriptedAdapter, marker: &str) -> usize {
    ENTITIES.iter().map(|name| adapter.calls_for(name, marker)).sum()
}

#[tokio::test]
async fn test_plan_attributes_shape_deep_dive_queries() {
    let adapter = Arc::new(ScriptedAdapter {
        plan_attributes: Some(vec!["pricing", "key features"]),
        ..ScriptedAdapter::default()
    });
    let (engine, _dir) = engine(adapter.clone());

    let started = engine.start(GOAL, criteria()).await.unwrap();
    let events = drain(&engine, &started.mission_id).await;
    assert_eq!(events.last().unwrap().kind, EventKind::Complete);

    // Scored kinds always run; unrequested ones are skipped.
    assert_eq!(calls_across_entities(&adapter, "What does"), ENTITIES.len() + 3);
    assert_eq!(calls_across_entities(&adapter, "in reviews"), ENTITIES.len());
    assert_eq!(calls_across_entities(&adapter, "main competitors"), 0);
    assert_eq!(calls_across_entities(&adapter, "typical use cases"), 0);

    let plan_event = events
        .iter()
        .find(|e| e.kind == EventKind::Action && e.data["action"] == "plan")
        .unwrap();
    let kinds: Vec<QueryKind> =
        serde_json::from_value(plan_event.data["query_kinds"].clone()).unwrap();
    assert_eq!(kinds, QueryKind::SCORED.to_vec());

    let findings = engine.findings(&started.mission_id).await.unwrap();
    assert!(findings.iter().all(|f| f.attributes.best_for.is_none()));
}

#[tokio::test]
async fn test_extra_plan_attribute_adds_its_query() {
    let adapter = Arc::new(ScriptedAdapter {
        plan_attributes: Some(vec!["pricing", "features", "integrations"]),
        ..ScriptedAdapter::default()
    });
    let (engine, _dir) = engine(adapter.clone());

    let started = engine.start(GOAL, criteria()).await.unwrap();
    drain(&engine, &started.mission_id).await;

    assert_eq!(calls_across_entities(&adapter, "main competitors"), ENTITIES.len());
    assert_eq!(calls_across_entities(&adapter, "typical use cases"), 0);
}

#[tokio::test]
async fn test_suggested_target_applies_only_without_explicit_target() {
    let adapter = Arc::new(ScriptedAdapter {
        suggested_target: Some(3),
        ..ScriptedAdapter::default()
    });
    let (engine, _dir) = engine(adapter);

    let open = engine.start(GOAL, criteria()).await.unwrap();
    drain(&engine, &open.mission_id).await;
    let status = engine.status(&open.mission_id).await.unwrap();
    assert_eq!(status.progress.target_count, 3);
    // Discovery keeps twice the target.
    assert_eq!(engine.findings(&open.mission_id).await.unwrap().len(), 6);

    let mut fixed = criteria();
    fixed.target_fixed = true;
    let started = engine.start(GOAL, fixed).await.unwrap();
    drain(&engine, &started.mission_id).await;
    let status = engine.status(&started.mission_id).await.unwrap();
    assert_eq!(status.progress.target_count, 5);
    assert_eq!(engine.findings(&started.mission_id).await.unwrap().len(), ENTITIES.len());
}

#[tokio::test]
async fn test_pause_inside_correction_loop_keeps_iteration_budget() {
    let (adapter, gate) = ScriptedAdapter::gated_on("contact sales");
    let adapter = Arc::new(ScriptedAdapter {
        placeholder_forever: true,
        ..adapter
    });
    let (engine, _dir) = engine(adapter.clone());
    let cap = mission_config().correction_max_iterations;

    let started = engine.start(GOAL, criteria()).await.unwrap();
    let id = started.mission_id.clone();

    // All three narrowed pricing queries of the first iteration are in flight.
    common::wait_for(|| adapter.gated_waiters.load(Ordering::SeqCst) == 3).await;
    engine.pause(&id).await.unwrap();
    gate.add_permits(1000);

    let paused = wait_for_state(&engine, &id, MissionState::Paused).await;
    assert_eq!(paused.paused_from, Some(MissionState::Correcting));
    assert_eq!(paused.correction_iterations, 1);
    assert_eq!(paused.progress.corrections_made, 3);

    let resumed = engine.resume(&id).await.unwrap();
    assert_eq!(resumed.state, MissionState::Correcting);

    let events = drain(&engine, &id).await;
    assert_eq!(events.last().unwrap().kind, EventKind::Complete);

    let status = engine.status(&id).await.unwrap();
    assert_eq!(status.state, MissionState::Completed);
    assert_eq!(status.correction_iterations, cap);
    assert_eq!(status.progress.corrections_made, 3);

    let iterations: Vec<u64> = events
        .iter()
        .filter(|e| e.kind == EventKind::Action && e.data["action"] == "self_correct")
        .filter_map(|e| e.data["iteration"].as_u64())
        .collect();
    assert_eq!(iterations, (1..=cap as u64).collect::<Vec<_>>());
    for name in PLACEHOLDER_ENTITIES {
        assert_eq!(adapter.calls_for(name, "contact sales"), cap as usize);
    }
}
