#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chronicle::config::{
    Config, LLMConfig, LoggingConfig, MissionConfig, ServerConfig, StorageConfig,
};
use chronicle::events::{EventKind, MissionEvent};
use chronicle::export::FileExporter;
use chronicle::llm::LLMAdapter;
use chronicle::mission::{MissionEngine, MissionState, MissionStatus};
use chronicle::storage::MemoryMissionStore;
use chronicle::types::{LLMRequest, LLMResponse, ProviderError};
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::Semaphore;

pub const GOAL: &str = "Find the best CRM tools for early-stage startups";

pub const ENTITIES: [&str; 8] = [
    "Acme CRM",
    "Bolt CRM",
    "Cedar CRM",
    "Delta CRM",
    "Ember CRM",
    "Fjord CRM",
    "Grove CRM",
    "Harbor CRM",
];

/// Entities whose first pricing answer is a "contact sales" placeholder.
pub const PLACEHOLDER_ENTITIES: [&str; 3] = ["Cedar CRM", "Ember CRM", "Grove CRM"];

/// Fake model keyed on prompt content.
#[derive(Default)]
pub struct ScriptedAdapter {
    /// `required_attributes` of the plan; all five by default.
    pub plan_attributes: Option<Vec<&'static str>>,
    /// `suggested_target` of the plan; 5 by default.
    pub suggested_target: Option<usize>,
    /// Narrowed pricing queries still get the placeholder.
    pub placeholder_forever: bool,
    /// Fail discovery searches with an authentication error.
    pub auth_on_discovery: bool,
    /// Rate-limit the first N pricing calls for this entity.
    pub rate_limited: Option<(&'static str, usize)>,
    /// Deep-dive calls wait here until permits are added.
    pub gate: Option<Arc<Semaphore>>,
    /// Only gate prompts containing this text.
    pub gate_marker: Option<&'static str>,
    pub gated_waiters: AtomicUsize,
    pub calls: AtomicUsize,
    pub saw_narrowed_pricing: AtomicBool,
    pub per_prompt: Mutex<HashMap<String, usize>>,
}

impl ScriptedAdapter {
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        (
            Self {
                gate: Some(gate.clone()),
                ..Self::default()
            },
            gate,
        )
    }

    /// Gate only the deep-dive prompts containing `marker`.
    pub fn gated_on(marker: &'static str) -> (Self, Arc<Semaphore>) {
        let (mut adapter, gate) = Self::gated();
        adapter.gate_marker = Some(marker);
        (adapter, gate)
    }

    /// Calls whose prompt mentions both `entity` and `marker`.
    pub fn calls_for(&self, entity: &str, marker: &str) -> usize {
        let needle = format!("ENTITY: {}", entity);
        self.per_prompt
            .lock()
            .unwrap()
            .iter()
            .filter(|(prompt, _)| prompt.contains(&needle) && prompt.contains(marker))
            .map(|(_, n)| *n)
            .sum()
    }

    fn record(&self, prompt: &str) -> usize {
        let mut per_prompt = self.per_prompt.lock().unwrap();
        let count = per_prompt.entry(prompt.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    fn entity_of(prompt: &str) -> Option<&'static str> {
        ENTITIES
            .into_iter()
            .find(|e| prompt.contains(&format!("ENTITY: {}\n", e)))
    }

    fn deep_dive_answer(&self, entity: &str, prompt: &str) -> serde_json::Value {
        if prompt.contains("What does") {
            let narrowed = prompt.contains("contact sales");
            if narrowed {
                self.saw_narrowed_pricing.store(true, Ordering::SeqCst);
            }
            if PLACEHOLDER_ENTITIES.contains(&entity) && (!narrowed || self.placeholder_forever) {
                json!({ "starting_price": "Contact sales", "tiers": [], "free_trial": false })
            } else {
                json!({
                    "starting_price": "$29/user/month",
                    "tiers": [{ "name": "Team", "price": "$29/user/month" }],
                    "free_trial": true
                })
            }
        } else if prompt.contains("concrete, product-specific features") {
            json!({
                "features": ["Pipeline boards", "Email sequences", "Deal forecasting"],
                "description": format!("{} is a sales CRM.", entity)
            })
        } else if prompt.contains("in reviews") {
            json!({ "pros": ["Quick setup"], "cons": ["Limited reporting"], "summary": "Solid" })
        } else if prompt.contains("main competitors") {
            json!({ "competitors": ["HubSpot"], "integrations": ["Slack", "Gmail"] })
        } else {
            json!({
                "use_cases": ["Outbound sales"],
                "target_audience": "Seed-stage teams",
                "best_for": "founder-led sales"
            })
        }
    }

    fn respond(
        content: serde_json::Value,
        sources: Vec<String>,
    ) -> Result<LLMResponse, ProviderError> {
        Ok(LLMResponse {
            content: content.to_string(),
            sources,
            ..LLMResponse::default()
        })
    }
}

#[async_trait]
impl LLMAdapter for ScriptedAdapter {
    async fn create_chat_completion(
        &self,
        request: &LLMRequest,
    ) -> Result<LLMResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt = request.messages[0].content.clone();
        let attempt = self.record(&prompt);

        if prompt.contains("planning a market research mission") {
            let attributes = self.plan_attributes.clone().unwrap_or_else(|| {
                vec!["pricing", "features", "reviews", "competitors", "use cases"]
            });
            return Self::respond(
                json!({
                    "strategy": "Search broadly, then compare pricing and depth.",
                    "discovery_queries": ["best CRM for startups", "startup sales CRM pricing"],
                    "required_attributes": attributes,
                    "suggested_target": self.suggested_target.unwrap_or(5)
                }),
                vec![],
            );
        }
        if prompt.contains("SEARCH:") {
            if self.auth_on_discovery {
                return Err(ProviderError::Auth("API key not valid".into()));
            }
            let candidates: Vec<serde_json::Value> = ENTITIES
                .iter()
                .enumerate()
                .map(|(i, name)| {
                    let slug = name.split(' ').next().unwrap_or("x").to_lowercase();
                    json!({
                        "name": name,
                        "rationale": "Popular with startups",
                        "confidence": 0.9 - i as f64 * 0.05,
                        "category": "CRM",
                        "website": format!("https://{}.example.com", slug)
                    })
                })
                .collect();
            return Self::respond(
                json!({ "candidates": candidates }),
                vec!["https://www.g2.com/categories/crm".into()],
            );
        }
        if prompt.contains("COMPARE:") {
            return Self::respond(
                json!({
                    "first_vs_second": "Cheaper for small teams.",
                    "second_vs_first": "Deeper reporting."
                }),
                vec![],
            );
        }
        if prompt.contains("VERIFY CLAIMS ABOUT:") {
            return Self::respond(
                json!({ "confirmed": true }),
                vec!["https://www.capterra.com/crm".into()],
            );
        }
        if prompt.contains("SYNTHESIZE RESEARCH") {
            return Self::respond(
                json!({
                    "executive_summary": "Acme CRM leads for early-stage teams.",
                    "key_insights": ["Per-seat pricing dominates"],
                    "top_recommendations": ["Acme CRM for founder-led sales"],
                    "next_steps": ["Trial the top three"]
                }),
                vec![],
            );
        }

        let Some(entity) = Self::entity_of(&prompt) else {
            return Err(ProviderError::InvalidRequest("unexpected prompt".into()));
        };

        let gated = self.gate_marker.map(|m| prompt.contains(m)).unwrap_or(true);
        if let (Some(gate), true) = (&self.gate, gated) {
            self.gated_waiters.fetch_add(1, Ordering::SeqCst);
            let _permit = gate
                .acquire()
                .await
                .map_err(|_| ProviderError::Unavailable("gate closed".into()))?;
        }

        if let Some((limited, failures)) = self.rate_limited {
            if entity == limited && prompt.contains("What does") && attempt <= failures {
                return Err(ProviderError::RateLimited("429 Too Many Requests".into()));
            }
        }

        let slug = entity.split(' ').next().unwrap_or("x").to_lowercase();
        Self::respond(
            self.deep_dive_answer(entity, &prompt),
            vec![
                format!("https://www.{}.example.com/pricing", slug),
                "https://www.g2.com/products/crm/reviews".into(),
            ],
        )
    }
}

pub fn llm_config() -> LLMConfig {
    LLMConfig {
        max_retries: 3,
        retry_base_delay_ms: 1,
        request_timeout_secs: 5,
        ..LLMConfig::default()
    }
}

pub fn mission_config() -> MissionConfig {
    MissionConfig {
        default_target_count: 5,
        default_quality_threshold: 0.7,
        heartbeat_interval_secs: 1,
        ..MissionConfig::default()
    }
}

/// Engine over an in-memory store, exporting into a temp dir.
pub fn engine(adapter: Arc<ScriptedAdapter>) -> (MissionEngine, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let engine = MissionEngine::new(
        mission_config(),
        &llm_config(),
        adapter,
        Arc::new(MemoryMissionStore::new()),
        Arc::new(FileExporter::new(dir.path())),
    );
    (engine, dir)
}

pub fn app_config(dir: &TempDir) -> Config {
    Config {
        server: ServerConfig {
            port: 0,
            host: "127.0.0.1".to_string(),
            cors_allowed_origins: vec!["http://localhost:3000".to_string()],
        },
        llm: llm_config(),
        mission: mission_config(),
        storage: StorageConfig {
            data_dir: dir.path().join("missions"),
            export_dir: dir.path().join("exports"),
        },
        logging: LoggingConfig {
            log_dir: None,
            default_filter: "chronicle=debug".to_string(),
        },
    }
}

/// Drain the mission's stream until the terminal event.
pub async fn drain(engine: &MissionEngine, mission_id: &str) -> Vec<MissionEvent> {
    let mut subscription = engine.subscribe(mission_id, 1).await.unwrap();
    let mut events = Vec::new();
    let collect = async {
        while let Some(event) = subscription.next().await {
            if event.kind == EventKind::Heartbeat {
                continue;
            }
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(20), collect)
        .await
        .expect("mission did not finish in time");
    events
}

/// Poll the mission status until it reaches `state`.
pub async fn wait_for_state(
    engine: &MissionEngine,
    mission_id: &str,
    state: MissionState,
) -> MissionStatus {
    for _ in 0..2000 {
        let status = engine.status(mission_id).await.unwrap();
        if status.state == state {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("mission never reached {}", state.as_str());
}

/// Poll until `condition` holds.
pub async fn wait_for<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..2000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
