//! Deep-Dive Scheduler
//!
//! Runs planned queries for a batch of entities. Per entity the first query
//! is the lead query; only when it answers are the remaining queries submitted, all
//! at once, and merged in the order they complete. Entities are started in
//! order as slots free up, and every start is a point where a pause, a
//! cancel or a fatal provider error stops further submissions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{self, FuturesUnordered, StreamExt};
use serde_json::json;
use tracing::{debug, info, warn};

use super::query_planner::PlannedQuery;
use crate::events::{EventBus, EventKind};
use crate::findings::{AttributePatch, Contribution, FindingsAggregator};
use crate::llm::schema::{CompetitorsAnswer, FeaturesAnswer, ReviewsAnswer, UseCasesAnswer};
use crate::llm::ResearchModel;
use crate::mission::MissionControl;
use crate::models::{Candidate, Pricing, QueryKind};
use crate::types::ProviderError;
use crate::utils::normalize_name;

#[derive(Debug, Default)]
pub struct DeepDiveOutcome {
    /// Queries never submitted because the run was stopped
    pub pending: Vec<PlannedQuery>,
    /// Normalized names of entities that had at least one query answered
    pub researched: Vec<String>,
    pub failed_queries: usize,
    pub fatal: Option<ProviderError>,
}

impl DeepDiveOutcome {
    pub fn interrupted(&self) -> bool {
        !self.pending.is_empty()
    }
}

#[derive(Default)]
struct EntityOutcome {
    pending: Vec<PlannedQuery>,
    researched: Option<String>,
    failed_queries: usize,
    fatal: Option<ProviderError>,
}

pub struct DeepDiveScheduler {
    mission_id: String,
    model: ResearchModel,
    findings: Arc<FindingsAggregator>,
    control: Arc<MissionControl>,
    bus: Arc<EventBus>,
    entity_concurrency: usize,
}

impl DeepDiveScheduler {
    pub fn new(
        mission_id: impl Into<String>,
        model: ResearchModel,
        findings: Arc<FindingsAggregator>,
        control: Arc<MissionControl>,
        bus: Arc<EventBus>,
        entity_concurrency: usize,
    ) -> Self {
        Self {
            mission_id: mission_id.into(),
            model,
            findings,
            control,
            bus,
            entity_concurrency: entity_concurrency.max(1),
        }
    }

    /// Execute `queries`; `seeds` supply the discovery profile of entities
    /// that do not have a finding yet.
    pub async fn run(&self, queries: Vec<PlannedQuery>, seeds: &[Candidate]) -> DeepDiveOutcome {
        let groups = group_by_entity(queries);
        let seeds: HashMap<String, &Candidate> = seeds.iter().map(|c| (c.key(), c)).collect();
        let stop = AtomicBool::new(false);

        info!(mission_id = %self.mission_id, entities = groups.len(), "Deep dive started");

        let entity_outcomes: Vec<EntityOutcome> = stream::iter(groups)
            .map(|(entity, queries)| {
                let seed = seeds.get(&normalize_name(&entity)).copied();
                self.run_entity(entity, queries, seed, &stop)
            })
            .buffer_unordered(self.entity_concurrency)
            .collect()
            .await;

        let mut outcome = DeepDiveOutcome::default();
        for entity in entity_outcomes {
            outcome.pending.extend(entity.pending);
            outcome.researched.extend(entity.researched);
            outcome.failed_queries += entity.failed_queries;
            if outcome.fatal.is_none() {
                outcome.fatal = entity.fatal;
            }
        }

        info!(
            mission_id = %self.mission_id,
            researched = outcome.researched.len(),
            failed_queries = outcome.failed_queries,
            pending = outcome.pending.len(),
            "Deep dive finished"
        );
        outcome
    }

    fn halted(&self, stop: &AtomicBool) -> bool {
        stop.load(Ordering::SeqCst) || self.control.should_stop()
    }

    async fn run_entity(
        &self,
        entity: String,
        queries: Vec<PlannedQuery>,
        seed: Option<&Candidate>,
        stop: &AtomicBool,
    ) -> EntityOutcome {
        let mut outcome = EntityOutcome::default();
        if self.halted(stop) {
            outcome.pending = queries;
            return outcome;
        }

        let mut queries = queries.into_iter();
        let Some(lead) = queries.next() else {
            return outcome;
        };
        let known = self.findings.get(&entity).await.is_some();

        debug!(mission_id = %self.mission_id, entity = %entity, kind = %lead.kind, "Lead query");
        match self.execute(&lead).await {
            Ok(contribution) => {
                if let Some(seed) = seed {
                    self.findings.insert_candidate(seed).await;
                }
                self.findings.merge(&entity, contribution).await;
            }
            Err(err) if err.is_fatal() => {
                stop.store(true, Ordering::SeqCst);
                outcome.fatal = Some(err);
                return outcome;
            }
            Err(err) => {
                outcome.failed_queries += 1;
                self.publish_entity_error(&entity, lead.kind, &err);
                if !known {
                    // Nothing to build on: record the failure and skip the rest.
                    let reason = format!("{} lead query failed: {}", lead.kind, err);
                    let contribution =
                        Contribution::new(AttributePatch::Error(reason)).with_query(lead.prompt);
                    self.findings.merge(&entity, contribution).await;
                    return outcome;
                }
                self.findings
                    .merge(&entity, Contribution::new(AttributePatch::Missing(lead.kind)))
                    .await;
            }
        }
        outcome.researched = Some(normalize_name(&entity));

        let rest: Vec<PlannedQuery> = queries.collect();
        if !rest.is_empty() && self.halted(stop) {
            outcome.pending = rest;
            return outcome;
        }

        let mut in_flight: FuturesUnordered<_> = rest
            .into_iter()
            .map(|query| async move {
                let result = self.execute(&query).await;
                (query, result)
            })
            .collect();

        while let Some((query, result)) = in_flight.next().await {
            match result {
                Ok(contribution) => {
                    self.findings.merge(&entity, contribution).await;
                }
                Err(err) if err.is_fatal() => {
                    stop.store(true, Ordering::SeqCst);
                    outcome.fatal.get_or_insert(err);
                }
                Err(err) => {
                    outcome.failed_queries += 1;
                    self.publish_entity_error(&entity, query.kind, &err);
                    self.findings
                        .merge(&entity, Contribution::new(AttributePatch::Missing(query.kind)))
                        .await;
                }
            }
        }

        self.findings.mark_deepened(&entity).await;
        outcome
    }

    async fn execute(&self, query: &PlannedQuery) -> Result<Contribution, ProviderError> {
        let (patch, sources) = match query.kind {
            QueryKind::Pricing => {
                let answer = self.model.generate::<Pricing>(&query.prompt, true).await?;
                (AttributePatch::Pricing(answer.value), answer.sources)
            }
            QueryKind::Features => {
                let answer = self.model.generate::<FeaturesAnswer>(&query.prompt, true).await?;
                (
                    AttributePatch::Features {
                        features: answer.value.features,
                        description: answer.value.description,
                    },
                    answer.sources,
                )
            }
            QueryKind::Reviews => {
                let answer = self.model.generate::<ReviewsAnswer>(&query.prompt, true).await?;
                (
                    AttributePatch::Reviews {
                        pros: answer.value.pros,
                        cons: answer.value.cons,
                        summary: answer.value.summary,
                    },
                    answer.sources,
                )
            }
            QueryKind::Competitors => {
                let answer = self.model.generate::<CompetitorsAnswer>(&query.prompt, true).await?;
                (
                    AttributePatch::Competitors {
                        competitors: answer.value.competitors,
                        integrations: answer.value.integrations,
                        founded: answer.value.founded,
                        funding: answer.value.funding,
                    },
                    answer.sources,
                )
            }
            QueryKind::UseCases => {
                let answer = self.model.generate::<UseCasesAnswer>(&query.prompt, true).await?;
                (
                    AttributePatch::UseCases {
                        use_cases: answer.value.use_cases,
                        target_audience: answer.value.target_audience,
                        best_for: answer.value.best_for,
                    },
                    answer.sources,
                )
            }
        };

        Ok(Contribution::new(patch)
            .with_sources(sources)
            .with_query(query.prompt.clone()))
    }

    fn publish_entity_error(&self, entity: &str, kind: QueryKind, err: &ProviderError) {
        warn!(
            mission_id = %self.mission_id,
            entity,
            kind = %kind,
            error = %err,
            "Entity query failed"
        );
        self.bus.publish(
            &self.mission_id,
            EventKind::Error,
            json!({
                "scope": "entity",
                "entity": entity,
                "kind": kind,
                "error": err.to_string(),
            }),
        );
    }
}

/// Group queries by entity, keeping first-seen entity order and per-entity
/// query order.
fn group_by_entity(queries: Vec<PlannedQuery>) -> Vec<(String, Vec<PlannedQuery>)> {
    let mut groups: Vec<(String, Vec<PlannedQuery>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for query in queries {
        let key = normalize_name(&query.entity);
        match index.get(&key) {
            Some(&i) => groups[i].1.push(query),
            None => {
                index.insert(key, groups.len());
                groups.push((query.entity.clone(), vec![query]));
            }
        }
    }
    groups
}
