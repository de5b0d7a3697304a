//! Discovery Agent
//!
//! Broad grounded searches that surface candidate entities. Plan queries run
//! first, then fixed angles fill the remaining budget. Candidates are deduped
//! by normalized name and capped at twice the target count.

use std::collections::HashSet;

use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::llm::schema::{CandidateList, ResearchPlan};
use crate::llm::ResearchModel;
use crate::models::Candidate;
use crate::types::ProviderError;

const ANGLES: [&str; 4] = [
    "Most popular and widely used options for: {goal}",
    "Best alternatives and direct competitors in the space of: {goal}",
    "Emerging or lesser-known but well reviewed options for: {goal}",
    "Options recommended by analysts and review sites such as G2 or Capterra for: {goal}",
];

pub struct DiscoveryAgent;

impl DiscoveryAgent {
    /// Plan queries then fixed angles, deduped, at most `max_queries`.
    pub fn discovery_queries(goal: &str, plan: &ResearchPlan, max_queries: usize) -> Vec<String> {
        let mut seen = HashSet::new();
        plan.discovery_queries
            .iter()
            .map(|q| q.trim().to_string())
            .chain(ANGLES.iter().map(|angle| angle.replace("{goal}", goal)))
            .filter(|q| !q.is_empty() && seen.insert(q.to_lowercase()))
            .take(max_queries.max(1))
            .collect()
    }

    pub async fn discover(
        model: &ResearchModel,
        goal: &str,
        plan: &ResearchPlan,
        max_queries: usize,
        target_count: usize,
    ) -> Result<Vec<Candidate>, ProviderError> {
        let queries = Self::discovery_queries(goal, plan, max_queries);
        info!(queries = queries.len(), "Starting discovery");

        let concurrency = queries.len().max(1);
        let results: Vec<(String, Result<CandidateList, ProviderError>)> = stream::iter(queries)
            .map(|query| async move {
                let prompt = Self::create_discovery_prompt(goal, &query);
                let result = model
                    .generate::<CandidateList>(&prompt, true)
                    .await
                    .map(|answer| answer.value);
                (query, result)
            })
            .buffered(concurrency)
            .collect()
            .await;

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for (query, result) in results {
            match result {
                Ok(list) => {
                    for mut candidate in list.candidates {
                        let key = candidate.key();
                        if key.is_empty() || !seen.insert(key) {
                            continue;
                        }
                        candidate.name = candidate.name.trim().to_string();
                        candidate.confidence = candidate.confidence.clamp(0.0, 1.0);
                        candidate.discovered_via = query.clone();
                        candidates.push(candidate);
                    }
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => warn!(query = %query, error = %err, "Discovery query failed"),
            }
        }

        // Stable sort keeps discovery order among equal confidence.
        candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        candidates.truncate(target_count.saturating_mul(2).max(1));

        info!(candidates = candidates.len(), "Discovery finished");
        Ok(candidates)
    }

    fn create_discovery_prompt(goal: &str, query: &str) -> String {
        format!(
            r#"RESEARCH GOAL:
{goal}

SEARCH:
{query}

List every distinct product, company or tool this search surfaces that fits the goal.
For each give its name, a one-sentence rationale, your confidence (0 to 1) that it fits, a category and its website."#
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queries_dedupe_and_cap() {
        let plan = ResearchPlan {
            discovery_queries: vec!["top CRMs".into(), "Top CRMs ".into(), "".into()],
            ..ResearchPlan::default()
        };
        let queries = DiscoveryAgent::discovery_queries("CRM for startups", &plan, 3);
        assert_eq!(queries.len(), 3);
        assert_eq!(queries[0], "top CRMs");
        assert!(queries[1].starts_with("Most popular"));
        assert!(queries[1].ends_with("CRM for startups"));
    }

    #[test]
    fn test_zero_budget_still_runs_one_query() {
        let queries = DiscoveryAgent::discovery_queries("CRM", &ResearchPlan::default(), 0);
        assert_eq!(queries.len(), 1);
    }
}
