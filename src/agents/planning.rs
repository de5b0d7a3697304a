//! Planning Agent
//!
//! One structuring call that turns the goal into a research plan: strategy,
//! discovery queries, the attributes that matter and a suggested target
//! count. Unparseable output falls back to a plan derived from the goal.

use tracing::{info, warn};

use crate::llm::schema::ResearchPlan;
use crate::llm::ResearchModel;
use crate::types::ProviderError;

const DEFAULT_ATTRIBUTES: [&str; 5] =
    ["pricing", "features", "reviews", "competitors", "use_cases"];

pub struct PlanningAgent;

impl PlanningAgent {
    pub async fn generate_plan(
        model: &ResearchModel,
        goal: &str,
        target_count: usize,
    ) -> Result<ResearchPlan, ProviderError> {
        info!(goal_len = goal.len(), target_count, "Generating research plan");

        let prompt = Self::create_planning_prompt(goal, target_count);
        match model.generate::<ResearchPlan>(&prompt, false).await {
            Ok(answer) => {
                let mut plan = answer.value;
                plan.discovery_queries.retain(|q| !q.trim().is_empty());
                if plan.discovery_queries.is_empty() {
                    plan.discovery_queries =
                        Self::default_plan(goal, target_count).discovery_queries;
                }
                if plan.required_attributes.is_empty() {
                    plan.required_attributes =
                        DEFAULT_ATTRIBUTES.iter().map(|a| a.to_string()).collect();
                }
                info!(
                    queries = plan.discovery_queries.len(),
                    suggested_target = ?plan.suggested_target,
                    "Research plan ready"
                );
                Ok(plan)
            }
            Err(ProviderError::InvalidOutput(reason)) => {
                warn!(reason = %reason, "Plan did not parse, using default plan");
                Ok(Self::default_plan(goal, target_count))
            }
            Err(err) => Err(err),
        }
    }

    pub fn default_plan(goal: &str, target_count: usize) -> ResearchPlan {
        ResearchPlan {
            strategy: format!(
                "Survey the market for \"{}\", shortlist the strongest options and research each in depth.",
                goal
            ),
            discovery_queries: vec![goal.to_string()],
            required_attributes: DEFAULT_ATTRIBUTES.iter().map(|a| a.to_string()).collect(),
            suggested_target: Some(target_count),
        }
    }

    fn create_planning_prompt(goal: &str, target_count: usize) -> String {
        format!(
            r#"You are planning a market research mission.

RESEARCH GOAL:
{goal}

The client wants about {target_count} well-researched options.

Produce:
- strategy: two sentences on how to approach the research
- discovery_queries: 3 to 5 broad web search queries that will surface candidate products, companies or tools
- required_attributes: the attributes a useful comparison must cover
- suggested_target: how many options are worth researching in depth"#
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_plan_uses_goal() {
        let plan = PlanningAgent::default_plan("CRM tools for startups", 10);
        assert_eq!(plan.discovery_queries, vec!["CRM tools for startups".to_string()]);
        assert_eq!(plan.suggested_target, Some(10));
        assert_eq!(plan.required_attributes.len(), 5);
    }

    #[test]
    fn test_prompt_mentions_target() {
        let prompt = PlanningAgent::create_planning_prompt("CRM tools", 12);
        assert!(prompt.contains("about 12 well-researched options"));
    }
}
