//! Query Planner
//!
//! Turns a goal and an entity name into targeted sub-queries, one per
//! [`QueryKind`]. Narrowed sets carry a stricter prompt so a re-query focuses
//! on the gap that made the finding shallow.

use serde::{Deserialize, Serialize};

use crate::models::QueryKind;

/// One targeted sub-query for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedQuery {
    pub entity: String,
    pub kind: QueryKind,
    pub prompt: String,
    #[serde(default)]
    pub narrowed: bool,
}

pub struct QueryPlanner;

impl QueryPlanner {
    /// The full five-query deep dive, pricing first.
    pub fn plan(goal: &str, entity: &str) -> Vec<PlannedQuery> {
        Self::plan_kinds(goal, entity, &QueryKind::ALL)
    }

    /// A deep dive over `kinds`, in canonical order.
    pub fn plan_kinds(goal: &str, entity: &str, kinds: &[QueryKind]) -> Vec<PlannedQuery> {
        QueryKind::ALL
            .into_iter()
            .filter(|kind| kinds.contains(kind))
            .map(|kind| PlannedQuery {
                entity: entity.to_string(),
                kind,
                prompt: Self::create_prompt(goal, entity, kind, false),
                narrowed: false,
            })
            .collect()
    }

    /// Kinds a plan's required attributes call for. The scored kinds are
    /// always included; a plan naming nothing recognizable gets all five.
    pub fn kinds_for(required_attributes: &[String]) -> Vec<QueryKind> {
        let named: Vec<QueryKind> = required_attributes
            .iter()
            .filter_map(|a| QueryKind::from_attribute(a))
            .collect();
        if named.is_empty() {
            return QueryKind::ALL.to_vec();
        }
        QueryKind::ALL
            .into_iter()
            .filter(|kind| QueryKind::SCORED.contains(kind) || named.contains(kind))
            .collect()
    }

    /// Only the given kinds, in canonical order.
    pub fn plan_narrowed(goal: &str, entity: &str, kinds: &[QueryKind]) -> Vec<PlannedQuery> {
        QueryKind::ALL
            .into_iter()
            .filter(|kind| kinds.contains(kind))
            .map(|kind| PlannedQuery {
                entity: entity.to_string(),
                kind,
                prompt: Self::create_prompt(goal, entity, kind, true),
                narrowed: true,
            })
            .collect()
    }

    fn create_prompt(goal: &str, entity: &str, kind: QueryKind, narrowed: bool) -> String {
        let focus = match kind {
            QueryKind::Pricing => format!(
                "What does {entity} cost? List the starting price and every published pricing tier \
                 with its price, and whether a free trial exists."
            ),
            QueryKind::Features => format!(
                "List the concrete, product-specific features of {entity} (named capabilities, not \
                 adjectives like \"easy to use\"), plus a one-sentence description."
            ),
            QueryKind::Reviews => format!(
                "Summarize what users say about {entity} in reviews: the main pros, the main cons \
                 and a short overall summary."
            ),
            QueryKind::Competitors => format!(
                "Who are the main competitors of {entity}, which tools does it integrate with, \
                 when was it founded and how is it funded?"
            ),
            QueryKind::UseCases => format!(
                "What are the typical use cases of {entity}, who is its target audience and what \
                 is it best for?"
            ),
        };

        let strictness = if narrowed {
            match kind {
                QueryKind::Pricing => {
                    "\nA previous answer only said \"contact sales\" or similar. Search the \
                     official pricing page and reputable comparison sites for actual figures in a \
                     currency."
                }
                QueryKind::Features => {
                    "\nA previous answer was too generic. Name at least three specific features."
                }
                QueryKind::Reviews => {
                    "\nA previous answer lacked pros, cons or citations. Use review sites such as \
                     G2, Capterra or TrustRadius and cite them."
                }
                _ => "\nA previous attempt at this question failed. Answer it fully.",
            }
        } else {
            ""
        };

        format!(
            "RESEARCH GOAL:\n{goal}\n\nENTITY: {entity}\n\n{focus}{strictness}\n\
             Use current, cited web sources."
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_plan_has_one_query_per_kind() {
        let queries = QueryPlanner::plan("best issue trackers", "Linear");
        assert_eq!(queries.len(), 5);
        assert_eq!(queries[0].kind, QueryKind::Pricing);
        assert!(queries.iter().all(|q| q.entity == "Linear" && !q.narrowed));
        assert!(queries[0].prompt.contains("best issue trackers"));
    }

    #[test]
    fn test_narrowed_plan_keeps_canonical_order() {
        let queries = QueryPlanner::plan_narrowed(
            "best issue trackers",
            "Jira",
            &[QueryKind::Reviews, QueryKind::Pricing],
        );
        let kinds: Vec<QueryKind> = queries.iter().map(|q| q.kind).collect();
        assert_eq!(kinds, vec![QueryKind::Pricing, QueryKind::Reviews]);
        assert!(queries[0].prompt.contains("contact sales"));
        assert!(queries.iter().all(|q| q.narrowed));
    }

    #[test]
    fn test_plan_attributes_select_kinds() {
        let attrs = |list: &[&str]| list.iter().map(|a| a.to_string()).collect::<Vec<_>>();

        let kinds = QueryPlanner::kinds_for(&attrs(&["Pricing tiers", "key features"]));
        assert_eq!(kinds, QueryKind::SCORED.to_vec());

        let kinds = QueryPlanner::kinds_for(&attrs(&["pricing", "integrations"]));
        assert_eq!(
            kinds,
            vec![
                QueryKind::Pricing,
                QueryKind::Features,
                QueryKind::Reviews,
                QueryKind::Competitors
            ]
        );

        assert_eq!(QueryPlanner::kinds_for(&attrs(&["vibes"])), QueryKind::ALL.to_vec());
        assert_eq!(QueryPlanner::kinds_for(&[]), QueryKind::ALL.to_vec());

        let queries =
            QueryPlanner::plan_kinds("CRM", "Acme", &[QueryKind::UseCases, QueryKind::Pricing]);
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].kind, QueryKind::Pricing);
        assert!(!queries[1].narrowed);
    }

    #[test]
    fn test_empty_narrowing_plans_nothing() {
        assert!(QueryPlanner::plan_narrowed("goal", "Jira", &[]).is_empty());
    }
}
