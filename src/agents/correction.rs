//! Self-correction selection
//!
//! Picks the findings that fell below the quality threshold and builds the
//! narrowed re-queries that target exactly the checks they failed.

use super::query_planner::{PlannedQuery, QueryPlanner};
use crate::models::Finding;
use crate::scoring;

/// Findings scoring under `threshold`. Errored findings are left alone.
pub fn shallow_findings(findings: &[Finding], threshold: f64) -> Vec<Finding> {
    findings
        .iter()
        .filter(|f| !f.is_errored() && f.quality_score < threshold)
        .cloned()
        .collect()
}

/// Narrowed queries for every shallow finding, in finding order.
pub fn narrowed_queries(goal: &str, shallow: &[Finding]) -> Vec<PlannedQuery> {
    shallow
        .iter()
        .flat_map(|finding| {
            let kinds = scoring::narrowed_kinds(finding);
            QueryPlanner::plan_narrowed(goal, &finding.name, &kinds)
        })
        .collect()
}
