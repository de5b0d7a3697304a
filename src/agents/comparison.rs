//! Comparison Agent
//!
//! Pairwise notes between the strongest findings. Each pair is a single
//! structuring call whose answer is merged into both findings.

use futures::future::join_all;
use tracing::{info, warn};

use crate::findings::{AttributePatch, Contribution, FindingsAggregator};
use crate::llm::schema::ComparisonAnswer;
use crate::llm::ResearchModel;
use crate::models::Finding;
use crate::types::ProviderError;

/// Only the head of the ranking is worth comparing.
const COMPARISON_POOL: usize = 8;

pub struct ComparisonAgent;

impl ComparisonAgent {
    /// Pair each of the top findings with its next two neighbours in the
    /// ranking, capped at `max_pairs`.
    pub fn select_pairs(ranked: &[Finding], max_pairs: usize) -> Vec<(Finding, Finding)> {
        let pool = &ranked[..ranked.len().min(COMPARISON_POOL)];
        let mut pairs = Vec::new();
        for (i, first) in pool.iter().enumerate() {
            for second in pool.iter().skip(i + 1).take(2) {
                if pairs.len() == max_pairs {
                    return pairs;
                }
                pairs.push((first.clone(), second.clone()));
            }
        }
        pairs
    }

    /// Returns the number of pairs that produced notes.
    pub async fn compare(
        model: &ResearchModel,
        findings: &FindingsAggregator,
        goal: &str,
        max_pairs: usize,
    ) -> Result<usize, ProviderError> {
        let pairs = Self::select_pairs(&findings.ranked().await, max_pairs);
        if pairs.is_empty() {
            info!("Fewer than two findings, skipping comparison");
            return Ok(0);
        }
        info!(pairs = pairs.len(), "Comparing findings");

        let answers = join_all(pairs.iter().map(|(first, second)| async move {
            let prompt = Self::create_comparison_prompt(goal, first, second);
            model.generate::<ComparisonAnswer>(&prompt, false).await
        }))
        .await;

        let mut compared = 0;
        for ((first, second), answer) in pairs.iter().zip(answers) {
            match answer {
                Ok(answer) => {
                    let answer = answer.value;
                    findings
                        .merge_existing(
                            &first.name,
                            Contribution::new(AttributePatch::Comparison {
                                other: second.name.clone(),
                                note: answer.first_vs_second,
                            }),
                        )
                        .await;
                    findings
                        .merge_existing(
                            &second.name,
                            Contribution::new(AttributePatch::Comparison {
                                other: first.name.clone(),
                                note: answer.second_vs_first,
                            }),
                        )
                        .await;
                    compared += 1;
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => warn!(
                    first = %first.name,
                    second = %second.name,
                    error = %err,
                    "Comparison failed"
                ),
            }
        }

        Ok(compared)
    }

    fn profile(finding: &Finding) -> String {
        let attrs = &finding.attributes;
        format!(
            "{name}\n  pricing: {pricing}\n  features: {features}\n  pros: {pros}\n  cons: {cons}",
            name = finding.name,
            pricing = attrs
                .pricing
                .as_ref()
                .map(|p| p.summary())
                .unwrap_or_else(|| "unknown".to_string()),
            features = attrs.features.join(", "),
            pros = attrs.pros.join(", "),
            cons = attrs.cons.join(", "),
        )
    }

    fn create_comparison_prompt(goal: &str, first: &Finding, second: &Finding) -> String {
        let first_profile = Self::profile(first);
        let second_profile = Self::profile(second);
        format!(
            r#"RESEARCH GOAL:
{goal}

COMPARE:
{first_profile}

{second_profile}

In one or two sentences each, say how {first} stands against {second} for this goal (first_vs_second) and how {second} stands against {first} (second_vs_first). Be concrete about price and capability differences."#,
            first = first.name,
            second = second.name,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranked(n: usize) -> Vec<Finding> {
        (0..n).map(|i| Finding::new(format!("Tool {}", i))).collect()
    }

    #[test]
    fn test_pairs_neighbours_and_cap() {
        let pairs = ComparisonAgent::select_pairs(&ranked(4), 10);
        let names: Vec<(String, String)> = pairs
            .iter()
            .map(|(a, b)| (a.name.clone(), b.name.clone()))
            .collect();
        assert_eq!(names.len(), 5);
        assert_eq!(names[0], ("Tool 0".to_string(), "Tool 1".to_string()));
        assert_eq!(names[1], ("Tool 0".to_string(), "Tool 2".to_string()));
        assert_eq!(names[4], ("Tool 2".to_string(), "Tool 3".to_string()));

        assert_eq!(ComparisonAgent::select_pairs(&ranked(20), 10).len(), 10);
        assert!(ComparisonAgent::select_pairs(&ranked(1), 10).is_empty());
        assert!(ComparisonAgent::select_pairs(&ranked(5), 0).is_empty());
    }

    #[test]
    fn test_pool_is_limited_to_top_findings() {
        let pairs = ComparisonAgent::select_pairs(&ranked(20), 100);
        assert_eq!(pairs.len(), 13);
        assert!(pairs.iter().all(|(a, b)| a.name != "Tool 8" && b.name != "Tool 8"));
    }

    #[test]
    fn test_prompt_names_both_entities() {
        let prompt = ComparisonAgent::create_comparison_prompt(
            "issue trackers",
            &Finding::new("Linear"),
            &Finding::new("Jira"),
        );
        assert!(prompt.contains("COMPARE:"));
        assert!(prompt.contains("how Linear stands against Jira"));
    }
}
