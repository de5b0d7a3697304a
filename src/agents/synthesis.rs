//! Synthesis Agent
//!
//! Turns the final findings into an executive report. A failed call never
//! fails the mission: a report is assembled from the findings instead.

use tracing::{info, warn};

use crate::llm::schema::SynthesisReport;
use crate::llm::ResearchModel;
use crate::models::Finding;
use crate::types::ProviderError;

const REPORT_FINDINGS: usize = 15;

pub struct SynthesisAgent;

impl SynthesisAgent {
    /// `ranked` must be best-first. Only authentication errors propagate.
    pub async fn synthesize(
        model: &ResearchModel,
        goal: &str,
        ranked: &[Finding],
    ) -> Result<SynthesisReport, ProviderError> {
        info!(findings = ranked.len(), "Synthesizing report");
        let prompt = Self::create_synthesis_prompt(goal, ranked);
        match model.generate::<SynthesisReport>(&prompt, false).await {
            Ok(answer) if !answer.value.executive_summary.trim().is_empty() => Ok(answer.value),
            Ok(_) => {
                warn!("Empty executive summary, using fallback report");
                Ok(Self::fallback_report(goal, ranked))
            }
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                warn!(error = %err, "Synthesis failed, using fallback report");
                Ok(Self::fallback_report(goal, ranked))
            }
        }
    }

    pub fn fallback_report(goal: &str, ranked: &[Finding]) -> SynthesisReport {
        let verified = ranked.iter().filter(|f| f.verified).count();
        let top: Vec<&Finding> = ranked.iter().take(3).collect();

        let executive_summary = if top.is_empty() {
            format!("No options could be researched for \"{}\".", goal)
        } else {
            format!(
                "Researched {} options for \"{}\" ({} verified). Strongest results: {}.",
                ranked.len(),
                goal,
                verified,
                top.iter().map(|f| f.name.as_str()).collect::<Vec<_>>().join(", ")
            )
        };

        let key_insights = top
            .iter()
            .filter_map(|f| {
                f.attributes
                    .pricing
                    .as_ref()
                    .map(|p| p.summary())
                    .filter(|p| !p.is_empty())
                    .map(|p| format!("{} starts at {}", f.name, p))
            })
            .collect();

        let top_recommendations = top
            .iter()
            .map(|f| match &f.attributes.best_for {
                Some(best_for) => format!("{}: best for {}", f.name, best_for),
                None => format!("{} (quality {:.2})", f.name, f.quality_score),
            })
            .collect();

        let next_steps = ranked
            .iter()
            .filter(|f| f.unconfirmed)
            .map(|f| format!("Re-check the published details of {}", f.name))
            .collect();

        SynthesisReport {
            executive_summary,
            key_insights,
            top_recommendations,
            next_steps,
        }
    }

    fn create_synthesis_prompt(goal: &str, ranked: &[Finding]) -> String {
        let findings_text = ranked
            .iter()
            .take(REPORT_FINDINGS)
            .map(|f| {
                let attrs = &f.attributes;
                format!(
                    "- {} (quality {:.2}{}): pricing {}; features {}; pros {}; cons {}; best for {}",
                    f.name,
                    f.quality_score,
                    if f.verified { ", verified" } else { "" },
                    attrs
                        .pricing
                        .as_ref()
                        .map(|p| p.summary())
                        .unwrap_or_else(|| "unknown".to_string()),
                    attrs.features.join(", "),
                    attrs.pros.join(", "),
                    attrs.cons.join(", "),
                    attrs.best_for.as_deref().unwrap_or("n/a"),
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            r#"SYNTHESIZE RESEARCH

RESEARCH GOAL:
{goal}

FINDINGS (best first):
{findings_text}

Write an executive_summary of three to five sentences, 3 to 6 key_insights across the market, the top_recommendations for this goal with a reason each, and concrete next_steps for the reader."#
        )
    }
}
