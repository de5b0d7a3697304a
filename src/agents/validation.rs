//! Validation Agent
//!
//! Re-checks the cited facts of the top findings with a fresh grounded
//! search. Confirmed findings become verified; the rest are flagged
//! unconfirmed with a note instead of being dropped.

use futures::future::join_all;
use tracing::{info, warn};

use crate::findings::{AttributePatch, Contribution, FindingsAggregator};
use crate::llm::schema::ValidationAnswer;
use crate::llm::ResearchModel;
use crate::models::Finding;
use crate::types::ProviderError;

pub struct ValidationAgent;

impl ValidationAgent {
    /// Returns how many findings were confirmed.
    pub async fn validate(
        model: &ResearchModel,
        findings: &FindingsAggregator,
        sample_size: usize,
    ) -> Result<usize, ProviderError> {
        let sample: Vec<Finding> = findings.ranked().await.into_iter().take(sample_size).collect();
        info!(sample = sample.len(), "Validating top findings");

        let answers = join_all(sample.iter().map(|finding| async move {
            let prompt = Self::create_validation_prompt(finding);
            model.generate::<ValidationAnswer>(&prompt, true).await
        }))
        .await;

        let mut confirmed = 0;
        for (finding, answer) in sample.iter().zip(answers) {
            let contribution = match answer {
                Ok(answer) => {
                    let ValidationAnswer {
                        confirmed: ok,
                        observed_price,
                        note,
                    } = answer.value;
                    if ok {
                        confirmed += 1;
                    }
                    let note = match (note, observed_price) {
                        (Some(note), Some(price)) => {
                            Some(format!("{} (observed price: {})", note, price))
                        }
                        (None, Some(price)) => Some(format!("observed price: {}", price)),
                        (note, None) => note,
                    };
                    Contribution::new(AttributePatch::Validation { confirmed: ok, note })
                        .with_sources(answer.sources)
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(entity = %finding.name, error = %err, "Validation query failed");
                    Contribution::new(AttributePatch::Validation {
                        confirmed: false,
                        note: Some(format!("validation query failed: {}", err)),
                    })
                }
            };
            findings.merge_existing(&finding.name, contribution).await;
        }

        info!(confirmed, checked = sample.len(), "Validation finished");
        Ok(confirmed)
    }

    fn create_validation_prompt(finding: &Finding) -> String {
        let attrs = &finding.attributes;
        let pricing = attrs
            .pricing
            .as_ref()
            .map(|p| p.summary())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "not recorded".to_string());
        let features = if attrs.features.is_empty() {
            "none recorded".to_string()
        } else {
            attrs.features.join(", ")
        };
        let sources = if finding.sources.is_empty() {
            "none".to_string()
        } else {
            finding.sources.join("\n")
        };

        format!(
            r#"VERIFY CLAIMS ABOUT: {name}

Recorded pricing: {pricing}
Recorded features: {features}

Previously cited sources:
{sources}

Search the official website and current independent sources. Set confirmed to true only if the recorded pricing and features still hold. Report the price you actually observed and a short note on any discrepancy."#,
            name = finding.name,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::llm::LLMAdapter;
    use crate::models::Candidate;
    use crate::types::{LLMRequest, LLMResponse};
    use crate::utils::RetryPolicy;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    /// Confirms everything except the named entity; fails Jira outright.
    struct Verifier;

    #[async_trait]
    impl LLMAdapter for Verifier {
        async fn create_chat_completion(
            &self,
            request: &LLMRequest,
        ) -> Result<LLMResponse, ProviderError> {
            let prompt = &request.messages[0].content;
            if prompt.contains("ABOUT: Jira") {
                return Err(ProviderError::Unavailable("503".into()));
            }
            let content = if prompt.contains("ABOUT: Asana") {
                r#"{"confirmed": false, "observed_price": "$13.49/user/month", "note": "Price rose"}"#
            } else {
                r#"{"confirmed": true}"#
            };
            Ok(LLMResponse {
                content: content.into(),
                sources: vec!["https://example.com/pricing".into()],
                ..LLMResponse::default()
            })
        }
    }

    async fn aggregator(names: &[&str]) -> FindingsAggregator {
        let bus = Arc::new(EventBus::new(Duration::from_secs(15)));
        let findings = FindingsAggregator::new("chr_val00001", bus);
        for name in names {
            findings
                .insert_candidate(&Candidate {
                    name: name.to_string(),
                    rationale: String::new(),
                    confidence: 0.5,
                    category: String::new(),
                    website: None,
                    discovered_via: String::new(),
                })
                .await;
        }
        findings
    }

    #[tokio::test]
    async fn test_validation_flags_instead_of_dropping() {
        let findings = aggregator(&["Linear", "Asana", "Jira"]).await;
        let model = ResearchModel::new(Arc::new(Verifier), "gemini-test", 4)
            .with_retry(RetryPolicy::immediate(0));

        let confirmed = ValidationAgent::validate(&model, &findings, 10).await.unwrap();
        assert_eq!(confirmed, 1);
        assert_eq!(findings.len().await, 3);

        let linear = findings.get("Linear").await.unwrap();
        assert!(linear.verified && !linear.unconfirmed);

        let asana = findings.get("Asana").await.unwrap();
        assert!(!asana.verified && asana.unconfirmed);
        assert_eq!(
            asana.validation_note.as_deref(),
            Some("Price rose (observed price: $13.49/user/month)")
        );

        let jira = findings.get("Jira").await.unwrap();
        assert!(jira.unconfirmed);
        assert!(jira.validation_note.unwrap().starts_with("validation query failed"));
    }

    #[tokio::test]
    async fn test_sample_size_limits_checks() {
        let findings = aggregator(&["Linear", "Asana", "Notion"]).await;
        let model = ResearchModel::new(Arc::new(Verifier), "gemini-test", 4);
        ValidationAgent::validate(&model, &findings, 1).await.unwrap();
        let checked = findings
            .list()
            .await
            .into_iter()
            .filter(|f| f.verified || f.unconfirmed)
            .count();
        assert_eq!(checked, 1);
    }
}
