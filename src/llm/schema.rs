//! Typed model answers
//!
//! Every model call names the struct it expects back. Structuring calls send
//! the JSON schema to the provider; grounded calls cannot, so the same schema
//! is rendered as an example shape inside the prompt. Either way the answer
//! is parsed strictly at this boundary and a mismatch is
//! [`ProviderError::InvalidOutput`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::models::{Candidate, Pricing};
use crate::types::ProviderError;

/// A struct the model can be asked to produce.
pub trait Structured: DeserializeOwned + Send {
    fn schema() -> Value;

    /// Example JSON shape embedded in grounded prompts.
    fn shape() -> String {
        example(&Self::schema()).to_string()
    }
}

fn string() -> Value {
    json!({ "type": "STRING" })
}

fn strings() -> Value {
    json!({ "type": "ARRAY", "items": string() })
}

fn boolean() -> Value {
    json!({ "type": "BOOLEAN" })
}

fn object(fields: &[(&str, Value)], required: &[&str]) -> Value {
    let properties: Map<String, Value> = fields
        .iter()
        .map(|(name, schema)| (name.to_string(), schema.clone()))
        .collect();
    json!({ "type": "OBJECT", "properties": properties, "required": required })
}

fn example(schema: &Value) -> Value {
    match schema["type"].as_str() {
        Some("OBJECT") => {
            let mut out = Map::new();
            if let Some(properties) = schema["properties"].as_object() {
                for (name, field) in properties {
                    out.insert(name.clone(), example(field));
                }
            }
            Value::Object(out)
        }
        Some("ARRAY") => json!([example(&schema["items"])]),
        Some("BOOLEAN") => json!(true),
        Some("NUMBER") => json!(0.0),
        Some("INTEGER") => json!(0),
        _ => json!("..."),
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchPlan {
    #[serde(default)]
    pub strategy: String,
    #[serde(default)]
    pub discovery_queries: Vec<String>,
    #[serde(default)]
    pub required_attributes: Vec<String>,
    #[serde(default)]
    pub suggested_target: Option<usize>,
}

impl Structured for ResearchPlan {
    fn schema() -> Value {
        object(
            &[
                ("strategy", string()),
                ("discovery_queries", strings()),
                ("required_attributes", strings()),
                ("suggested_target", json!({ "type": "INTEGER" })),
            ],
            &["strategy", "discovery_queries"],
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CandidateList {
    pub candidates: Vec<Candidate>,
}

impl Structured for CandidateList {
    fn schema() -> Value {
        object(
            &[(
                "candidates",
                json!({
                    "type": "ARRAY",
                    "items": object(
                        &[
                            ("name", string()),
                            ("rationale", string()),
                            ("confidence", json!({ "type": "NUMBER" })),
                            ("category", string()),
                            ("website", string()),
                        ],
                        &["name"],
                    ),
                }),
            )],
            &["candidates"],
        )
    }
}

impl Structured for Pricing {
    fn schema() -> Value {
        object(
            &[
                ("starting_price", string()),
                (
                    "tiers",
                    json!({
                        "type": "ARRAY",
                        "items": object(
                            &[("name", string()), ("price", string())],
                            &["name", "price"],
                        ),
                    }),
                ),
                ("free_trial", boolean()),
            ],
            &[],
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeaturesAnswer {
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Structured for FeaturesAnswer {
    fn schema() -> Value {
        object(&[("features", strings()), ("description", string())], &["features"])
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReviewsAnswer {
    #[serde(default)]
    pub pros: Vec<String>,
    #[serde(default)]
    pub cons: Vec<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

impl Structured for ReviewsAnswer {
    fn schema() -> Value {
        object(
            &[("pros", strings()), ("cons", strings()), ("summary", string())],
            &["pros", "cons"],
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompetitorsAnswer {
    #[serde(default)]
    pub competitors: Vec<String>,
    #[serde(default)]
    pub integrations: Vec<String>,
    #[serde(default)]
    pub founded: Option<String>,
    #[serde(default)]
    pub funding: Option<String>,
}

impl Structured for CompetitorsAnswer {
    fn schema() -> Value {
        object(
            &[
                ("competitors", strings()),
                ("integrations", strings()),
                ("founded", string()),
                ("funding", string()),
            ],
            &["competitors"],
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UseCasesAnswer {
    #[serde(default)]
    pub use_cases: Vec<String>,
    #[serde(default)]
    pub target_audience: Option<String>,
    #[serde(default)]
    pub best_for: Option<String>,
}

impl Structured for UseCasesAnswer {
    fn schema() -> Value {
        object(
            &[
                ("use_cases", strings()),
                ("target_audience", string()),
                ("best_for", string()),
            ],
            &["use_cases"],
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComparisonAnswer {
    /// How the first entity stands against the second
    pub first_vs_second: String,
    pub second_vs_first: String,
}

impl Structured for ComparisonAnswer {
    fn schema() -> Value {
        object(
            &[("first_vs_second", string()), ("second_vs_first", string())],
            &["first_vs_second", "second_vs_first"],
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidationAnswer {
    pub confirmed: bool,
    #[serde(default)]
    pub observed_price: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

impl Structured for ValidationAnswer {
    fn schema() -> Value {
        object(
            &[
                ("confirmed", boolean()),
                ("observed_price", string()),
                ("note", string()),
            ],
            &["confirmed"],
        )
    }
}

/// Final report of a mission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SynthesisReport {
    #[serde(default)]
    pub executive_summary: String,
    #[serde(default)]
    pub key_insights: Vec<String>,
    #[serde(default)]
    pub top_recommendations: Vec<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
}

impl Structured for SynthesisReport {
    fn schema() -> Value {
        object(
            &[
                ("executive_summary", string()),
                ("key_insights", strings()),
                ("top_recommendations", strings()),
                ("next_steps", strings()),
            ],
            &["executive_summary"],
        )
    }
}

/// Slice out the JSON document of a model answer, tolerating code fences and
/// chatter around it.
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let closing = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(closing)?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

pub fn parse<T: DeserializeOwned>(text: &str) -> Result<T, ProviderError> {
    let document = extract_json(text)
        .ok_or_else(|| ProviderError::InvalidOutput("No JSON document in answer".into()))?;
    serde_json::from_str(document).map_err(|e| ProviderError::InvalidOutput(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_from_fenced_answer() {
        let text = "Here you go:\n```json\n{\"pros\": [\"fast\"], \"cons\": []}\n```\nHope it helps";
        assert_eq!(extract_json(text), Some("{\"pros\": [\"fast\"], \"cons\": []}"));
        assert_eq!(extract_json("no json"), None);
    }

    #[test]
    fn test_parse_typed_answer() {
        let answer: ReviewsAnswer =
            parse("```json\n{\"pros\": [\"fast\"], \"cons\": [\"pricey\"]}\n```").unwrap();
        assert_eq!(answer.pros, vec!["fast"]);
        assert!(answer.summary.is_none());
    }

    #[test]
    fn test_schema_mismatch_is_invalid_output() {
        let err = parse::<ComparisonAnswer>("{\"first_vs_second\": 3}").unwrap_err();
        assert!(matches!(err, ProviderError::InvalidOutput(_)));
        let err = parse::<ValidationAnswer>("The price is $10").unwrap_err();
        assert!(matches!(err, ProviderError::InvalidOutput(_)));
    }

    #[test]
    fn test_candidates_parse_with_defaults() {
        let list: CandidateList = parse(r#"{"candidates": [{"name": "Linear"}]}"#).unwrap();
        assert_eq!(list.candidates[0].name, "Linear");
        assert_eq!(list.candidates[0].confidence, 0.0);
    }

    #[test]
    fn test_shape_renders_example() {
        let shape: Value = serde_json::from_str(&ReviewsAnswer::shape()).unwrap();
        assert_eq!(shape["pros"], json!(["..."]));
        assert_eq!(shape["summary"], json!("..."));
        let pricing: Value = serde_json::from_str(&Pricing::shape()).unwrap();
        assert_eq!(pricing["free_trial"], json!(true));
    }
}
