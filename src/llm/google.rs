// Google Gemini adapter (generateContent with optional search grounding)

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::llm::provider::LLMAdapter;
use crate::types::{AppError, AppResult, LLMRequest, LLMResponse, ProviderError, TokenUsage};

pub struct GoogleAdapter {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl GoogleAdapter {
    pub fn new(api_key: &str, base_url: &str, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn endpoint_url(&self, model: &str) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        )
    }

    fn build_request_body(request: &LLMRequest) -> Value {
        let mut system_parts: Vec<Value> = request
            .system_instruction
            .iter()
            .map(|text| json!({ "text": text }))
            .collect();

        let contents: Vec<Value> = request
            .messages
            .iter()
            .filter_map(|m| match m.role.as_str() {
                "system" => {
                    system_parts.push(json!({ "text": m.content }));
                    None
                }
                "assistant" => Some(json!({ "role": "model", "parts": [{ "text": m.content }] })),
                _ => Some(json!({ "role": "user", "parts": [{ "text": m.content }] })),
            })
            .collect();

        let mut generation_config = serde_json::Map::new();
        if let Some(temperature) = request.temperature {
            generation_config.insert("temperature".into(), json!(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            generation_config.insert("maxOutputTokens".into(), json!(max_tokens));
        }

        let mut body = json!({ "contents": contents });
        if request.grounding {
            // Search grounding cannot be combined with a response schema.
            body["tools"] = json!([{ "google_search": {} }]);
        } else if let Some(schema) = &request.response_schema {
            generation_config.insert("responseMimeType".into(), json!("application/json"));
            generation_config.insert("responseSchema".into(), schema.clone());
        }
        if !system_parts.is_empty() {
            body["systemInstruction"] = json!({ "parts": system_parts });
        }
        if !generation_config.is_empty() {
            body["generationConfig"] = Value::Object(generation_config);
        }
        body
    }

    fn parse_response(body: &Value) -> Result<LLMResponse, ProviderError> {
        let candidate = body["candidates"]
            .as_array()
            .and_then(|c| c.first())
            .ok_or_else(|| {
                ProviderError::InvalidOutput("Missing 'candidates' in response".into())
            })?;

        let content: String = candidate["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let finish_reason = candidate["finishReason"]
            .as_str()
            .unwrap_or("STOP")
            .to_string();

        if content.trim().is_empty() {
            return Err(ProviderError::InvalidOutput(format!(
                "Empty answer (finish reason {})",
                finish_reason
            )));
        }

        let mut sources: Vec<String> = Vec::new();
        if let Some(chunks) = candidate["groundingMetadata"]["groundingChunks"].as_array() {
            for uri in chunks.iter().filter_map(|c| c["web"]["uri"].as_str()) {
                if !sources.iter().any(|s| s == uri) {
                    sources.push(uri.to_string());
                }
            }
        }

        let usage_metadata = &body["usageMetadata"];
        let usage = TokenUsage {
            prompt_tokens: usage_metadata["promptTokenCount"].as_u64().unwrap_or(0) as u32,
            completion_tokens: usage_metadata["candidatesTokenCount"].as_u64().unwrap_or(0) as u32,
            total_tokens: usage_metadata["totalTokenCount"].as_u64().unwrap_or(0) as u32,
        };

        Ok(LLMResponse {
            content,
            finish_reason,
            sources,
            usage,
        })
    }

    fn map_http_error(&self, status: StatusCode, body_text: &str) -> ProviderError {
        let message = format!("HTTP {} from Gemini API: {}", status, body_text);
        match status.as_u16() {
            401 | 403 => ProviderError::Auth(message),
            429 => ProviderError::RateLimited(message),
            408 | 504 => ProviderError::Timeout(self.timeout.as_millis() as u64),
            500..=599 => ProviderError::Unavailable(message),
            _ => ProviderError::InvalidRequest(message),
        }
    }

    fn map_transport_error(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(self.timeout.as_millis() as u64)
        } else {
            ProviderError::Unavailable(format!("Request to Gemini API failed: {}", err))
        }
    }
}

#[async_trait]
impl LLMAdapter for GoogleAdapter {
    async fn create_chat_completion(
        &self,
        request: &LLMRequest,
    ) -> Result<LLMResponse, ProviderError> {
        let body = Self::build_request_body(request);
        let url = self.endpoint_url(&request.model);

        debug!(
            model = request.model.as_str(),
            grounding = request.grounding,
            "Sending Gemini request"
        );

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        let body_text = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "Gemini request failed");
            return Err(self.map_http_error(status, &body_text));
        }

        let response_json: Value = serde_json::from_str(&body_text)
            .map_err(|e| ProviderError::InvalidOutput(format!("Invalid JSON in response: {}", e)))?;

        Self::parse_response(&response_json)
    }
}
