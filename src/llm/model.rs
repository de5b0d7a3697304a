use std::sync::Arc;
use std::time::Duration;

use governor::DefaultDirectRateLimiter;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::llm::provider::LLMAdapter;
use crate::llm::schema::{self, Structured};
use crate::types::{LLMMessage, LLMRequest, ProviderError};
use crate::utils::{with_retry, RetryPolicy};

const SYSTEM_INSTRUCTION: &str = "You are a meticulous market research analyst. \
Answer only with a single JSON document matching the requested shape. \
Use null or empty lists for facts you cannot find; never invent prices.";

/// A parsed answer plus the citations the provider grounded it on.
#[derive(Debug, Clone)]
pub struct Grounded<T> {
    pub value: T,
    pub sources: Vec<String>,
}

/// Mission-scoped gateway to the model collaborator.
///
/// Each attempt takes a permit from the mission's FIFO semaphore (and the
/// process-wide one when configured) and releases it before any backoff
/// sleep, so a retrying call never starves queued work.
#[derive(Clone)]
pub struct ResearchModel {
    adapter: Arc<dyn LLMAdapter>,
    model: String,
    mission_permits: Arc<Semaphore>,
    global_permits: Option<Arc<Semaphore>>,
    pacer: Option<Arc<DefaultDirectRateLimiter>>,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl ResearchModel {
    pub fn new(
        adapter: Arc<dyn LLMAdapter>,
        model: impl Into<String>,
        max_in_flight: usize,
    ) -> Self {
        Self {
            adapter,
            model: model.into(),
            mission_permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            global_permits: None,
            pacer: None,
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_global_permits(mut self, permits: Option<Arc<Semaphore>>) -> Self {
        self.global_permits = permits;
        self
    }

    pub fn with_pacer(mut self, pacer: Option<Arc<DefaultDirectRateLimiter>>) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Ask for a `T`. Grounded calls get live web search and carry the shape
    /// in the prompt; structuring calls send the schema to the provider.
    pub async fn generate<T: Structured>(
        &self,
        prompt: &str,
        grounding: bool,
    ) -> Result<Grounded<T>, ProviderError> {
        let request = self.build_request::<T>(prompt, grounding);
        with_retry(&self.retry, |attempt| self.attempt::<T>(&request, attempt)).await
    }

    fn build_request<T: Structured>(&self, prompt: &str, grounding: bool) -> LLMRequest {
        let (content, response_schema) = if grounding {
            (
                format!(
                    "{}\n\nRespond with JSON shaped exactly like:\n{}",
                    prompt,
                    T::shape()
                ),
                None,
            )
        } else {
            (prompt.to_string(), Some(T::schema()))
        };

        LLMRequest {
            model: self.model.clone(),
            messages: vec![LLMMessage::user(content)],
            max_tokens: Some(4096),
            temperature: Some(if grounding { 0.2 } else { 0.4 }),
            system_instruction: Some(SYSTEM_INSTRUCTION.to_string()),
            grounding,
            response_schema,
        }
    }

    async fn attempt<T: Structured>(
        &self,
        request: &LLMRequest,
        attempt: u32,
    ) -> Result<Grounded<T>, ProviderError> {
        let _mission_permit = self
            .mission_permits
            .acquire()
            .await
            .map_err(|_| ProviderError::Unavailable("mission permit pool closed".into()))?;
        let _global_permit = match &self.global_permits {
            Some(permits) => Some(
                permits
                    .acquire()
                    .await
                    .map_err(|_| ProviderError::Unavailable("global permit pool closed".into()))?,
            ),
            None => None,
        };
        if let Some(pacer) = &self.pacer {
            pacer.until_ready().await;
        }

        debug!(attempt, grounding = request.grounding, "Model call");
        let response = tokio::time::timeout(
            self.call_timeout,
            self.adapter.create_chat_completion(request),
        )
        .await
        .map_err(|_| ProviderError::Timeout(self.call_timeout.as_millis() as u64))??;

        let value = schema::parse::<T>(&response.content)?;
        Ok(Grounded {
            value,
            sources: response.sources,
        })
    }
}
