use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::LLMConfig;
use crate::types::{AppError, AppResult, LLMProvider, LLMRequest, LLMResponse, ProviderError};

/// The model collaborator. Implementations classify every failure into a
/// [`ProviderError`] so callers can decide between retrying and aborting.
#[async_trait]
pub trait LLMAdapter: Send + Sync {
    async fn create_chat_completion(
        &self,
        request: &LLMRequest,
    ) -> Result<LLMResponse, ProviderError>;
}

/// Build the configured adapter.
pub fn create_adapter(config: &LLMConfig) -> AppResult<Arc<dyn LLMAdapter>> {
    let provider = LLMProvider::from_id(&config.default_provider).ok_or_else(|| {
        AppError::Validation(format!("Unsupported provider: {}", config.default_provider))
    })?;

    let adapter: Arc<dyn LLMAdapter> = match provider {
        LLMProvider::Google => Arc::new(crate::llm::google::GoogleAdapter::new(
            &config.gemini_api_key,
            &config.api_base,
            Duration::from_secs(config.request_timeout_secs),
        )?),
    };

    Ok(adapter)
}
