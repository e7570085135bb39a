//! # OpenAI-Compatible Adapter
//!
//! Self-hosted servers speaking the OpenAI chat-completions contract (vLLM,
//! LightLLM, llama.cpp server, LiteLLM proxies). The base URL comes from the
//! model entry and is required; the bearer header is only sent when a key is
//! configured.

use crate::{
    adapters::base::{AdapterUtils, CompletionRequest, CompletionResponse},
    error::BackendError,
    registry::ModelConfig,
};
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION},
    Client,
};

#[derive(Clone, Debug)]
pub struct OpenAICompatibleAdapter {
    client: Client,
    api_key: Option<String>,
}

impl OpenAICompatibleAdapter {
    pub fn new(client: Client, api_key: Option<String>) -> Self {
        Self { client, api_key }
    }

    pub fn name(&self) -> &'static str {
        "openai_compatible"
    }

    pub fn has_auth(&self) -> bool {
        self.api_key.is_some()
    }

    pub async fn complete(
        &self,
        model: &ModelConfig,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, BackendError> {
        if model.base_url.is_empty() {
            return Err(BackendError::InvalidRequest(format!(
                "model '{}' has no base_url configured",
                model.logical_name
            )));
        }

        let mut headers = HeaderMap::new();
        if let Some(key) = &self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|_| BackendError::InvalidRequest("backend API key is not a valid header value".to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let url = AdapterUtils::chat_completions_url(&model.base_url);
        AdapterUtils::post_chat_completion(self.name(), &self.client, &url, headers, request).await
    }
}
