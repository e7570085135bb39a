//! # OpenAI Adapter Module
//!
//! Adapter for the OpenAI API itself. The base URL falls back to the public
//! endpoint when a model does not set one, and every request carries the
//! configured bearer key plus an optional organization header.

use crate::{
    adapters::base::{AdapterUtils, CompletionRequest, CompletionResponse},
    error::BackendError,
    registry::ModelConfig,
};
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION},
    Client,
};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Clone, Debug)]
pub struct OpenAIAdapter {
    /// HTTP client with connection pooling
    client: Client,
    /// API key sent as `Authorization: Bearer`
    api_key: Option<String>,
    /// Optional `OpenAI-Organization` header
    organization: Option<String>,
}

impl OpenAIAdapter {
    pub fn new(client: Client, api_key: Option<String>, organization: Option<String>) -> Self {
        Self {
            client,
            api_key,
            organization,
        }
    }

    pub fn name(&self) -> &'static str {
        "openai"
    }

    pub fn has_auth(&self) -> bool {
        self.api_key.is_some()
    }

    fn base_url<'a>(&self, model: &'a ModelConfig) -> &'a str {
        if model.base_url.is_empty() {
            DEFAULT_OPENAI_BASE_URL
        } else {
            &model.base_url
        }
    }

    fn headers(&self) -> Result<HeaderMap, BackendError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|_| BackendError::InvalidRequest("OpenAI API key is not a valid header value".to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }
        if let Some(org) = &self.organization {
            let value = HeaderValue::from_str(org)
                .map_err(|_| BackendError::InvalidRequest("OpenAI organization is not a valid header value".to_string()))?;
            headers.insert("OpenAI-Organization", value);
        }
        Ok(headers)
    }

    pub async fn complete(
        &self,
        model: &ModelConfig,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, BackendError> {
        let url = AdapterUtils::chat_completions_url(self.base_url(model));
        AdapterUtils::post_chat_completion(self.name(), &self.client, &url, self.headers()?, request).await
    }
}
