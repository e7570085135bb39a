//! # Backend Adapters Module
//!
//! Turns a normalized [`CompletionRequest`] into a call against one backend
//! protocol family and classifies every failure into a [`BackendError`].
//!
//! ## Supported Protocols:
//!
//! - **openai**: the OpenAI API (default base URL, bearer key, organization)
//! - **openai_compatible**: any self-hosted OpenAI-compatible endpoint
//!
//! Adding a backend family means adding an [`Adapter`] variant; callers only
//! depend on [`CompletionBackend`].

use crate::{
    config::Config,
    core::http_client::{HttpClientBuilder, HttpClientError},
    error::BackendError,
    registry::{BackendProtocol, ModelConfig},
};
use reqwest::Client;

pub mod base;
pub mod compatible;
pub mod openai;

pub use base::{AdapterUtils, CompletionBackend, CompletionRequest, CompletionResponse};
pub use compatible::OpenAICompatibleAdapter;
pub use openai::OpenAIAdapter;

/// # LLM Adapter Enum
///
/// Closed set of protocol variants.
#[derive(Clone, Debug)]
pub enum Adapter {
    OpenAI(OpenAIAdapter),
    OpenAICompatible(OpenAICompatibleAdapter),
}

impl Adapter {
    pub async fn complete(
        &self,
        model: &ModelConfig,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, BackendError> {
        match self {
            Self::OpenAI(adapter) => adapter.complete(model, request).await,
            Self::OpenAICompatible(adapter) => adapter.complete(model, request).await,
        }
    }

    /// Get adapter name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenAI(adapter) => adapter.name(),
            Self::OpenAICompatible(adapter) => adapter.name(),
        }
    }

    pub fn has_auth(&self) -> bool {
        match self {
            Self::OpenAI(adapter) => adapter.has_auth(),
            Self::OpenAICompatible(adapter) => adapter.has_auth(),
        }
    }
}

/// Holds one adapter per protocol and dispatches on the model's
/// `backend_protocol`.
#[derive(Clone, Debug)]
pub struct AdapterRouter {
    openai: Adapter,
    compatible: Adapter,
}

impl AdapterRouter {
    pub fn new(client: Client, config: &Config) -> Self {
        Self {
            openai: Adapter::OpenAI(OpenAIAdapter::new(
                client.clone(),
                config.openai_api_key.clone(),
                config.openai_organization.clone(),
            )),
            compatible: Adapter::OpenAICompatible(OpenAICompatibleAdapter::new(
                client,
                config.compatible_api_key.clone(),
            )),
        }
    }

    /// Build the shared HTTP client from configuration and wire both adapters.
    pub fn from_config(config: &Config) -> Result<Self, HttpClientError> {
        let client = HttpClientBuilder::from_config(config).build()?;
        Ok(Self::new(client, config))
    }

    pub fn adapter_for(&self, protocol: BackendProtocol) -> &Adapter {
        match protocol {
            BackendProtocol::OpenAI => &self.openai,
            BackendProtocol::OpenAICompatible => &self.compatible,
        }
    }
}

#[async_trait::async_trait]
impl CompletionBackend for AdapterRouter {
    async fn complete(
        &self,
        model: &ModelConfig,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, BackendError> {
        self.adapter_for(model.backend_protocol).complete(model, &request).await
    }
}
