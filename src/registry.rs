//! # Model Registry
//!
//! Maps caller-facing logical model names to backend configurations. The
//! registry is loaded once at startup from a YAML file and is read-only
//! afterwards, so it is shared as a plain `Arc<ModelRegistry>`.
//!
//! ```yaml
//! models:
//!   llama-7b:
//!     display_name: Llama 2 7B
//!     description: Fast, efficient 7B parameter model
//!     backend_type: openai_compatible
//!     base_url: ${LLAMA_API_URL}
//!     model_name: meta-llama/Llama-2-7b-chat-hf
//!     max_tokens: 4096
//!     tier: small
//! defaults:
//!   max_tokens: 512
//!   temperature: 0.7
//!   top_p: 0.95
//! ```

use crate::schemas::ModelInfo;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("model not found: {0}")]
    NotFound(String),
    #[error("failed to read model config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse model config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("model config defines no models")]
    Empty,
}

/// Wire protocol family of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendProtocol {
    #[serde(rename = "openai")]
    OpenAI,
    #[serde(rename = "openai_compatible")]
    OpenAICompatible,
}

impl fmt::Display for BackendProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendProtocol::OpenAI => write!(f, "openai"),
            BackendProtocol::OpenAICompatible => write!(f, "openai_compatible"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Small,
    Medium,
    Large,
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelTier::Small => write!(f, "small"),
            ModelTier::Medium => write!(f, "medium"),
            ModelTier::Large => write!(f, "large"),
        }
    }
}

/// Resolved configuration of one logical model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub logical_name: String,
    pub backend_protocol: BackendProtocol,
    pub base_url: String,
    pub physical_model_name: String,
    pub max_tokens: u32,
    pub tier: ModelTier,
    pub display_name: String,
    pub description: String,
    pub supports_streaming: bool,
    /// Per-model request timeout; the worker default applies when unset
    pub timeout: Option<Duration>,
}

impl ModelConfig {
    /// Minimal config, mostly for tests and programmatic registries.
    pub fn new(
        logical_name: impl Into<String>,
        backend_protocol: BackendProtocol,
        base_url: impl Into<String>,
        physical_model_name: impl Into<String>,
    ) -> Self {
        let logical_name = logical_name.into();
        Self {
            display_name: logical_name.clone(),
            logical_name,
            backend_protocol,
            base_url: base_url.into(),
            physical_model_name: physical_model_name.into(),
            max_tokens: 4096,
            tier: ModelTier::Medium,
            description: String::new(),
            supports_streaming: false,
            timeout: None,
        }
    }

    pub fn info(&self) -> ModelInfo {
        ModelInfo {
            id: self.logical_name.clone(),
            display_name: self.display_name.clone(),
            description: self.description.clone(),
            tier: self.tier.to_string(),
            max_tokens: self.max_tokens,
            supports_streaming: self.supports_streaming,
        }
    }
}

/// Generation parameters applied when a request leaves them unset.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct GenerationDefaults {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.7,
            top_p: 0.95,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    models: HashMap<String, ModelEntry>,
    #[serde(default)]
    defaults: GenerationDefaults,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    #[serde(default = "default_protocol")]
    backend_type: BackendProtocol,
    #[serde(default)]
    base_url: String,
    model_name: String,
    max_tokens: u32,
    tier: ModelTier,
    display_name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    supports_streaming: bool,
    /// Seconds
    timeout: Option<f64>,
}

fn default_protocol() -> BackendProtocol {
    BackendProtocol::OpenAICompatible
}

/// Expand `${VAR}` references from the process environment. Unset variables
/// expand to an empty string.
fn expand_env(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                out.push_str(&std::env::var(&after[..end]).unwrap_or_default());
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// # Model Registry
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: HashMap<String, ModelConfig>,
    defaults: GenerationDefaults,
}

impl ModelRegistry {
    pub fn new(models: impl IntoIterator<Item = ModelConfig>, defaults: GenerationDefaults) -> Self {
        Self {
            models: models
                .into_iter()
                .map(|model| (model.logical_name.clone(), model))
                .collect(),
            defaults,
        }
    }

    /// Load the registry from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let registry = Self::from_yaml_str(&raw)?;
        info!(
            path = %path.display(),
            models = registry.len(),
            "Loaded model registry"
        );
        Ok(registry)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, RegistryError> {
        let file: RegistryFile = serde_yaml::from_str(raw)?;
        if file.models.is_empty() {
            return Err(RegistryError::Empty);
        }

        let models = file.models.into_iter().map(|(logical_name, entry)| {
            let base_url = expand_env(&entry.base_url).trim_end_matches('/').to_string();
            if base_url.is_empty() && entry.backend_type == BackendProtocol::OpenAICompatible {
                warn!(model = %logical_name, "Model has no base_url; requests to it will fail");
            } else if !base_url.is_empty() && url::Url::parse(&base_url).is_err() {
                warn!(model = %logical_name, base_url = %base_url, "Model base_url is not a valid URL");
            }
            ModelConfig {
                display_name: entry.display_name.unwrap_or_else(|| logical_name.clone()),
                logical_name,
                backend_protocol: entry.backend_type,
                base_url,
                physical_model_name: entry.model_name,
                max_tokens: entry.max_tokens,
                tier: entry.tier,
                description: entry.description,
                supports_streaming: entry.supports_streaming,
                timeout: entry
                    .timeout
                    .filter(|secs| *secs > 0.0)
                    .and_then(|secs| Duration::try_from_secs_f64(secs).ok()),
            }
        });

        Ok(Self::new(models, file.defaults))
    }

    /// Resolve a logical model name.
    pub fn resolve(&self, logical_name: &str) -> Result<&ModelConfig, RegistryError> {
        self.models
            .get(logical_name)
            .ok_or_else(|| RegistryError::NotFound(logical_name.to_string()))
    }

    pub fn contains(&self, logical_name: &str) -> bool {
        self.models.contains_key(logical_name)
    }

    /// All models, sorted by logical name.
    pub fn list(&self) -> Vec<&ModelConfig> {
        let mut models: Vec<_> = self.models.values().collect();
        models.sort_by(|a, b| a.logical_name.cmp(&b.logical_name));
        models
    }

    pub fn defaults(&self) -> GenerationDefaults {
        self.defaults
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
