//! # Application State
//!
//! Shared state passed to all HTTP handlers: configuration, the model
//! registry, the backend used by the synchronous path, and the batch manager.

use crate::{
    adapters::CompletionBackend,
    config::Config,
    manager::BatchJobManager,
    queue::TaskQueue,
    registry::ModelRegistry,
    store::JobStore,
};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    registry: Arc<ModelRegistry>,
    backend: Arc<dyn CompletionBackend>,
    manager: BatchJobManager,
    api_keys: Arc<Vec<String>>,
}

impl AppState {
    pub fn new(
        config: Config,
        registry: Arc<ModelRegistry>,
        backend: Arc<dyn CompletionBackend>,
        store: Arc<dyn JobStore>,
        queue: Arc<dyn TaskQueue>,
    ) -> Self {
        let api_keys = Arc::new(config.api_key_set());
        let manager = BatchJobManager::new(store, queue, Arc::clone(&registry));
        Self {
            config: Arc::new(config),
            registry,
            backend,
            manager,
            api_keys,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn backend(&self) -> &dyn CompletionBackend {
        self.backend.as_ref()
    }

    pub fn manager(&self) -> &BatchJobManager {
        &self.manager
    }

    /// Accepted bearer keys. Empty means authentication is disabled.
    pub fn api_keys(&self) -> &[String] {
        &self.api_keys
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.request_timeout_secs)
    }
}
