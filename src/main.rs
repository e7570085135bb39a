//! # Nexus Gateway server
//!
//! Loads the model registry, starts the batch worker pool and serves the HTTP
//! API until SIGINT/SIGTERM, then drains the pool.

use nexus_gateway::{
    create_router, graceful_shutdown::cancel_on_signal, AdapterRouter, AppState,
    CompletionBackend, Config, InMemoryJobStore, InMemoryTaskQueue, JobStore, ModelRegistry,
    TaskQueue, WorkerPool,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Host part of a backend URL, safe to log.
fn safe_host(base_url: &str) -> String {
    match url::Url::parse(base_url) {
        Ok(url) => format!("{}://{}", url.scheme(), url.host_str().unwrap_or("unknown")),
        Err(_) if base_url.is_empty() => "(default)".to_string(),
        Err(_) => "invalid-url".to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from CLI args and .env file
    let config = Config::parse_args();

    let registry = Arc::new(ModelRegistry::load(&config.models_config)?);
    for model in registry.list() {
        info!(
            model = %model.logical_name,
            backend = %model.backend_protocol,
            physical = %model.physical_model_name,
            url = %safe_host(&model.base_url),
            "Registered model"
        );
    }

    let backend: Arc<dyn CompletionBackend> = Arc::new(AdapterRouter::from_config(&config)?);
    let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
    let queue: Arc<dyn TaskQueue> = Arc::new(InMemoryTaskQueue::new());

    let pool = WorkerPool::start(
        config.worker_config(),
        Arc::clone(&store),
        Arc::clone(&queue),
        Arc::clone(&registry),
        Arc::clone(&backend),
    );

    let state = AppState::new(config.clone(), registry, backend, store, queue);
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!(
        service = %config.service_name,
        environment = %config.environment,
        auth = !config.api_key_set().is_empty(),
        workers = pool.size(),
        "Server starting on http://{}",
        addr
    );

    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    info!("HTTP server stopped; draining batch workers");
    pool.shutdown(config.shutdown_timeout()).await;

    Ok(())
}
