//! # Nexus Gateway - OpenAI-compatible LLM gateway with a batch pipeline
//!
//! Routes chat completion requests for logical model names to the configured
//! backend (OpenAI or any OpenAI-compatible server) and runs large prompt
//! batches asynchronously.
//!
//! ## Batch pipeline
//!
//! ```text
//!  POST /v1/batch/generate
//!        │
//!  BatchJobManager ──create──▶ JobStore ◀──finish_task── Worker ──▶ CompletionBackend
//!        │                                                  ▲
//!        └──────enqueue──────▶ TaskQueue ──dequeue/lease────┘
//! ```
//!
//! The job store is the source of truth; the queue only carries
//! `(job_id, task_id)` references with at-least-once delivery. Each task ends
//! in exactly one terminal outcome and each job reaches exactly one terminal
//! status, decided by the worker that records its last task.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nexus_gateway::{
//!     create_router, AdapterRouter, AppState, CompletionBackend, Config, InMemoryJobStore,
//!     InMemoryTaskQueue, JobStore, ModelRegistry, TaskQueue, WorkerPool,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::for_test();
//!     let registry = Arc::new(ModelRegistry::load(&config.models_config)?);
//!     let backend: Arc<dyn CompletionBackend> = Arc::new(AdapterRouter::from_config(&config)?);
//!     let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
//!     let queue: Arc<dyn TaskQueue> = Arc::new(InMemoryTaskQueue::new());
//!
//!     let pool = WorkerPool::start(
//!         config.worker_config(),
//!         store.clone(),
//!         queue.clone(),
//!         registry.clone(),
//!         backend.clone(),
//!     );
//!     let app = create_router(AppState::new(config.clone(), registry, backend, store, queue));
//!
//!     let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
//!     axum::serve(listener, app).await?;
//!     pool.shutdown(config.shutdown_timeout()).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`] - CLI/environment configuration
//! - [`registry`] - logical model names to backend settings
//! - [`adapters`] - backend protocol adapters and failure classification
//! - [`store`] - job and task records with atomic counters
//! - [`queue`] - leased task queue
//! - [`manager`] - batch submission and polling
//! - [`worker`] - retrying worker pool
//! - [`server`] - HTTP routes

// Core infrastructure
pub mod config;
pub mod core;
pub mod error;
pub mod graceful_shutdown;
pub mod schemas;

// Domain modules
pub mod adapters;
pub mod manager;
pub mod queue;
pub mod registry;
pub mod store;
pub mod worker;

#[cfg(feature = "server")]
pub mod server;

// Re-export commonly used types for convenience
pub use adapters::{AdapterRouter, CompletionBackend, CompletionRequest, CompletionResponse};
pub use config::Config;
pub use core::http_client::{HttpClientBuilder, HttpClientConfig};
pub use error::{BackendError, GatewayError};
pub use manager::BatchJobManager;
pub use queue::{InMemoryTaskQueue, Lease, QueueError, TaskQueue};
pub use registry::{ModelConfig, ModelRegistry};
pub use schemas::{BatchGenerationRequest, ChatCompletionRequest, Message};
pub use store::{InMemoryJobStore, Job, JobStatus, JobStore, Task, TaskStatus};
pub use worker::{RetryPolicy, WorkerConfig, WorkerPool};

#[cfg(feature = "server")]
pub use server::{create_router, AppState};

/// The result type used throughout the library
pub type Result<T> = std::result::Result<T, GatewayError>;
