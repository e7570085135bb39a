//! # Server Module
//!
//! Router, handlers, shared state and the API key middleware.

pub mod auth;
pub mod handlers;
pub mod state;

pub use state::AppState;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::{self, TraceLayer},
};
use tracing::Level;

/// Create router with all routes and middleware
pub fn create_router(state: AppState) -> Router {
    // Routes that require a bearer key when keys are configured
    let api = Router::new()
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/batch/generate", post(handlers::batch_generate))
        .route("/v1/batch/{job_id}", get(handlers::batch_status))
        .route("/v1/batch/{job_id}/results", get(handlers::batch_results))
        .route("/v1/batch/{job_id}/cancel", post(handlers::batch_cancel))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_api_key));

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health_check))
        .route("/v1/models", get(handlers::list_models))
        .merge(api)
        .layer(
            ServiceBuilder::new()
                .layer(CompressionLayer::new())
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                        .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
