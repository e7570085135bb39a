//! # Server Handlers
//!
//! HTTP route handlers. Chat completions go straight to the backend; batch
//! routes delegate to the [`BatchJobManager`](crate::manager::BatchJobManager).

use super::AppState;
use crate::{
    adapters::CompletionRequest,
    error::{BackendError, GatewayError},
    schemas::{
        BatchGenerationRequest, BatchResultsResponse, BatchStatusResponse, BatchSubmissionResponse,
        BatchTaskResult, ChatCompletionRequest, ChatCompletionResponse, Choice, Message, ModelsListResponse,
    },
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json as JsonResponse},
    Json,
};
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Chat completions handler
pub async fn chat_completions(
    State(state): State<AppState>,
    Json(req): Json<ChatCompletionRequest>,
) -> Result<Json<ChatCompletionResponse>, GatewayError> {
    if req.stream.unwrap_or(false) {
        return Err(GatewayError::BadRequest(
            "stream=true is not supported by this gateway".to_string(),
        ));
    }
    if req.messages.is_empty() {
        return Err(GatewayError::BadRequest("messages must not be empty".to_string()));
    }

    let model = state.registry().resolve(&req.model)?;
    let defaults = state.registry().defaults();
    let request = CompletionRequest {
        physical_model_name: model.physical_model_name.clone(),
        messages: req.messages,
        max_tokens: Some(req.max_tokens.unwrap_or(defaults.max_tokens).min(model.max_tokens)),
        temperature: Some(req.temperature.unwrap_or(defaults.temperature)),
        top_p: Some(req.top_p.unwrap_or(defaults.top_p)),
    };
    let deadline = model.timeout.unwrap_or_else(|| state.request_timeout());

    let started = Instant::now();
    let result = match tokio::time::timeout(deadline, state.backend().complete(model, request)).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::Timeout(format!("no response within {:?}", deadline))),
    };
    let latency_ms = started.elapsed().as_millis() as u64;

    let response = match result {
        Ok(response) => response,
        Err(err) => {
            warn!(
                model = %model.logical_name,
                error_kind = err.kind(),
                error = %err,
                latency_ms,
                "Chat completion failed"
            );
            return Err(err.into());
        }
    };

    let usage = response.usage();
    info!(
        model = %model.logical_name,
        backend = %model.backend_protocol,
        latency_ms,
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens,
        metadata = ?req.metadata,
        "Chat completion served"
    );

    Ok(Json(ChatCompletionResponse {
        id: format!("chatcmpl-{}", &Uuid::new_v4().simple().to_string()[..12]),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: model.logical_name.clone(),
        choices: vec![Choice {
            index: 0,
            message: Message::new("assistant", response.content),
            finish_reason: response.finish_reason.or_else(|| Some("stop".to_string())),
        }],
        usage,
    }))
}

/// Submit a batch job. Answers 202 as soon as the tasks are queued.
pub async fn batch_generate(
    State(state): State<AppState>,
    Json(req): Json<BatchGenerationRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let job = state.manager().submit(req).await?;
    Ok((StatusCode::ACCEPTED, Json(BatchSubmissionResponse::from(&job))))
}

pub async fn batch_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<BatchStatusResponse>, GatewayError> {
    let job = state.manager().get_status(&job_id).await?;
    let results = state.manager().get_results(&job_id).await?;
    Ok(Json(BatchStatusResponse::new(
        job,
        results.iter().map(BatchTaskResult::from).collect(),
    )))
}

pub async fn batch_results(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<BatchResultsResponse>, GatewayError> {
    let job = state.manager().get_status(&job_id).await?;
    let results = state.manager().get_results(&job_id).await?;
    Ok(Json(BatchResultsResponse {
        job_id: job.job_id,
        status: job.status,
        results: results.iter().map(BatchTaskResult::from).collect(),
    }))
}

pub async fn batch_cancel(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<BatchStatusResponse>, GatewayError> {
    let job = state.manager().cancel(&job_id).await?;
    let results = state.manager().get_results(&job_id).await?;
    Ok(Json(BatchStatusResponse::new(
        job,
        results.iter().map(BatchTaskResult::from).collect(),
    )))
}

pub async fn list_models(State(state): State<AppState>) -> Json<ModelsListResponse> {
    Json(ModelsListResponse {
        models: state.registry().list().into_iter().map(|model| model.info()).collect(),
    })
}

/// Health check handler
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let health_status = serde_json::json!({
        "status": "healthy",
        "service": state.config().service_name,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    });

    (StatusCode::OK, JsonResponse(health_status))
}

pub async fn root(State(state): State<AppState>) -> impl IntoResponse {
    JsonResponse(serde_json::json!({
        "service": state.config().service_name,
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config().environment,
        "health": "/health",
        "models": "/v1/models"
    }))
}
