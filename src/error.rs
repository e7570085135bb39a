//! # Error Types
//!
//! `GatewayError` is what HTTP handlers and the batch manager return; it
//! renders as an OpenAI-style error body. `BackendError` is the adapter
//! failure classification that drives the worker retry policy.

#[cfg(feature = "server")]
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use crate::{queue::QueueError, registry::RegistryError, store::StoreError};
#[cfg(feature = "server")]
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Classified failure of a single backend call.
///
/// Every adapter failure lands in exactly one of these buckets. The worker
/// decides whether to retry purely from the variant.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    #[error("backend timed out: {0}")]
    Timeout(String),
    #[error("backend rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("unknown backend error: {0}")]
    Unknown(String),
}

impl BackendError {
    /// Short machine-readable kind, used in logs and task records.
    pub fn kind(&self) -> &'static str {
        match self {
            BackendError::Timeout(_) => "timeout",
            BackendError::RateLimited { .. } => "rate_limited",
            BackendError::InvalidRequest(_) => "invalid_request",
            BackendError::BackendUnavailable(_) => "backend_unavailable",
            BackendError::Unknown(_) => "unknown",
        }
    }

    /// `InvalidRequest` is the only terminal classification.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, BackendError::InvalidRequest(_))
    }

    /// Delay requested by the backend, if it sent one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            BackendError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    /// Transport-level reqwest failures. HTTP status codes are classified
    /// separately by the adapters, which see the response before this.
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout(format!("request timed out: {}", err))
        } else if err.is_connect() {
            BackendError::BackendUnavailable(format!("connection failed: {}", err))
        } else if err.is_builder() {
            BackendError::InvalidRequest(format!("could not build request: {}", err))
        } else if err.is_decode() || err.is_body() {
            BackendError::Unknown(format!("could not read response: {}", err))
        } else {
            BackendError::BackendUnavailable(format!("HTTP client error: {}", err))
        }
    }
}

/// HTTP-facing error for the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Bad Request: {0}")]
    BadRequest(String),
    #[error("Unknown model: {0}")]
    ModelNotFound(String),
    #[error("Job not found: {0}")]
    JobNotFound(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
    /// `job_id` is set when a job was already recorded (as failed) before
    /// its tasks could be queued.
    #[error("Queue unavailable: {message}")]
    QueueUnavailable { message: String, job_id: Option<String> },
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    fn error_type(&self) -> &'static str {
        match self {
            GatewayError::BadRequest(_) => "invalid_request_error",
            GatewayError::ModelNotFound(_) => "model_not_found",
            GatewayError::JobNotFound(_) => "job_not_found",
            GatewayError::Unauthorized(_) => "authentication_error",
            GatewayError::Backend(_) => "backend_error",
            GatewayError::QueueUnavailable { .. } => "queue_unavailable",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    #[cfg(feature = "server")]
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::BadRequest(_) | GatewayError::ModelNotFound(_) => StatusCode::BAD_REQUEST,
            GatewayError::JobNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Backend(err) => match err {
                BackendError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                BackendError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
                BackendError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                BackendError::BackendUnavailable(_) | BackendError::Unknown(_) => StatusCode::BAD_GATEWAY,
            },
            GatewayError::QueueUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(feature = "server")]
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = match &self {
            GatewayError::Backend(err) => Some(err.kind()),
            _ => None,
        };

        let mut error = json!({
            "message": self.to_string(),
            "type": self.error_type(),
            "code": code
        });
        if let GatewayError::QueueUnavailable { job_id: Some(job_id), .. } = &self {
            error["job_id"] = json!(job_id);
        }
        let body = Json(json!({ "error": error }));

        if status == StatusCode::UNAUTHORIZED {
            return (status, [(header::WWW_AUTHENTICATE, "Bearer")], body).into_response();
        }

        (status, body).into_response()
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Internal(format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::Internal(format!("I/O error: {}", err))
    }
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::JobNotFound(job_id) => GatewayError::JobNotFound(job_id),
            StoreError::DuplicateTask(task_id) => {
                GatewayError::BadRequest(format!("duplicate task id: {}", task_id))
            }
            other => GatewayError::Internal(other.to_string()),
        }
    }
}

impl From<RegistryError> for GatewayError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(model) => GatewayError::ModelNotFound(model),
            other => GatewayError::Internal(other.to_string()),
        }
    }
}

impl From<QueueError> for GatewayError {
    fn from(err: QueueError) -> Self {
        GatewayError::QueueUnavailable {
            message: err.to_string(),
            job_id: None,
        }
    }
}
