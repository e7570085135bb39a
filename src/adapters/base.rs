//! # Base Adapter Functionality
//!
//! The normalized completion types, the `CompletionBackend` capability, and
//! the chat-completions wire exchange shared by both protocol variants.

use crate::{
    error::BackendError,
    registry::ModelConfig,
    schemas::{Message, Usage},
};
use reqwest::{
    header::{HeaderMap, RETRY_AFTER},
    Client, StatusCode,
};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

/// Normalized completion request, shared by the sync and batch paths.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub physical_model_name: String,
    pub messages: Vec<Message>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
}

/// Normalized completion reply.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub finish_reason: Option<String>,
}

impl CompletionResponse {
    pub fn usage(&self) -> Usage {
        Usage::new(self.prompt_tokens, self.completion_tokens)
    }
}

/// Anything that can answer a completion request for a resolved model.
///
/// The worker pool and the chat handler only see this trait, so tests can
/// substitute a scripted backend.
#[async_trait::async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(
        &self,
        model: &ModelConfig,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, BackendError>;
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// Longest backend error body quoted back in a task error.
const MAX_ERROR_BODY: usize = 512;

/// Utility functions for adapters
pub struct AdapterUtils;

impl AdapterUtils {
    /// POST a chat-completions request and normalize the reply.
    pub async fn post_chat_completion(
        adapter_name: &'static str,
        client: &Client,
        url: &str,
        headers: HeaderMap,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, BackendError> {
        Self::log_request(adapter_name, &request.physical_model_name, request.messages.len());
        let start_time = Instant::now();

        let body = WireRequest {
            model: &request.physical_model_name,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            top_p: request.top_p,
            stream: false,
        };

        let result = Self::exchange(client, url, headers, &body).await;

        Self::log_response(
            adapter_name,
            &request.physical_model_name,
            result.is_ok(),
            start_time.elapsed().as_millis() as u64,
        );
        result
    }

    async fn exchange(
        client: &Client,
        url: &str,
        headers: HeaderMap,
        body: &WireRequest<'_>,
    ) -> Result<CompletionResponse, BackendError> {
        let resp = client.post(url).headers(headers).json(body).send().await?;

        let status = resp.status();
        let response_headers = resp.headers().clone();
        let bytes = resp.bytes().await?;

        if !status.is_success() {
            let error = Self::classify_status(status, &response_headers, &bytes);
            debug!(status = status.as_u16(), kind = error.kind(), "Backend returned an error status");
            return Err(error);
        }

        let parsed: WireResponse = serde_json::from_slice(&bytes).map_err(|e| {
            BackendError::Unknown(format!(
                "could not decode backend response: {} (body: {})",
                e,
                Self::truncate(&String::from_utf8_lossy(&bytes))
            ))
        })?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::Unknown("backend returned no choices".to_string()))?;
        let usage = parsed.usage.unwrap_or(WireUsage {
            prompt_tokens: 0,
            completion_tokens: 0,
        });

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            finish_reason: choice.finish_reason,
        })
    }

    /// Map a non-success HTTP status onto the failure taxonomy.
    pub fn classify_status(status: StatusCode, headers: &HeaderMap, body: &[u8]) -> BackendError {
        let message = format!("HTTP {}: {}", status.as_u16(), Self::error_message(body));
        match status.as_u16() {
            429 => BackendError::RateLimited {
                message,
                retry_after: Self::parse_retry_after(headers),
            },
            408 | 504 => BackendError::Timeout(message),
            400..=499 => BackendError::InvalidRequest(message),
            500..=599 => BackendError::BackendUnavailable(message),
            _ => BackendError::Unknown(message),
        }
    }

    /// `Retry-After` as delay-seconds or an HTTP date.
    pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
        let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
        if let Ok(secs) = value.parse::<f64>() {
            return Duration::try_from_secs_f64(secs).ok();
        }
        let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
        let delta = at.with_timezone(&chrono::Utc) - chrono::Utc::now();
        Some(delta.to_std().unwrap_or(Duration::ZERO))
    }

    /// Prefer the OpenAI `error.message` field, else the raw body.
    fn error_message(body: &[u8]) -> String {
        let text = String::from_utf8_lossy(body);
        serde_json::from_slice::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.pointer("/error/message").and_then(|m| m.as_str()).map(str::to_string))
            .unwrap_or_else(|| Self::truncate(&text))
    }

    fn truncate(text: &str) -> String {
        if text.len() <= MAX_ERROR_BODY {
            return text.to_string();
        }
        let mut end = MAX_ERROR_BODY;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &text[..end])
    }

    /// Join a base URL and the chat-completions path.
    pub fn chat_completions_url(base_url: &str) -> String {
        format!("{}/chat/completions", base_url.trim_end_matches('/'))
    }

    /// Log adapter request for debugging
    pub fn log_request(adapter_name: &str, model: &str, message_count: usize) {
        debug!(
            adapter = adapter_name,
            model = model,
            message_count = message_count,
            "Processing chat completion request"
        );
    }

    /// Log adapter response for debugging
    pub fn log_response(adapter_name: &str, model: &str, success: bool, response_time_ms: u64) {
        debug!(
            adapter = adapter_name,
            model = model,
            success = success,
            response_time_ms = response_time_ms,
            "Completed chat completion request"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_classify_status() {
        let empty = HeaderMap::new();
        assert!(matches!(
            AdapterUtils::classify_status(StatusCode::BAD_REQUEST, &empty, b"bad"),
            BackendError::InvalidRequest(_)
        ));
        assert!(matches!(
            AdapterUtils::classify_status(StatusCode::UNAUTHORIZED, &empty, b""),
            BackendError::InvalidRequest(_)
        ));
        assert!(matches!(
            AdapterUtils::classify_status(StatusCode::SERVICE_UNAVAILABLE, &empty, b""),
            BackendError::BackendUnavailable(_)
        ));
        assert!(matches!(
            AdapterUtils::classify_status(StatusCode::GATEWAY_TIMEOUT, &empty, b""),
            BackendError::Timeout(_)
        ));
        assert!(matches!(
            AdapterUtils::classify_status(StatusCode::TOO_MANY_REQUESTS, &empty, b""),
            BackendError::RateLimited { retry_after: None, .. }
        ));
    }

    #[test]
    fn test_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(AdapterUtils::parse_retry_after(&headers), Some(Duration::from_secs(7)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(AdapterUtils::parse_retry_after(&headers), None);
    }

    #[test]
    fn test_retry_after_past_date_is_zero() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(AdapterUtils::parse_retry_after(&headers), Some(Duration::ZERO));
    }

    #[test]
    fn test_error_message_prefers_openai_shape() {
        let body = br#"{"error": {"message": "context length exceeded", "type": "invalid_request_error"}}"#;
        let err = AdapterUtils::classify_status(StatusCode::BAD_REQUEST, &HeaderMap::new(), body);
        assert_eq!(err, BackendError::InvalidRequest("HTTP 400: context length exceeded".into()));
    }

    #[test]
    fn test_truncate_long_bodies() {
        let long = "x".repeat(2000);
        let truncated = AdapterUtils::truncate(&long);
        assert!(truncated.len() < 600);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn test_chat_completions_url() {
        assert_eq!(
            AdapterUtils::chat_completions_url("http://host:8000/v1/"),
            "http://host:8000/v1/chat/completions"
        );
    }
}
