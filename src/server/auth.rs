//! Bearer key authentication for the API routes.

use super::AppState;
use crate::error::GatewayError;
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use tracing::warn;

/// Show only the last four characters of a key.
pub fn mask_api_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Reject requests without a configured bearer key. With no keys configured
/// every request passes.
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    if state.api_keys().is_empty() {
        return Ok(next.run(request).await);
    }

    match bearer_token(&request) {
        Some(token) if state.api_keys().iter().any(|key| key == token) => {}
        Some(token) => {
            warn!(api_key = %mask_api_key(token), path = %request.uri().path(), "Rejected invalid API key");
            return Err(GatewayError::Unauthorized("Invalid API key".to_string()));
        }
        None => {
            return Err(GatewayError::Unauthorized(
                "Missing Authorization: Bearer <key> header".to_string(),
            ))
        }
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_api_key() {
        assert_eq!(mask_api_key("sk-1234567890abcd"), "****abcd");
        assert_eq!(mask_api_key("abc"), "****");
        assert_eq!(mask_api_key(""), "****");
    }
}
