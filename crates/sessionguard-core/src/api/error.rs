use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use super::refresh::RefreshFailure;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized - session expired or credentials rejected")]
    Unauthorized,

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Session could not be renewed: {0}")]
    TokenInvalid(#[source] RefreshFailure),

    #[error("Request rejected ({status}): {message}")]
    Validation { status: u16, message: String },

    #[error("Failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Not authenticated - please log in")]
    NotAuthenticated,
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// `{"error": {"code": 401, "message": "..."}}`
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// FastAPI default: `{"detail": "..."}`
#[derive(Debug, Deserialize)]
struct DetailBody {
    detail: serde_json::Value,
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Human message from the backend's error body, or the raw body.
    fn extract_message(body: &str) -> String {
        if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) {
            if let Some(message) = envelope.error.message {
                return Self::truncate_body(&message);
            }
        }
        if let Ok(detail) = serde_json::from_str::<DetailBody>(body) {
            return match detail.detail {
                serde_json::Value::String(s) => Self::truncate_body(&s),
                other => Self::truncate_body(&other.to_string()),
            };
        }
        Self::truncate_body(body)
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = Self::extract_message(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::Forbidden(message),
            404 => ApiError::NotFound(message),
            429 => ApiError::RateLimited { retry_after: None },
            code @ 400..=499 => ApiError::Validation {
                status: code,
                message,
            },
            code @ 500..=599 => ApiError::ServerError {
                status: code,
                message,
            },
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, message)),
        }
    }

    /// Errors that end the session and should send the user to login.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            ApiError::Unauthorized | ApiError::TokenInvalid(_) | ApiError::NotAuthenticated
        )
    }

    /// No response was received (offline, DNS, timeout).
    pub fn is_offline(&self) -> bool {
        matches!(self, ApiError::Network(e) if !e.is_status() && !e.is_decode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_from_status_classification() {
        assert!(matches!(
            ApiError::from_status(StatusCode::UNAUTHORIZED, ""),
            ApiError::Unauthorized
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::FORBIDDEN, "no"),
            ApiError::Forbidden(_)
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::TOO_MANY_REQUESTS, ""),
            ApiError::RateLimited { .. }
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::BAD_GATEWAY, ""),
            ApiError::ServerError { status: 502, .. }
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::LOCKED, "Account is locked"),
            ApiError::Validation { status: 423, .. }
        ));
    }

    #[test]
    fn test_error_envelope_message() {
        let body = r#"{"error": {"code": 403, "message": "Account is inactive", "timestamp": "2024-01-01T00:00:00"}}"#;
        match ApiError::from_status(StatusCode::FORBIDDEN, body) {
            ApiError::Forbidden(msg) => assert_eq!(msg, "Account is inactive"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_detail_body_message() {
        let body = r#"{"detail": "Current password is incorrect"}"#;
        match ApiError::from_status(StatusCode::BAD_REQUEST, body) {
            ApiError::Validation { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Current password is incorrect");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_long_body_is_truncated() {
        let body = "x".repeat(2000);
        match ApiError::from_status(StatusCode::INTERNAL_SERVER_ERROR, &body) {
            ApiError::ServerError { message, .. } => {
                assert!(message.len() < 600);
                assert!(message.contains("truncated, 2000 total bytes"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let body = "é".repeat(400);
        let truncated = ApiError::truncate_body(&body);
        assert!(truncated.contains("truncated"));
    }

    #[test]
    fn test_auth_failure_classification() {
        assert!(ApiError::Unauthorized.is_auth_failure());
        assert!(ApiError::TokenInvalid(RefreshFailure::MissingRefreshToken).is_auth_failure());
        assert!(!ApiError::Forbidden("x".to_string()).is_auth_failure());
        assert!(!ApiError::RateLimited { retry_after: None }.is_auth_failure());
    }
}
