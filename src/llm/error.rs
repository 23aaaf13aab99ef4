//! Typed errors for LLM operations
//!
//! Lets callers tell an auth rejection from a rate limit or a dropped
//! connection without string matching.

use thiserror::Error;

/// LLM operation errors with typed variants
#[derive(Debug, Error)]
pub enum LlmError {
    /// API key rejected (HTTP 401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Rate limit exceeded (HTTP 429)
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Malformed request (HTTP 400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Server-side error (HTTP 5xx)
    #[error("Service error: {0}")]
    ServiceError(String),

    /// Connection refused, timeout, stalled stream
    #[error("Network error: {0}")]
    Network(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl LlmError {
    /// Whether submitting the same message again could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited(_) | LlmError::ServiceError(_) | LlmError::Network(_)
        )
    }

    /// Whether the user has to supply a different credential
    pub fn needs_new_credential(&self) -> bool {
        matches!(self, LlmError::Unauthorized(_))
    }

    /// Convert HTTP status code and error text into typed LlmError
    pub fn from_http_status(status: reqwest::StatusCode, error_text: String) -> Self {
        match status.as_u16() {
            401 | 403 => LlmError::Unauthorized(error_text),
            429 => LlmError::RateLimited(error_text),
            400 => LlmError::BadRequest(error_text),
            500..=599 => LlmError::ServiceError(error_text),
            _ => LlmError::Other(anyhow::anyhow!("HTTP {}: {}", status, error_text)),
        }
    }

    /// Convert network/connection errors into typed LlmError
    pub fn from_network_error(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Network(format!("Request timeout: {}", e))
        } else if e.is_connect() {
            LlmError::Network(format!("Connection failed: {}", e))
        } else if let Some(status) = e.status() {
            let error_text = e.to_string();
            Self::from_http_status(status, error_text)
        } else {
            LlmError::Other(e.into())
        }
    }
}
