//! Shared ingress types and utilities

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use warpgate_observability::RequestOutcome;

/// Correlation id attached to every log line of a request (`REQ-000001`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    /// Next id from the process-wide counter
    pub fn generate() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let count = COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
        Self::from_sequence(count)
    }

    pub fn from_sequence(sequence: u64) -> Self {
        Self(format!("REQ-{:06}", sequence))
    }

    /// Get the string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ingress error types
#[derive(Debug, Error)]
pub enum IngressError {
    /// Invalid request format
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Serialization error
    #[error("Invalid request: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No identity could be acquired
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Upstream answered 429
    #[error("Rate limited")]
    RateLimited,

    /// Upstream answered another non-success status
    #[error("Upstream error ({0})")]
    UpstreamError(u16),

    /// Response could not be streamed incrementally
    #[error("Streaming unsupported")]
    StreamUnsupported,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IngressError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            IngressError::InvalidRequest(_) | IngressError::Serialization(_) => {
                StatusCode::BAD_REQUEST
            }
            IngressError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            IngressError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            IngressError::UpstreamError(status) => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            IngressError::StreamUnsupported | IngressError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Outcome label recorded in metrics
    pub fn outcome(&self) -> RequestOutcome {
        match self {
            IngressError::InvalidRequest(_) | IngressError::Serialization(_) => {
                RequestOutcome::BadRequest
            }
            IngressError::ServiceUnavailable(_) => RequestOutcome::ServiceUnavailable,
            IngressError::RateLimited => RequestOutcome::RateLimited,
            IngressError::UpstreamError(_) => RequestOutcome::UpstreamError,
            IngressError::StreamUnsupported | IngressError::Internal(_) => {
                RequestOutcome::InternalError
            }
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            IngressError::InvalidRequest(_) | IngressError::Serialization(_) => {
                "invalid_request_error"
            }
            IngressError::ServiceUnavailable(_) => "overloaded_error",
            IngressError::RateLimited => "rate_limit_error",
            IngressError::UpstreamError(_) => "upstream_error",
            IngressError::StreamUnsupported | IngressError::Internal(_) => "api_error",
        }
    }
}

impl From<warpgate_core::Error> for IngressError {
    fn from(err: warpgate_core::Error) -> Self {
        IngressError::InvalidRequest(err.to_string())
    }
}

impl axum::response::IntoResponse for IngressError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let message = match &self {
            IngressError::InvalidRequest(msg) => msg.clone(),
            other => other.to_string(),
        };

        let body = serde_json::json!({
            "error": {
                "message": message,
                "type": self.error_type(),
                "code": status.as_u16(),
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Ingress result type
pub type IngressResult<T> = Result<T, IngressError>;
