//! Forward module error types
//!
//! Defines all error types used in the forward module for request handling.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

/// Error types for the forward module
#[derive(Debug, Clone)]
pub enum ForwardError {
    /// Authentication token missing or invalid
    Unauthorized(String),
    /// Access denied (valid token but no permission)
    #[allow(dead_code)]
    Forbidden(String),
    /// Request to upstream provider failed
    RequestFailed(String),
    /// Invalid request format or parameters
    InvalidRequest(String),
    /// Request rejected by rate limiting or quotas
    RateLimited(String),
    /// Request timeout
    Timeout(String),
    /// No credential available to serve the requested vendor/model (§4.10)
    ServiceUnavailable(String),
    /// Internal server error
    Internal(String),
}

impl std::fmt::Display for ForwardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForwardError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ForwardError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ForwardError::RequestFailed(msg) => write!(f, "Request failed: {}", msg),
            ForwardError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            ForwardError::RateLimited(msg) => write!(f, "Rate limited: {}", msg),
            ForwardError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            ForwardError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            ForwardError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ForwardError {}

impl IntoResponse for ForwardError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            ForwardError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, "unauthorized", msg.clone())
            }
            ForwardError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg.clone()),
            ForwardError::RequestFailed(msg) => {
                (StatusCode::BAD_GATEWAY, "request_failed", msg.clone())
            }
            ForwardError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }
            ForwardError::RateLimited(msg) => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                msg.clone(),
            ),
            ForwardError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "timeout", msg.clone()),
            ForwardError::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                msg.clone(),
            ),
            ForwardError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
        };

        // Full context goes to the log; the client only ever sees a short
        // flat message (§7: "user-visible error body is {"error": "<short
        // message>"}").
        crate::logger::error(
            "forward_error",
            &format!(
                "returning error response: status={}, type={}, message={}",
                status.as_u16(),
                error_type,
                message
            ),
        );

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Result type alias for forward operations
pub type ForwardResult<T> = Result<T, ForwardError>;
