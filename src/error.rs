//! Routing error taxonomy and its HTTP mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

/// Errors surfaced by the request-serving path.
#[derive(Debug, Clone, Error)]
pub enum RouteError {
    #[error("no healthy backend available")]
    NoHealthyBackend,

    #[error("backend not found or unhealthy: {0}")]
    BackendNotFound(String),

    #[error("backend '{backend}' unreachable: {message}")]
    Unreachable { backend: String, message: String },

    #[error("backend '{backend}' timed out")]
    Timeout { backend: String },

    #[error("backend '{backend}' rejected the request ({status}): {message}")]
    Rejected {
        backend: String,
        status: u16,
        message: String,
    },

    #[error("backend '{backend}' returned an invalid response: {message}")]
    InvalidResponse { backend: String, message: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl RouteError {
    /// Classify a transport-level reqwest failure against `backend`.
    pub fn from_transport(backend: &str, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            RouteError::Timeout {
                backend: backend.to_string(),
            }
        } else {
            RouteError::Unreachable {
                backend: backend.to_string(),
                message: err.to_string(),
            }
        }
    }

    /// Whether one re-selection excluding the failed backend is allowed.
    pub fn allows_reselection(&self) -> bool {
        matches!(self, RouteError::Unreachable { .. } | RouteError::Timeout { .. })
    }

    pub fn code(&self) -> &'static str {
        match self {
            RouteError::NoHealthyBackend => "NO_HEALTHY_BACKEND",
            RouteError::BackendNotFound(_) => "BACKEND_NOT_FOUND",
            RouteError::Unreachable { .. } => "BACKEND_UNREACHABLE",
            RouteError::Timeout { .. } => "BACKEND_TIMEOUT",
            RouteError::Rejected { .. } => "BACKEND_REJECTED",
            RouteError::InvalidResponse { .. } => "BACKEND_INVALID_RESPONSE",
            RouteError::InvalidRequest(_) => "INVALID_REQUEST",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RouteError::NoHealthyBackend => StatusCode::SERVICE_UNAVAILABLE,
            RouteError::BackendNotFound(_) => StatusCode::NOT_FOUND,
            RouteError::Unreachable { .. } => StatusCode::BAD_GATEWAY,
            RouteError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            RouteError::Rejected { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            RouteError::InvalidResponse { .. } => StatusCode::BAD_GATEWAY,
            RouteError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// JSON error body shared by HTTP responses and SSE error frames.
    pub fn body(&self) -> Value {
        let message = match self {
            // Pass the backend's own message through untouched
            RouteError::Rejected { message, .. } => message.clone(),
            other => other.to_string(),
        };
        json!({
            "error": {
                "code": self.code(),
                "message": message,
            }
        })
    }
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

pub type RouteResult<T> = Result<T, RouteError>;
