//! Axum-specific error types and mappings.
//!
//! Maps `GatewayError` and `RegistryError` to HTTP status codes and a JSON
//! body of the form `{error, status, type, metadata}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use hubgate_core::{GatewayError, RegistryError};
use serde::Serialize;
use thiserror::Error;

/// Axum-specific error type.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request (invalid input).
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Conflict (resource already exists).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Service unavailable (e.g., verification against a dead server).
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Failure surfaced by the connection layer.
    #[error(transparent)]
    Gateway(GatewayError),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
    status: u16,
    /// Stable error type discriminant for client-side handling
    #[serde(skip_serializing_if = "Option::is_none", rename = "type")]
    error_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<serde_json::Value>,
}

const fn gateway_status(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::ServerNotRegistered(_) => StatusCode::NOT_FOUND,
        GatewayError::Transport(_)
        | GatewayError::ConnectionClosed(_)
        | GatewayError::CapacityExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
        GatewayError::Handshake(_) | GatewayError::Protocol { .. } => StatusCode::BAD_GATEWAY,
        GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        GatewayError::Registry(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl HttpError {
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Gateway(err) => gateway_status(err),
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error_type, metadata) = match &self {
            Self::Gateway(GatewayError::Protocol { code, data, .. }) => (
                Some("PROTOCOL_ERROR"),
                Some(serde_json::json!({ "code": code, "data": data })),
            ),
            Self::Gateway(err) => (Some(err.code()), None),
            _ => (None, None),
        };

        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "request failed");
        }

        let body = ErrorBody {
            error: self.to_string(),
            status: status.as_u16(),
            error_type,
            metadata,
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<GatewayError> for HttpError {
    fn from(err: GatewayError) -> Self {
        Self::Gateway(err)
    }
}

impl From<RegistryError> for HttpError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => Self::NotFound(format!("MCP server not found: {id}")),
            RegistryError::Conflict(msg) => Self::Conflict(msg),
            RegistryError::Internal(msg) => Self::Internal(format!("Storage: {msg}")),
        }
    }
}
