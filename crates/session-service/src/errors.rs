//! Session service error types.
//!
//! These cover failures outside a room's critical section: joining a room,
//! authenticating a connection, transport setup. Faults inside a routed
//! message (bad payload, missing permission, unknown target) never become
//! errors; handlers log them and drop the message.
//!
//! Internal details are logged server-side but not exposed to clients.

use crate::auth::AuthError;
use crate::transport::TransportError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Session service error type.
///
/// Maps to HTTP status codes at the upgrade boundary:
/// - `Unauthorized`: 401
/// - `OriginRejected`: 403
/// - `RoomClosed`: 409
/// - `Transport`, `Serialization`, `Config`, `Internal`: 500
#[derive(Debug, Error)]
pub enum SessionError {
    /// The room was evicted while the client was joining.
    #[error("Room closed: {0}")]
    RoomClosed(String),

    /// Credential missing or invalid.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Origin header not in the allow list.
    #[error("Origin rejected: {0}")]
    OriginRejected(String),

    /// Transport failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Payload could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            SessionError::Unauthorized(_) => 401,
            SessionError::OriginRejected(_) => 403,
            SessionError::RoomClosed(_) => 409,
            SessionError::Transport(_)
            | SessionError::Serialization(_)
            | SessionError::Config(_)
            | SessionError::Internal(_) => 500,
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            SessionError::RoomClosed(_) => "Room is closing, please reconnect".to_string(),
            SessionError::Unauthorized(_) => "Invalid or expired token".to_string(),
            SessionError::OriginRejected(_) => "Origin not allowed".to_string(),
            SessionError::Transport(_)
            | SessionError::Serialization(_)
            | SessionError::Config(_)
            | SessionError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}

/// Error body returned when an upgrade request is refused.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        let code = match &self {
            SessionError::Unauthorized(_) => "UNAUTHORIZED",
            SessionError::OriginRejected(_) => "FORBIDDEN",
            SessionError::RoomClosed(_) => "ROOM_CLOSED",
            SessionError::Transport(_)
            | SessionError::Serialization(_)
            | SessionError::Config(_)
            | SessionError::Internal(_) => {
                tracing::error!(target: "session.errors", error = %self, "Request failed");
                "INTERNAL_ERROR"
            }
        };

        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse {
            error: ErrorDetail {
                code,
                message: self.client_message(),
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<AuthError> for SessionError {
    fn from(err: AuthError) -> Self {
        SessionError::Unauthorized(err.to_string())
    }
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        SessionError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Serialization(err.to_string())
    }
}
