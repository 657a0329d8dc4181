//! Classroom Controller error types.
//!
//! Every error maps to an HTTP status via the `IntoResponse` impl. Messages
//! returned to clients are generic for internal failures; the detail is
//! logged server-side.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::ClassroomError;
use serde::Serialize;
use thiserror::Error;

/// Classroom Controller error type.
///
/// Maps to HTTP status codes:
/// - `MissingParameter`, `MalformedMessage`: 400
/// - `InvalidToken`: 401
/// - `PermissionDenied`: 403
/// - `RoomNotFound`, `TopicNotFound`: 404
/// - `InvalidTransition`: 409
/// - `Generation`, `Transport`: 502
/// - `RoomLimitReached`, `Draining`: 503
/// - `Config`, `BackendMisconfigured`, `Database`, `Internal`: 500
#[derive(Debug, Error)]
pub enum CcError {
    /// Startup configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required request parameter is missing or empty.
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    /// Server-held credentials needed to serve the request are absent.
    #[error("Backend misconfigured: {0}")]
    BackendMisconfigured(String),

    /// No live room with this code.
    #[error("Room not found")]
    RoomNotFound,

    /// No topic with this id in the room.
    #[error("Topic not found")]
    TopicNotFound,

    /// Requested state change is not allowed from the current state.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Publish or log-append failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Payload could not be parsed.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Caller lacks the role or capability for this operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Room credential failed validation.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Durable log store failure.
    #[error("Database error: {0}")]
    Database(String),

    /// Question generator failed or returned unusable output.
    #[error("Generation failed: {0}")]
    Generation(String),

    /// Directory is at its room limit.
    #[error("Room limit reached")]
    RoomLimitReached,

    /// Directory is shutting down.
    #[error("Controller is draining")]
    Draining,

    /// Internal error (actor channel failure, RNG failure, ...).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CcError {
    /// Returns the machine-readable error code.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            CcError::Config(_) => "CONFIGURATION_ERROR",
            CcError::MissingParameter(_) => "MISSING_PARAMETER",
            CcError::BackendMisconfigured(_) => "BACKEND_MISCONFIGURED",
            CcError::RoomNotFound => "ROOM_NOT_FOUND",
            CcError::TopicNotFound => "TOPIC_NOT_FOUND",
            CcError::InvalidTransition(_) => "INVALID_TRANSITION",
            CcError::Transport(_) => "TRANSPORT_FAILURE",
            CcError::MalformedMessage(_) => "MALFORMED_MESSAGE",
            CcError::PermissionDenied(_) => "PERMISSION_DENIED",
            CcError::InvalidToken(_) => "INVALID_TOKEN",
            CcError::Database(_) => "DATABASE_ERROR",
            CcError::Generation(_) => "GENERATION_FAILED",
            CcError::RoomLimitReached => "ROOM_LIMIT_REACHED",
            CcError::Draining => "DRAINING",
            CcError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns the HTTP status code for this error (for metrics recording).
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            CcError::MissingParameter(_) | CcError::MalformedMessage(_) => 400,
            CcError::InvalidToken(_) => 401,
            CcError::PermissionDenied(_) => 403,
            CcError::RoomNotFound | CcError::TopicNotFound => 404,
            CcError::InvalidTransition(_) => 409,
            CcError::Transport(_) | CcError::Generation(_) => 502,
            CcError::RoomLimitReached | CcError::Draining => 503,
            CcError::Config(_)
            | CcError::BackendMisconfigured(_)
            | CcError::Database(_)
            | CcError::Internal(_) => 500,
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            CcError::Config(_) | CcError::BackendMisconfigured(_) => {
                "Server misconfigured".to_string()
            }
            CcError::Database(_) | CcError::Internal(_) | CcError::Transport(_) => {
                "An internal error occurred".to_string()
            }
            CcError::RoomNotFound => "Room not found".to_string(),
            CcError::TopicNotFound => "Topic not found".to_string(),
            CcError::InvalidToken(_) => "Invalid or expired room credential".to_string(),
            CcError::Generation(_) => "AI Generation Failed".to_string(),
            CcError::RoomLimitReached => "Too many live rooms, please try again later".to_string(),
            CcError::Draining => "Server is shutting down".to_string(),
            CcError::MissingParameter(msg)
            | CcError::InvalidTransition(msg)
            | CcError::MalformedMessage(msg)
            | CcError::PermissionDenied(msg) => msg.clone(),
        }
    }
}

impl From<ClassroomError> for CcError {
    fn from(err: ClassroomError) -> Self {
        CcError::MissingParameter(err.to_string())
    }
}

impl From<sqlx::Error> for CcError {
    fn from(err: sqlx::Error) -> Self {
        CcError::Database(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for CcError {
    fn into_response(self) -> Response {
        match &self {
            CcError::Database(err) => {
                tracing::error!(target: "cc.database", error = %err, "Database operation failed");
            }
            CcError::Config(err) | CcError::BackendMisconfigured(err) => {
                tracing::error!(target: "cc.config", error = %err, "Request hit missing server configuration");
            }
            CcError::Internal(err) | CcError::Transport(err) => {
                tracing::error!(target: "cc.internal", error = %err, "Internal error");
            }
            CcError::Generation(err) => {
                tracing::warn!(target: "cc.generator", error = %err, "Question generation failed");
            }
            _ => {}
        }

        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.client_message(),
            },
        };

        (status, Json(body)).into_response()
    }
}
