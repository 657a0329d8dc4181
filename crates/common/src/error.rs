//! Common error types for classroom components.

use thiserror::Error;

/// Errors produced while parsing shared classroom types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassroomError {
    /// Room code is not six characters from `[0-9A-Z]`.
    #[error("Invalid room code: {0}")]
    InvalidRoomCode(String),

    /// Role string did not name a presenter or a viewer.
    #[error("Unknown participant role: {0}")]
    UnknownRole(String),

    /// Focus event kind was not `FOCUS_LOST` or `FOCUS_GAINED`.
    #[error("Unknown focus event kind: {0}")]
    UnknownFocusKind(String),
}

/// Result type alias using `ClassroomError`
pub type Result<T> = std::result::Result<T, ClassroomError>;
