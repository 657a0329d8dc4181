//! HTTP request handlers for the Classroom Controller.
//!
//! Request bodies are deserialized by hand so a bad body returns the JSON
//! error shape with 400 instead of axum's plain-text 422.

pub mod activity;
pub mod metrics;
pub mod quiz;
pub mod report;
pub mod rooms;
pub mod token;
pub mod ws;

pub use activity::log_activity;
pub use metrics::metrics_handler;
pub use quiz::{
    add_topic, close_topic, feed_transcript, generate_topic, submit_answer, trigger_next,
    trigger_topic, voice_status,
};
pub use report::get_report;
pub use rooms::{create_room, end_room, get_room, join_room, start_room};
pub use token::issue_token;
pub use ws::connect;

use crate::actors::RoomSnapshot;
use crate::errors::CcError;
use common::jwt::RoomTokenClaims;
use common::types::{ParticipantRole, RoomCode};
use serde::de::DeserializeOwned;

/// Parse a room code from a path segment. Malformed codes cannot name a
/// room, so they are reported as not found.
pub(crate) fn parse_code(raw: &str) -> Result<RoomCode, CcError> {
    raw.parse().map_err(|_| CcError::RoomNotFound)
}

pub(crate) fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, CcError> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::debug!(target: "cc.handlers", error = %e, "Invalid request body");
        CcError::MalformedMessage("Invalid request body".to_string())
    })
}

/// The credential must be scoped to `code`.
pub(crate) fn authorize_room(claims: &RoomTokenClaims, code: &RoomCode) -> Result<(), CcError> {
    if claims.video.room == code.as_str() && claims.video.room_join {
        Ok(())
    } else {
        Err(CcError::PermissionDenied(
            "Credential is not valid for this room".to_string(),
        ))
    }
}

/// The credential must belong to the presenter who created the room.
pub(crate) fn authorize_presenter(
    claims: &RoomTokenClaims,
    snapshot: &RoomSnapshot,
) -> Result<(), CcError> {
    authorize_room(claims, &snapshot.code)?;
    if claims.role == ParticipantRole::Presenter && claims.sub == snapshot.presenter {
        Ok(())
    } else {
        tracing::warn!(
            target: "cc.handlers",
            room = %snapshot.code,
            role = claims.role.as_str(),
            "Rejected presenter operation"
        );
        Err(CcError::PermissionDenied(
            "Only the room's presenter can do this".to_string(),
        ))
    }
}
