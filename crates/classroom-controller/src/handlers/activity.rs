//! `POST /api/v1/activity`
//!
//! Direct append of one focus transition to the durable log, for clients
//! that report attention over HTTP instead of the room WebSocket. Rows land
//! in the log without passing through a Focus Tracker, so the scorer's
//! duplicate handling is what keeps repeated posts from skewing reports.

use super::parse_body;
use crate::errors::CcError;
use crate::observability::metrics;
use crate::routes::AppState;
use crate::store::{append_focus_with_retry, FocusEvent};
use axum::{body::Bytes, extract::State, http::StatusCode};
use chrono::Utc;
use common::types::{FocusKind, RoomCode};
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug, Deserialize)]
pub struct ActivityRequest {
    pub session_code: String,
    pub student_name: String,
    pub event_type: String,
}

/// Handler for POST /api/v1/activity
///
/// - 201 Created: row appended
/// - 400 Bad Request: blank name, malformed code, or unknown event type
/// - 404 Not Found: no such room
/// - 500 Internal Server Error: append failed after retries
#[instrument(skip_all, name = "cc.activity.log")]
pub async fn log_activity(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<StatusCode, CcError> {
    let request: ActivityRequest = parse_body(&body)?;

    let code: RoomCode = request.session_code.parse()?;
    let kind: FocusKind = request.event_type.parse()?;
    let participant = request.student_name.trim();
    if participant.is_empty() {
        return Err(CcError::MissingParameter(
            "student_name is required".to_string(),
        ));
    }

    // Rejects codes that never named a room; Ended rooms still accept rows
    // until they are evicted.
    state.directory.get_room(code.clone()).await?;

    let event = FocusEvent {
        participant: participant.to_string(),
        kind,
        timestamp: Utc::now(),
    };
    metrics::record_focus_event(kind.as_str(), "direct");

    append_focus_with_retry(&state.log, state.retry, &code, &event).await?;
    Ok(StatusCode::CREATED)
}
