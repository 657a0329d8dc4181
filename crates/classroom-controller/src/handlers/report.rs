//! `GET /api/v1/rooms/{code}/report`
//!
//! End-of-class engagement report, recomputed from the durable log on every
//! request. The live bus view is never consulted.

use super::{authorize_presenter, authorize_room, parse_code};
use crate::engagement::{score, summarize, SessionReport};
use crate::errors::CcError;
use crate::routes::AppState;
use axum::{
    extract::{Path, State},
    Extension, Json,
};
use common::jwt::RoomTokenClaims;
use common::types::ParticipantRole;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Handler for GET /api/v1/rooms/{code}/report
///
/// Works for Live and Ended rooms, and keeps working after an Ended room is
/// evicted from the directory because only the log is read.
///
/// - 200 OK: session report
/// - 403 Forbidden: caller is not the presenter of this room
#[instrument(skip_all, name = "cc.report.get")]
pub async fn get_report(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<RoomTokenClaims>,
    Path(code): Path<String>,
) -> Result<Json<SessionReport>, CcError> {
    let code = parse_code(&code)?;
    match state.directory.get_room(code.clone()).await {
        Ok(room) => authorize_presenter(&claims, &room.snapshot().await?)?,
        Err(CcError::RoomNotFound) => {
            // Evicted: the presenter's name is gone with the room, so only the
            // credential's scope and role can be checked.
            debug!(target: "cc.report", room = %code, "Room evicted, checking role only");
            authorize_room(&claims, &code)?;
            if claims.role != ParticipantRole::Presenter {
                return Err(CcError::PermissionDenied(
                    "Only the presenter can view the report".to_string(),
                ));
            }
        }
        Err(e) => return Err(e),
    }

    let events = state.log.focus_events(&code).await?;
    let answers = state.log.answers(&code).await?;

    let records = score(&events, state.config.distraction_penalty);
    Ok(Json(summarize(&code, &records, &answers)))
}
