//! Room lifecycle handlers.
//!
//! - `POST /api/v1/rooms` - Create a room and mint the presenter credential
//! - `GET /api/v1/rooms/{code}` - Room snapshot (plus quiz state while Live),
//!   redacted for anyone but the presenter
//! - `POST /api/v1/rooms/{code}/join` - Mint a viewer credential
//! - `POST /api/v1/rooms/{code}/start` - Setup -> Live (presenter only)
//! - `POST /api/v1/rooms/{code}/end` - End the room (presenter only)

use super::{authorize_presenter, authorize_room, parse_body, parse_code};
use crate::actors::{Participant, RoomSnapshot, RoomStatus};
use crate::auth::IssuedToken;
use crate::errors::CcError;
use crate::middleware::bearer_token;
use crate::presenter::QuizState;
use crate::routes::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Extension, Json,
};
use common::jwt::RoomTokenClaims;
use common::types::ParticipantRole;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Debug, Deserialize)]
pub struct CreateRoomRequest {
    pub presenter: String,
}

#[derive(Debug, Serialize)]
pub struct CreateRoomResponse {
    pub room: RoomSnapshot,
    pub credential: IssuedToken,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RoomResponse {
    pub room: RoomSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quiz: Option<QuizState>,
}

#[derive(Debug, Deserialize)]
pub struct JoinRoomRequest {
    pub name: String,
    #[serde(default)]
    pub roll_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JoinRoomResponse {
    pub code: String,
    pub identity: String,
    pub credential: IssuedToken,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
}

/// Handler for POST /api/v1/rooms
///
/// - 201 Created: room in Setup plus the presenter's credential
/// - 400 Bad Request: missing presenter name
/// - 503 Service Unavailable: room limit reached or draining
#[instrument(skip_all, name = "cc.room.create", fields(room = tracing::field::Empty))]
pub async fn create_room(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<CreateRoomResponse>), CcError> {
    let request: CreateRoomRequest = parse_body(&body)?;

    let room = state.directory.create_room(request.presenter).await?;
    tracing::Span::current().record("room", room.code.as_str());

    let credential =
        state
            .issuer
            .issue(room.code.as_str(), &room.presenter, ParticipantRole::Presenter)?;

    info!(target: "cc.handlers.rooms", room = %room.code, "Room created");

    Ok((
        StatusCode::CREATED,
        Json(CreateRoomResponse {
            room,
            credential,
            media_url: state.config.media_url.clone(),
        }),
    ))
}

/// Handler for GET /api/v1/rooms/{code}
///
/// Anyone may look a room up by code. An optional Bearer credential
/// decides how much is shown: the room's presenter sees everything; other
/// callers see topics without answers until each round completes, and only
/// their own submissions.
///
/// Ended rooms stay visible until evicted so the report screen can load.
///
/// - 200 OK: snapshot
/// - 401 Unauthorized: a credential was sent but is invalid
/// - 404 Not Found: unknown room
#[instrument(skip_all, name = "cc.room.get")]
pub async fn get_room(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<Json<RoomResponse>, CcError> {
    let code = parse_code(&code)?;
    let claims = bearer_token(&headers)?
        .map(|token| state.issuer.verify(token))
        .transpose()?
        .filter(|claims| authorize_room(claims, &code).is_ok());

    let room = state.directory.get_room(code).await?;
    let snapshot = room.snapshot().await?;
    let is_presenter = claims
        .as_ref()
        .is_some_and(|claims| authorize_presenter(claims, &snapshot).is_ok());

    let quiz = if snapshot.status == RoomStatus::Live {
        Some(room.quiz().await?.state().await?)
    } else {
        None
    };

    if is_presenter {
        return Ok(Json(RoomResponse {
            room: snapshot,
            quiz,
        }));
    }

    let identity = claims.as_ref().map(|claims| claims.sub.as_str());
    Ok(Json(RoomResponse {
        room: snapshot.redacted(),
        quiz: quiz.map(|quiz| quiz.redacted_for(identity)),
    }))
}

/// Handler for POST /api/v1/rooms/{code}/join
///
/// Mints a viewer credential for a room that exists and has not ended. The
/// viewer subscribes to the bus by opening the WebSocket with it.
///
/// - 200 OK: viewer credential
/// - 400 Bad Request: missing name
/// - 404 Not Found: unknown or Ended room
#[instrument(skip_all, name = "cc.room.join")]
pub async fn join_room(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    body: Bytes,
) -> Result<Json<JoinRoomResponse>, CcError> {
    let code = parse_code(&code)?;
    let request: JoinRoomRequest = parse_body(&body)?;

    if request.name.trim().is_empty() {
        return Err(CcError::MissingParameter("name is required".to_string()));
    }

    let snapshot = state.directory.get_room(code.clone()).await?.snapshot().await?;
    if snapshot.status == RoomStatus::Ended {
        return Err(CcError::RoomNotFound);
    }

    let participant = Participant::viewer(&request.name, request.roll_id.as_deref());
    let credential = state
        .issuer
        .issue(code.as_str(), &participant.identity, participant.role)?;

    Ok(Json(JoinRoomResponse {
        code: code.to_string(),
        identity: participant.identity,
        credential,
        media_url: state.config.media_url.clone(),
    }))
}

/// Handler for POST /api/v1/rooms/{code}/start
///
/// - 200 OK: Live snapshot
/// - 403 Forbidden: caller is not the room's presenter
/// - 409 Conflict: room is not in Setup
#[instrument(skip_all, name = "cc.room.start")]
pub async fn start_room(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<RoomTokenClaims>,
    Path(code): Path<String>,
) -> Result<Json<RoomSnapshot>, CcError> {
    let room = state.directory.get_room(parse_code(&code)?).await?;
    authorize_presenter(&claims, &room.snapshot().await?)?;

    let snapshot = room.start().await?;
    info!(target: "cc.handlers.rooms", room = %snapshot.code, "Room started");
    Ok(Json(snapshot))
}

/// Handler for POST /api/v1/rooms/{code}/end
///
/// Idempotent: ending an Ended room returns its snapshot again.
#[instrument(skip_all, name = "cc.room.end")]
pub async fn end_room(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<RoomTokenClaims>,
    Path(code): Path<String>,
) -> Result<Json<RoomSnapshot>, CcError> {
    let code = parse_code(&code)?;
    let room = state.directory.get_room(code.clone()).await?;
    authorize_presenter(&claims, &room.snapshot().await?)?;

    state.directory.end_room(code).await?;
    Ok(Json(room.snapshot().await?))
}
