//! Quiz and voice handlers.
//!
//! Topic management and triggering are presenter-only. Answers come from any
//! member of the room, with the identity taken from the credential.

use super::{authorize_presenter, authorize_room, parse_body, parse_code};
use crate::actors::RoomActorHandle;
use crate::errors::CcError;
use crate::presenter::quiz::{AnswerOutcome, Topic, TopicDraft};
use crate::presenter::VoiceStatus;
use crate::routes::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use common::jwt::RoomTokenClaims;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Debug, Deserialize)]
pub struct GenerateTopicRequest {
    pub topic: String,
}

#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    pub answer: String,
}

#[derive(Debug, Deserialize)]
pub struct TranscriptRequest {
    pub transcript: String,
}

/// Resolve the room and check the caller is its presenter.
async fn presenter_room(
    state: &AppState,
    claims: &RoomTokenClaims,
    code: &str,
) -> Result<RoomActorHandle, CcError> {
    let room = state.directory.get_room(parse_code(code)?).await?;
    authorize_presenter(claims, &room.snapshot().await?)?;
    Ok(room)
}

/// Handler for POST /api/v1/rooms/{code}/topics
///
/// - 201 Created: the new Pending topic
/// - 400 Bad Request: name, question, or answer missing
/// - 409 Conflict: room has ended
#[instrument(skip_all, name = "cc.quiz.add_topic")]
pub async fn add_topic(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<RoomTokenClaims>,
    Path(code): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<Topic>), CcError> {
    let room = presenter_room(&state, &claims, &code).await?;
    let draft: TopicDraft = parse_body(&body)?;

    let topic = room.add_topic(draft).await?;
    Ok((StatusCode::CREATED, Json(topic)))
}

/// Handler for POST /api/v1/rooms/{code}/topics/generate
///
/// Asks the question generator for a topic and adds it. On generator
/// failure nothing is added.
///
/// - 201 Created: the generated topic
/// - 500 Internal Server Error: no generator configured
/// - 502 Bad Gateway: generator failed
#[instrument(skip_all, name = "cc.quiz.generate_topic")]
pub async fn generate_topic(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<RoomTokenClaims>,
    Path(code): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<Topic>), CcError> {
    let room = presenter_room(&state, &claims, &code).await?;
    let request: GenerateTopicRequest = parse_body(&body)?;

    let generator = state.generator.as_ref().ok_or_else(|| {
        CcError::BackendMisconfigured("question generator API key is not configured".to_string())
    })?;

    let draft = generator.generate(&request.topic).await?;
    let topic = room.add_topic(draft).await?;

    info!(target: "cc.handlers.quiz", room = %room.code(), topic_id = topic.id, "Generated topic added");
    Ok((StatusCode::CREATED, Json(topic)))
}

/// Handler for POST /api/v1/rooms/{code}/topics/next
///
/// Triggers the first Pending topic, as the voice trigger does.
#[instrument(skip_all, name = "cc.quiz.trigger_next")]
pub async fn trigger_next(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<RoomTokenClaims>,
    Path(code): Path<String>,
) -> Result<Json<Topic>, CcError> {
    let room = presenter_room(&state, &claims, &code).await?;
    let topic = room.quiz().await?.trigger_next().await?;
    Ok(Json(topic))
}

/// Handler for POST /api/v1/rooms/{code}/topics/{id}/trigger ("Ask Now")
///
/// - 200 OK: the now Active topic
/// - 404 Not Found: unknown topic
/// - 409 Conflict: room not Live, topic not Pending, or another topic Active
#[instrument(skip_all, name = "cc.quiz.trigger")]
pub async fn trigger_topic(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<RoomTokenClaims>,
    Path((code, topic_id)): Path<(String, u32)>,
) -> Result<Json<Topic>, CcError> {
    let room = presenter_room(&state, &claims, &code).await?;
    let topic = room.quiz().await?.trigger(topic_id).await?;
    Ok(Json(topic))
}

/// Handler for POST /api/v1/rooms/{code}/topics/{id}/close
///
/// Closing a Completed topic is a no-op and still returns 204.
#[instrument(skip_all, name = "cc.quiz.close")]
pub async fn close_topic(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<RoomTokenClaims>,
    Path((code, topic_id)): Path<(String, u32)>,
) -> Result<StatusCode, CcError> {
    let room = presenter_room(&state, &claims, &code).await?;
    room.quiz().await?.close(topic_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for POST /api/v1/rooms/{code}/answers
///
/// - 200 OK: topic id and whether the answer was correct
/// - 403 Forbidden: credential is for another room
/// - 409 Conflict: no Active topic
#[instrument(skip_all, name = "cc.quiz.answer")]
pub async fn submit_answer(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<RoomTokenClaims>,
    Path(code): Path<String>,
    body: Bytes,
) -> Result<Json<AnswerOutcome>, CcError> {
    let code = parse_code(&code)?;
    authorize_room(&claims, &code)?;
    let request: AnswerRequest = parse_body(&body)?;

    let room = state.directory.get_room(code).await?;
    let outcome = room
        .quiz()
        .await?
        .receive_answer(claims.sub, request.answer)
        .await?;
    Ok(Json(outcome))
}

/// Handler for POST /api/v1/rooms/{code}/transcripts
///
/// Feeds one finalized utterance from the presenter's speech recognizer to
/// the room's voice trigger.
///
/// - 202 Accepted: utterance queued
/// - 409 Conflict: room not Live
/// - 502 Bad Gateway: voice trigger is not listening
#[instrument(skip_all, name = "cc.voice.transcript")]
pub async fn feed_transcript(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<RoomTokenClaims>,
    Path(code): Path<String>,
    body: Bytes,
) -> Result<StatusCode, CcError> {
    let room = presenter_room(&state, &claims, &code).await?;
    let request: TranscriptRequest = parse_body(&body)?;

    if request.transcript.trim().is_empty() {
        return Err(CcError::MissingParameter(
            "transcript is required".to_string(),
        ));
    }

    let (_, transcripts) = room.voice().await?;
    transcripts.send(request.transcript)?;
    Ok(StatusCode::ACCEPTED)
}

/// Handler for GET /api/v1/rooms/{code}/voice
#[instrument(skip_all, name = "cc.voice.status")]
pub async fn voice_status(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<RoomTokenClaims>,
    Path(code): Path<String>,
) -> Result<Json<VoiceStatus>, CcError> {
    let room = presenter_room(&state, &claims, &code).await?;
    let (voice, _) = room.voice().await?;
    Ok(Json(voice.status()))
}
