//! `GET /api/v1/token?room=&username=&role=`
//!
//! Mints a room credential for any caller. Issuance does not consult the
//! directory; joining the bus later is where an unknown room is rejected.

use crate::auth::IssuedToken;
use crate::errors::CcError;
use crate::routes::AppState;
use axum::extract::{Query, State};
use axum::Json;
use common::types::ParticipantRole;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub room: Option<String>,
    pub username: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    #[serde(flatten)]
    pub credential: IssuedToken,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
}

/// Handler for GET /api/v1/token
///
/// - 200 OK: credential issued
/// - 400 Bad Request: room, username, or role missing; unknown role
/// - 500 Internal Server Error: media credentials not configured
#[instrument(skip_all, name = "cc.token.request")]
pub async fn issue_token(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<TokenResponse>, CcError> {
    let room = query.room.unwrap_or_default();
    let username = query.username.unwrap_or_default();
    let role: ParticipantRole = query
        .role
        .filter(|r| !r.trim().is_empty())
        .ok_or_else(|| CcError::MissingParameter("role is required".to_string()))?
        .parse()?;

    let credential = state.issuer.issue(&room, &username, role)?;

    Ok(Json(TokenResponse {
        credential,
        media_url: state.config.media_url.clone(),
    }))
}
