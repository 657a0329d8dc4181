//! Room credential claims and JWT validation helpers.
//!
//! A room credential is an HS256 JWT in the media platform's access-token
//! shape: the `video` grant tells the transport what the holder may do, and
//! `capabilities` carries the same permissions as an explicit list for the
//! classroom controller's own checks.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing
//! - `sub` and `name` are redacted in Debug output
//! - `iat` too far in the future is rejected

use crate::types::{Capability, ParticipantRole};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Maximum allowed JWT size in bytes (8KB).
///
/// Credentials carry a handful of short claims and come in well under 1KB.
/// Anything larger is rejected before base64 decoding or signature checks.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Default clock skew tolerance for `iat` and `nbf` (5 minutes).
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Errors that can occur during credential validation.
///
/// Messages are generic; details go to debug logs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The room credential is invalid or expired")]
    TokenTooLarge,

    /// Token `iat` claim is too far in the future.
    #[error("The room credential is invalid or expired")]
    IatTooFarInFuture,
}

/// Media-platform grant embedded in a room credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoGrant {
    pub room_join: bool,
    pub room: String,
    pub can_publish: bool,
    pub can_subscribe: bool,
    pub can_publish_data: bool,
}

impl VideoGrant {
    /// Build the grant for `role` in `room`.
    #[must_use]
    pub fn for_role(room: &str, role: ParticipantRole) -> Self {
        let caps = role.capabilities();
        Self {
            room_join: caps.contains(&Capability::Join),
            room: room.to_string(),
            can_publish: caps.contains(&Capability::PublishMedia),
            can_subscribe: caps.contains(&Capability::SubscribeMedia),
            can_publish_data: caps.contains(&Capability::PublishData),
        }
    }
}

/// Claims of a room credential.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomTokenClaims {
    /// Media API key that signed the token.
    pub iss: String,
    /// Participant identity, unique within the room by convention only.
    pub sub: String,
    /// Display name.
    pub name: String,
    pub nbf: i64,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    pub role: ParticipantRole,
    pub video: VideoGrant,
    pub capabilities: Vec<Capability>,
}

impl fmt::Debug for RoomTokenClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomTokenClaims")
            .field("iss", &self.iss)
            .field("sub", &"[REDACTED]")
            .field("name", &"[REDACTED]")
            .field("nbf", &self.nbf)
            .field("iat", &self.iat)
            .field("exp", &self.exp)
            .field("role", &self.role)
            .field("room", &self.video.room)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl RoomTokenClaims {
    /// Check if the credential grants a capability.
    #[must_use]
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Reject tokens larger than [`MAX_JWT_SIZE_BYTES`].
///
/// # Errors
///
/// Returns `JwtValidationError::TokenTooLarge` for oversized input.
pub fn check_token_size(token: &str) -> Result<(), JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }
    Ok(())
}

/// Validate the `iat` (issued-at) claim with clock skew tolerance.
///
/// # Errors
///
/// Returns `JwtValidationError::IatTooFarInFuture` if `iat` is more than
/// `clock_skew` ahead of now.
pub fn validate_iat(iat: i64, clock_skew: Duration) -> Result<(), JwtValidationError> {
    let now = chrono::Utc::now().timestamp();
    validate_iat_at(iat, clock_skew, now)
}

/// Deterministic `iat` validation against an explicit `now`.
pub(crate) fn validate_iat_at(
    iat: i64,
    clock_skew: Duration,
    now: i64,
) -> Result<(), JwtValidationError> {
    let clock_skew_secs = i64::try_from(clock_skew.as_secs()).unwrap_or(i64::MAX);
    let max_iat = now.saturating_add(clock_skew_secs);

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn claims(role: ParticipantRole) -> RoomTokenClaims {
        RoomTokenClaims {
            iss: "APIkey".to_string(),
            sub: "Priya (21CS042)".to_string(),
            name: "Priya".to_string(),
            nbf: 1_700_000_000,
            iat: 1_700_000_000,
            exp: 1_700_021_600,
            jti: "jti-1".to_string(),
            role,
            video: VideoGrant::for_role("K3ZQ9A", role),
            capabilities: role.capabilities().to_vec(),
        }
    }

    #[test]
    fn test_viewer_grant_cannot_publish_media() {
        let grant = VideoGrant::for_role("K3ZQ9A", ParticipantRole::Viewer);
        assert!(grant.room_join);
        assert!(!grant.can_publish);
        assert!(grant.can_subscribe);
        assert!(grant.can_publish_data);
    }

    #[test]
    fn test_presenter_grant_publishes_media() {
        let grant = VideoGrant::for_role("K3ZQ9A", ParticipantRole::Presenter);
        assert!(grant.can_publish);
        assert!(grant.can_publish_data);
    }

    #[test]
    fn test_grant_serializes_in_platform_shape() {
        let grant = VideoGrant::for_role("K3ZQ9A", ParticipantRole::Viewer);
        let value = serde_json::to_value(&grant).unwrap();
        assert_eq!(value["roomJoin"], true);
        assert_eq!(value["canPublish"], false);
        assert_eq!(value["canPublishData"], true);
        assert_eq!(value["room"], "K3ZQ9A");
    }

    #[test]
    fn test_claims_debug_redacts_identity() {
        let debug = format!("{:?}", claims(ParticipantRole::Viewer));
        assert!(!debug.contains("Priya"));
        assert!(!debug.contains("21CS042"));
        assert!(debug.contains("K3ZQ9A"));
    }

    #[test]
    fn test_has_capability() {
        let viewer = claims(ParticipantRole::Viewer);
        assert!(viewer.has_capability(Capability::PublishData));
        assert!(!viewer.has_capability(Capability::PublishMedia));
    }

    #[test]
    fn test_check_token_size() {
        assert!(check_token_size(&"a".repeat(MAX_JWT_SIZE_BYTES)).is_ok());
        assert_eq!(
            check_token_size(&"a".repeat(MAX_JWT_SIZE_BYTES + 1)),
            Err(JwtValidationError::TokenTooLarge)
        );
    }

    #[test]
    fn test_validate_iat_boundaries() {
        let now = 1_700_000_000_i64;
        assert!(validate_iat_at(now - 3600, DEFAULT_CLOCK_SKEW, now).is_ok());
        assert!(validate_iat_at(now + 300, DEFAULT_CLOCK_SKEW, now).is_ok());
        assert!(matches!(
            validate_iat_at(now + 301, DEFAULT_CLOCK_SKEW, now),
            Err(JwtValidationError::IatTooFarInFuture)
        ));
    }

    #[test]
    fn test_validate_iat_current_time() {
        let now = chrono::Utc::now().timestamp();
        assert!(validate_iat(now, DEFAULT_CLOCK_SKEW).is_ok());
    }
}
