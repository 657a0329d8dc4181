//! Token Issuer.
//!
//! Mints HS256 room credentials in the media platform's access-token shape
//! and verifies them again when a client opens the event-bus WebSocket.
//! Issuance is a pure function of its inputs plus the server-held secret.

use crate::errors::CcError;
use chrono::Utc;
use common::jwt::{
    check_token_size, validate_iat, RoomTokenClaims, VideoGrant, DEFAULT_CLOCK_SKEW,
};
use common::secret::{ExposeSecret, SecretString};
use common::types::{Capability, ParticipantRole};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::instrument;

/// A freshly minted room credential.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    /// Lifetime in seconds.
    pub expires_in: u64,
    pub capabilities: Vec<Capability>,
}

/// Signs and verifies room credentials.
#[derive(Clone)]
pub struct TokenIssuer {
    api_key: String,
    api_secret: SecretString,
    ttl: Duration,
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .field("ttl", &self.ttl)
            .finish()
    }
}

const INVALID_TOKEN_MESSAGE: &str = "The room credential is invalid or expired";

impl TokenIssuer {
    #[must_use]
    pub fn new(api_key: impl Into<String>, api_secret: SecretString, ttl: Duration) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret,
            ttl,
        }
    }

    /// Credential lifetime.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mint a credential binding `identity` with `role` to `room`.
    ///
    /// # Errors
    ///
    /// - `MissingParameter` if `room` or `identity` is blank
    /// - `BackendMisconfigured` if the api key or secret is empty
    /// - `Internal` if signing fails
    #[instrument(skip_all, name = "cc.token.issue", fields(role = role.as_str()))]
    pub fn issue(
        &self,
        room: &str,
        identity: &str,
        role: ParticipantRole,
    ) -> Result<IssuedToken, CcError> {
        let room = room.trim();
        let identity = identity.trim();

        if room.is_empty() {
            return Err(CcError::MissingParameter("room is required".to_string()));
        }
        if identity.is_empty() {
            return Err(CcError::MissingParameter(
                "username is required".to_string(),
            ));
        }
        if self.api_key.is_empty() || self.api_secret.expose_secret().is_empty() {
            return Err(CcError::BackendMisconfigured(
                "media API key or secret is not configured".to_string(),
            ));
        }

        let now = Utc::now().timestamp();
        let ttl_secs = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);

        let claims = RoomTokenClaims {
            iss: self.api_key.clone(),
            sub: identity.to_string(),
            name: identity.to_string(),
            nbf: now,
            iat: now,
            exp: now.saturating_add(ttl_secs),
            jti: uuid::Uuid::new_v4().to_string(),
            role,
            video: VideoGrant::for_role(room, role),
            capabilities: role.capabilities().to_vec(),
        };

        let mut header = Header::new(Algorithm::HS256);
        header.typ = Some("JWT".to_string());

        let encoding_key = EncodingKey::from_secret(self.api_secret.expose_secret().as_bytes());
        let token = encode(&header, &claims, &encoding_key).map_err(|e| {
            tracing::error!(target: "cc.token", error = %e, "Credential signing failed");
            CcError::Internal("credential signing failed".to_string())
        })?;

        tracing::debug!(target: "cc.token", room = %room, role = role.as_str(), "Issued room credential");

        Ok(IssuedToken {
            token,
            expires_in: self.ttl.as_secs(),
            capabilities: claims.capabilities,
        })
    }

    /// Verify a credential and return its claims.
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` for oversized, unsigned, foreign-issuer,
    /// expired, or future-dated credentials.
    #[instrument(skip_all, name = "cc.token.verify")]
    pub fn verify(&self, token: &str) -> Result<RoomTokenClaims, CcError> {
        check_token_size(token).map_err(|e| CcError::InvalidToken(e.to_string()))?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.set_issuer(&[self.api_key.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        let decoding_key = DecodingKey::from_secret(self.api_secret.expose_secret().as_bytes());
        let token_data =
            decode::<RoomTokenClaims>(token, &decoding_key, &validation).map_err(|e| {
                tracing::debug!(target: "cc.token", error = %e, "Credential verification failed");
                CcError::InvalidToken(INVALID_TOKEN_MESSAGE.to_string())
            })?;

        validate_iat(token_data.claims.iat, DEFAULT_CLOCK_SKEW)
            .map_err(|e| CcError::InvalidToken(e.to_string()))?;

        Ok(token_data.claims)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::jwt::MAX_JWT_SIZE_BYTES;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(
            "APIclassroom",
            SecretString::from(SECRET),
            Duration::from_secs(21_600),
        )
    }

    #[test]
    fn test_viewer_credential_never_publishes_media() {
        let issuer = issuer();
        let issued = issuer
            .issue("K3ZQ9A", "Priya (21CS042)", ParticipantRole::Viewer)
            .unwrap();

        assert!(!issued.capabilities.contains(&Capability::PublishMedia));
        assert!(issued.capabilities.contains(&Capability::PublishData));

        let claims = issuer.verify(&issued.token).unwrap();
        assert!(!claims.video.can_publish);
        assert!(claims.video.can_publish_data);
        assert!(!claims.has_capability(Capability::PublishMedia));
    }

    #[test]
    fn test_presenter_credential_always_publishes_media() {
        let issuer = issuer();
        let issued = issuer
            .issue("K3ZQ9A", "Ms. Rao", ParticipantRole::Presenter)
            .unwrap();

        assert!(issued.capabilities.contains(&Capability::PublishMedia));
        let claims = issuer.verify(&issued.token).unwrap();
        assert!(claims.video.can_publish);
        assert_eq!(claims.role, ParticipantRole::Presenter);
    }

    #[test]
    fn test_claims_bind_room_and_identity() {
        let issuer = issuer();
        let issued = issuer
            .issue(" K3ZQ9A ", " Priya ", ParticipantRole::Viewer)
            .unwrap();
        let claims = issuer.verify(&issued.token).unwrap();

        assert_eq!(claims.iss, "APIclassroom");
        assert_eq!(claims.sub, "Priya");
        assert_eq!(claims.video.room, "K3ZQ9A");
        assert_eq!(claims.exp - claims.iat, 21_600);
        assert_eq!(issued.expires_in, 21_600);
    }

    #[test]
    fn test_blank_room_or_identity_is_missing_parameter() {
        let issuer = issuer();
        assert!(matches!(
            issuer.issue("", "Priya", ParticipantRole::Viewer),
            Err(CcError::MissingParameter(_))
        ));
        assert!(matches!(
            issuer.issue("K3ZQ9A", "   ", ParticipantRole::Viewer),
            Err(CcError::MissingParameter(_))
        ));
    }

    #[test]
    fn test_missing_credentials_are_backend_misconfigured() {
        let no_secret = TokenIssuer::new("APIclassroom", SecretString::from(""), Duration::from_secs(60));
        assert!(matches!(
            no_secret.issue("K3ZQ9A", "Priya", ParticipantRole::Viewer),
            Err(CcError::BackendMisconfigured(_))
        ));

        let no_key = TokenIssuer::new("", SecretString::from(SECRET), Duration::from_secs(60));
        assert!(matches!(
            no_key.issue("K3ZQ9A", "Priya", ParticipantRole::Viewer),
            Err(CcError::BackendMisconfigured(_))
        ));
    }

    #[test]
    fn test_verify_rejects_foreign_secret() {
        let other = TokenIssuer::new(
            "APIclassroom",
            SecretString::from("ffffffffffffffffffffffffffffffff"),
            Duration::from_secs(60),
        );
        let issued = other
            .issue("K3ZQ9A", "Mallory", ParticipantRole::Presenter)
            .unwrap();

        assert!(matches!(
            issuer().verify(&issued.token),
            Err(CcError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_verify_rejects_foreign_issuer() {
        let other = TokenIssuer::new("APIother", SecretString::from(SECRET), Duration::from_secs(60));
        let issued = other
            .issue("K3ZQ9A", "Mallory", ParticipantRole::Viewer)
            .unwrap();

        assert!(matches!(
            issuer().verify(&issued.token),
            Err(CcError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_verify_rejects_oversized_token() {
        let token = "a".repeat(MAX_JWT_SIZE_BYTES + 1);
        assert!(matches!(
            issuer().verify(&token),
            Err(CcError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_verify_rejects_garbage() {
        assert!(matches!(
            issuer().verify("not.a.jwt"),
            Err(CcError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let debug = format!("{:?}", issuer());
        assert!(!debug.contains(SECRET));
        assert!(debug.contains("[REDACTED]"));
    }
}
