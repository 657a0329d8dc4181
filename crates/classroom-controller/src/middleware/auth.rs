//! Room-credential middleware for protected routes.
//!
//! Extracts the Bearer token from the Authorization header, verifies it with
//! the Token Issuer, and injects the claims into request extensions.

use crate::auth::TokenIssuer;
use crate::errors::CcError;
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

/// State for the credential middleware.
#[derive(Clone)]
pub struct AuthState {
    pub issuer: Arc<TokenIssuer>,
}

/// Reject requests without a valid room credential.
///
/// ```text
/// Authorization: Bearer <token>
/// ```
///
/// Handlers read the verified `RoomTokenClaims` from extensions and decide
/// whether the role and room fit the operation.
#[instrument(skip_all, name = "cc.middleware.auth")]
pub async fn require_room_credential(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, CcError> {
    let token = bearer_token(req.headers())?.ok_or_else(|| {
        tracing::debug!(target: "cc.middleware.auth", "Missing Authorization header");
        CcError::InvalidToken("Missing Authorization header".to_string())
    })?;

    let claims = state.issuer.verify(token)?;
    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

/// Bearer token from the Authorization header, if one was sent.
///
/// # Errors
///
/// `InvalidToken` if the header is present but not a Bearer credential.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Result<Option<&str>, CcError> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };

    value
        .to_str()
        .ok()
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(Some)
        .ok_or_else(|| {
            tracing::debug!(target: "cc.middleware.auth", "Invalid Authorization header format");
            CcError::InvalidToken("Invalid Authorization header format".to_string())
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware,
        routing::get,
        Extension, Router,
    };
    use common::jwt::RoomTokenClaims;
    use common::secret::SecretString;
    use common::types::ParticipantRole;
    use std::time::Duration;
    use tower::ServiceExt;

    fn issuer() -> Arc<TokenIssuer> {
        Arc::new(TokenIssuer::new(
            "APIkey123",
            SecretString::from("a-very-long-media-api-secret-for-tests".to_string()),
            Duration::from_secs(3600),
        ))
    }

    async fn whoami(Extension(claims): Extension<RoomTokenClaims>) -> String {
        claims.sub
    }

    fn app(issuer: Arc<TokenIssuer>) -> Router {
        Router::new()
            .route("/whoami", get(whoami))
            .route_layer(middleware::from_fn_with_state(
                Arc::new(AuthState { issuer }),
                require_room_credential,
            ))
    }

    #[tokio::test]
    async fn test_valid_credential_reaches_handler() {
        let issuer = issuer();
        let token = issuer
            .issue("K3ZQ9A", "Ms. Rao", ParticipantRole::Presenter)
            .unwrap()
            .token;

        let response = app(issuer)
            .oneshot(
                HttpRequest::builder()
                    .uri("/whoami")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_or_malformed_header_is_unauthorized() {
        let response = app(issuer())
            .oneshot(HttpRequest::builder().uri("/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app(issuer())
            .oneshot(
                HttpRequest::builder()
                    .uri("/whoami")
                    .header("authorization", "Token abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers).unwrap(), None);

        headers.insert(AUTHORIZATION, "Bearer abc.def".parse().unwrap());
        assert_eq!(bearer_token(&headers).unwrap(), Some("abc.def"));

        headers.insert(AUTHORIZATION, "Basic abc".parse().unwrap());
        assert!(matches!(
            bearer_token(&headers),
            Err(CcError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_auth_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AuthState>();
    }
}
