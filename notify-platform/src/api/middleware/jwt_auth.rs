//! Bearer token authentication for protected routes.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::api::error::ApiError;
use crate::api::jwt::{Claims, JwtError, JwtService};

/// Why a request was not authenticated.
#[derive(Debug)]
pub enum JwtAuthError {
    MissingToken,
    /// Not a `Bearer` token
    InvalidFormat,
    InvalidToken(JwtError),
}

impl IntoResponse for JwtAuthError {
    fn into_response(self) -> Response {
        let message = match self {
            JwtAuthError::MissingToken => "Missing authorization token",
            JwtAuthError::InvalidFormat => "Invalid token format",
            JwtAuthError::InvalidToken(JwtError::TokenExpired) => "Token has expired",
            JwtAuthError::InvalidToken(JwtError::InvalidSubject) => "Token subject is not a user id",
            JwtAuthError::InvalidToken(_) => "Invalid token",
        };
        ApiError::unauthorized(message).into_response()
    }
}

/// The authenticated caller, inserted into request extensions.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: i64,
    pub claims: Claims,
}

fn extract_bearer_token(parts: &Parts) -> Result<&str, JwtAuthError> {
    let auth_str = parts
        .headers
        .get(AUTHORIZATION)
        .ok_or(JwtAuthError::MissingToken)?
        .to_str()
        .map_err(|_| JwtAuthError::InvalidFormat)?;

    auth_str
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(JwtAuthError::InvalidFormat)
}

/// Validate the bearer token and attach an [`AuthUser`] to the request.
pub async fn jwt_auth_middleware(
    State(jwt_service): State<Arc<JwtService>>,
    request: Request,
    next: Next,
) -> Result<Response, JwtAuthError> {
    let (mut parts, body) = request.into_parts();

    let claims = {
        let token = extract_bearer_token(&parts)?;
        jwt_service
            .validate_token(token)
            .map_err(JwtAuthError::InvalidToken)?
    };
    let user_id = claims.user_id().map_err(JwtAuthError::InvalidToken)?;

    parts.extensions.insert(AuthUser { user_id, claims });
    Ok(next.run(Request::from_parts(parts, body)).await)
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, http::Request, http::StatusCode, routing::get};
    use tower::ServiceExt;

    fn issuer_under_test() -> Arc<JwtService> {
        Arc::new(JwtService::new(
            "hs256-shared-secret-for-unit-tests",
            None,
            "notify-platform",
            Some(3600),
        ))
    }

    fn app(jwt: Arc<JwtService>) -> Router {
        Router::new()
            .route(
                "/whoami",
                get(|user: AuthUser| async move { user.user_id.to_string() }),
            )
            .layer(axum::middleware::from_fn_with_state(jwt, jwt_auth_middleware))
    }

    fn parts(header: Option<&str>) -> Parts {
        let mut builder = Request::builder();
        if let Some(value) = header {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(
            extract_bearer_token(&parts(Some("Bearer abc"))).unwrap(),
            "abc"
        );
        assert!(matches!(
            extract_bearer_token(&parts(None)),
            Err(JwtAuthError::MissingToken)
        ));
        assert!(matches!(
            extract_bearer_token(&parts(Some("Basic dXNlcjpwYXNz"))),
            Err(JwtAuthError::InvalidFormat)
        ));
        assert!(matches!(
            extract_bearer_token(&parts(Some("Bearer "))),
            Err(JwtAuthError::InvalidFormat)
        ));
    }

    #[tokio::test]
    async fn test_valid_token_reaches_handler() {
        let jwt = issuer_under_test();
        let token = jwt.generate_token(42, vec![]).unwrap();

        let response = app(jwt)
            .oneshot(
                Request::builder()
                    .uri("/whoami")
                    .header(AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"42");
    }

    #[tokio::test]
    async fn test_missing_token_is_401() {
        let response = app(issuer_under_test())
            .oneshot(Request::builder().uri("/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
