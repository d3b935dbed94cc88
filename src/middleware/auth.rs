//! Authentication middleware for Axum
//!
//! Extracts Bearer tokens from requests and validates them against the
//! AuthService. Provides `RequireAuth` extractor for handlers.

use crate::auth::{AuthError, AuthService, AuthenticatedUser};
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

/// JSON error response for auth failures
#[derive(Debug, Serialize)]
struct AuthErrorResponse {
    success: bool,
    error: String,
    code: String,
}

impl AuthErrorResponse {
    fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            code: code.into(),
        }
    }
}

/// Auth rejection type
#[derive(Debug)]
pub struct AuthRejection {
    status: StatusCode,
    body: AuthErrorResponse,
}

impl AuthRejection {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: AuthErrorResponse::new(message, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<AuthError> for AuthRejection {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingCredentials => AuthRejection {
                status: StatusCode::UNAUTHORIZED,
                body: AuthErrorResponse::new(
                    "Authentication required. Provide Authorization: Bearer <token> or ?token=<token>.",
                    "UNAUTHORIZED",
                ),
            },
            AuthError::InvalidCredentials => AuthRejection {
                status: StatusCode::UNAUTHORIZED,
                body: AuthErrorResponse::new("Invalid email or password", "INVALID_CREDENTIALS"),
            },
            AuthError::InvalidToken | AuthError::UnknownUser(_) => AuthRejection {
                status: StatusCode::UNAUTHORIZED,
                body: AuthErrorResponse::new("Invalid or expired token", "INVALID_TOKEN"),
            },
            AuthError::Encoding(e) => AuthRejection::internal(e.to_string()),
        }
    }
}

// ============================================================================
// RequireAuth Extractor
// ============================================================================

/// Axum extractor that requires a valid token.
///
/// Extracts the token from:
/// 1. `Authorization: Bearer <token>` header
/// 2. `?token=<token>` query parameter (`EventSource` cannot set headers)
pub struct RequireAuth(pub AuthenticatedUser);

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for RequireAuth
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let auth = parts
            .extensions
            .get::<Arc<AuthService>>()
            .ok_or_else(|| AuthRejection::internal("AuthService not configured"))?;

        let token = extract_token(parts)?;
        let user = auth.verify(&token)?;
        Ok(RequireAuth(user))
    }
}

/// Extract token from request headers or query params
fn extract_token(parts: &Parts) -> std::result::Result<String, AuthError> {
    if let Some(auth_header) = parts.headers.get("authorization") {
        if let Ok(value) = auth_header.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return Ok(token.trim().to_string());
            }
        }
    }

    if let Some(query) = parts.uri.query() {
        for param in query.split('&') {
            if let Some(token) = param.strip_prefix("token=") {
                return Ok(token.to_string());
            }
        }
    }

    Err(AuthError::MissingCredentials)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(builder: axum::http::request::Builder) -> Parts {
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_extract_token_sources() {
        let header = parts(Request::get("/sse").header("Authorization", "Bearer abc.def"));
        assert_eq!(extract_token(&header).unwrap(), "abc.def");

        let query = parts(Request::get("/sse?x=1&token=abc.def"));
        assert_eq!(extract_token(&query).unwrap(), "abc.def");

        let none = parts(Request::get("/sse").header("Authorization", "Basic abc"));
        assert!(matches!(
            extract_token(&none),
            Err(AuthError::MissingCredentials)
        ));
    }

    #[test]
    fn test_rejection_status() {
        assert_eq!(
            AuthRejection::from(AuthError::MissingCredentials).status,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthRejection::from(AuthError::UnknownUser("9".into())).body.code,
            "INVALID_TOKEN"
        );
    }
}
