//! Mapping engine errors onto HTTP responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    code: &'static str,
}

/// Handler error carrying the engine failure
#[derive(Debug)]
pub struct ApiError(pub herald_core::Error);

impl From<herald_core::Error> for ApiError {
    fn from(err: herald_core::Error) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        use herald_core::Error;
        match &self.0 {
            Error::Auth(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Error::Publish(_) | Error::Subscribe(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "BROKER_UNAVAILABLE")
            }
            Error::Closed => (StatusCode::SERVICE_UNAVAILABLE, "SHUTTING_DOWN"),
            Error::DuplicateSession { .. } | Error::Delivery(_) | Error::Validation(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let body = ErrorBody {
            success: false,
            error: self.0.to_string(),
            code,
        };
        (status, Json(body)).into_response()
    }
}
