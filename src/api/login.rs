//! `POST /login`

use crate::auth::AuthService;
use crate::middleware::auth::AuthRejection;
use axum::{extract::Extension, response::Json, routing::post, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Login request body
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Public user fields returned on login
#[derive(Debug, Serialize)]
pub struct UserView {
    pub id: String,
    pub email: String,
    pub name: String,
}

/// Successful login
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserView,
}

async fn login(
    Extension(auth): Extension<Arc<AuthService>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AuthRejection> {
    let (token, user) = auth.login(&request.email, &request.password).map_err(|e| {
        warn!(email = %request.email, "Login failed");
        AuthRejection::from(e)
    })?;

    info!(user_id = %user.identity.id, "User logged in");
    Ok(Json(LoginResponse {
        token,
        user: UserView {
            id: user.identity.id,
            email: user.email,
            name: user.identity.name,
        },
    }))
}

/// Login route
pub fn login_routes() -> Router {
    Router::new().route("/login", post(login))
}
