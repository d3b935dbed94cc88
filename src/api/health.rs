//! Health and statistics endpoints
//!
//! - `/health`: liveness plus bus state (public, for load balancers)
//! - `/stats`: engine statistics (requires authentication)

use crate::middleware::auth::RequireAuth;
use axum::{extract::Extension, response::Json, routing::get, Router};
use herald_bus::ConnectionState;
use herald_core::{BroadcastEngine, EngineStats};
use serde::Serialize;

/// Simple health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub bus: ConnectionState,
}

async fn health_check(Extension(engine): Extension<BroadcastEngine>) -> Json<HealthResponse> {
    let bus = *engine.watch_bus_state().borrow();
    let status = match bus {
        ConnectionState::Connected if !engine.is_closed() => "healthy",
        _ => "degraded",
    };
    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        bus,
    })
}

async fn stats(
    RequireAuth(_user): RequireAuth,
    Extension(engine): Extension<BroadcastEngine>,
) -> Json<EngineStats> {
    Json(engine.stats())
}

/// Health routes
pub fn health_routes() -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(stats))
}
