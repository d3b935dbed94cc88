//! Event delivery and publish triggers
//!
//! - `GET /sse`: authenticated SSE stream of the caller's authorized events
//! - `POST /rent`, `POST /bloq`: publish a demo event to every process

use super::error::ApiError;
use crate::middleware::auth::RequireAuth;
use axum::{
    extract::Extension,
    response::{
        sse::{Event, Sse},
        Json,
    },
    routing::{get, post},
    Router,
};
use chrono::Utc;
use futures::stream::{self, Stream};
use herald_core::message::iso_timestamp;
use herald_core::BroadcastEngine;
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;

/// Event published by `POST /rent`
pub const RENT_EVENT: &str = "newRent";
/// Event published by `POST /bloq`
pub const BLOQ_EVENT: &str = "newBloq";

/// Publish acknowledgment
#[derive(Debug, Serialize)]
pub struct PublishResponse {
    pub success: bool,
    /// Processes subscribed to the channel (not clients)
    pub receivers: u64,
}

/// Open an SSE stream for the authenticated caller.
///
/// The session lives as long as the response stream; when the client goes
/// away axum drops the stream and with it the lease, which unregisters the
/// session. Keep-alive comments are not used since the engine heartbeats.
async fn sse_handler(
    RequireAuth(user): RequireAuth,
    Extension(engine): Extension<BroadcastEngine>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let (lease, rx) = engine.connect_channel(Some(user.identity), Some(user.permissions))?;

    let frames = stream::unfold((rx, lease), |(mut rx, lease)| async move {
        let frame = rx.recv().await?;
        let event = Event::default()
            .event(frame.event.as_str())
            .data(frame.data_json());
        Some((Ok(event), (rx, lease)))
    });

    Ok(Sse::new(frames))
}

async fn publish(
    engine: &BroadcastEngine,
    event: &str,
    kind: &str,
) -> Result<Json<PublishResponse>, ApiError> {
    let message = format!("{} created at {}", kind, iso_timestamp(Utc::now()));
    let receivers = engine.publish(event, json!({ "message": message })).await?;
    Ok(Json(PublishResponse {
        success: true,
        receivers,
    }))
}

async fn create_rent(
    RequireAuth(_user): RequireAuth,
    Extension(engine): Extension<BroadcastEngine>,
) -> Result<Json<PublishResponse>, ApiError> {
    publish(&engine, RENT_EVENT, "rent").await
}

async fn create_bloq(
    RequireAuth(_user): RequireAuth,
    Extension(engine): Extension<BroadcastEngine>,
) -> Result<Json<PublishResponse>, ApiError> {
    publish(&engine, BLOQ_EVENT, "Bloq").await
}

/// Event routes
pub fn events_routes() -> Router {
    Router::new()
        .route("/sse", get(sse_handler))
        .route("/rent", post(create_rent))
        .route("/bloq", post(create_bloq))
}
