//! Error types for herald-core

use crate::session::SessionId;
use herald_bus::BusError;
use thiserror::Error;

/// Connect attempt rejected before a session was created
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No verified identity was supplied
    #[error("missing or invalid identity")]
    MissingIdentity,

    /// Identity present but no authorized-event set
    #[error("missing authorized events")]
    MissingAuthorizedEvents,
}

/// A push to a single session failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The connection is already closed
    #[error("session connection closed")]
    Closed,

    /// The session's outbound buffer is full; the frame was dropped
    #[error("session buffer full")]
    Full,

    /// No such session in the registry
    #[error("session not found: {0}")]
    NotFound(SessionId),
}

/// An inbound bus payload does not have the `{event, data}` shape
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Not JSON at all
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// JSON but not an object
    #[error("payload is not an object")]
    NotAnObject,

    /// `event` key missing or not a non-empty string
    #[error("`event` must be a non-empty string")]
    InvalidEvent,

    /// `data` key missing
    #[error("`data` is missing")]
    MissingData,
}

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Authentication requirements not met
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Session id already registered
    #[error("duplicate session: {id}")]
    DuplicateSession {
        /// The conflicting id
        id: SessionId,
    },

    /// Delivery to a session failed
    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// Malformed message
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Publishing through the bus failed
    #[error("publish failed: {0}")]
    Publish(#[from] BusError),

    /// Subscribing to the broadcast channel failed
    #[error("subscribe failed: {0}")]
    Subscribe(BusError),

    /// The engine has been closed
    #[error("broadcast engine is closed")]
    Closed,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
