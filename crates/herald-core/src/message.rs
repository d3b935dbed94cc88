//! Bus messages and pushed frames

use crate::error::ValidationError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Event name of the one-time acknowledgment sent on connect
pub const CONNECTION_EVENT: &str = "connection";
/// Event name of liveness frames
pub const HEARTBEAT_EVENT: &str = "heartbeat";
/// Event name of the notice sent when the engine closes
pub const SHUTDOWN_EVENT: &str = "shutdown";

/// An application event travelling over the bus: `{"event": .., "data": ..}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    /// Event name, matched against each session's authorized events
    pub event: String,
    /// Arbitrary JSON payload delivered to the client
    pub data: Value,
}

impl EventMessage {
    /// Create a message
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Validate a raw bus payload.
    ///
    /// `event` must be a non-empty single-line string and the `data` key must be present
    /// (`null` is accepted). Unknown extra keys are ignored.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let value: Value = serde_json::from_str(raw)?;
        let Value::Object(mut fields) = value else {
            return Err(ValidationError::NotAnObject);
        };

        let event = match fields.remove("event") {
            Some(Value::String(event)) => {
                validate_event_name(&event)?;
                event
            }
            _ => return Err(ValidationError::InvalidEvent),
        };
        let data = fields.remove("data").ok_or(ValidationError::MissingData)?;

        Ok(Self { event, data })
    }

    /// Wire representation
    #[must_use]
    pub fn to_value(&self) -> Value {
        json!({ "event": self.event, "data": self.data })
    }
}

/// One unit pushed to a session, rendered as an SSE event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    /// SSE `event:` name
    pub event: String,
    /// SSE `data:` payload
    pub data: Value,
}

impl Frame {
    /// Create a frame
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// `connection` acknowledgment: `{connected: true, timestamp}`
    #[must_use]
    pub fn connection_ack(now: DateTime<Utc>) -> Self {
        Self::new(
            CONNECTION_EVENT,
            json!({ "connected": true, "timestamp": iso_timestamp(now) }),
        )
    }

    /// `heartbeat` frame: `{timestamp}`
    #[must_use]
    pub fn heartbeat(now: DateTime<Utc>) -> Self {
        Self::new(HEARTBEAT_EVENT, json!({ "timestamp": iso_timestamp(now) }))
    }

    /// `shutdown` notice
    #[must_use]
    pub fn shutdown() -> Self {
        Self::new(SHUTDOWN_EVENT, json!({ "message": "Server shutting down" }))
    }

    /// Serialized `data`, as written on the SSE `data:` line
    #[must_use]
    pub fn data_json(&self) -> String {
        self.data.to_string()
    }
}

impl From<EventMessage> for Frame {
    fn from(message: EventMessage) -> Self {
        Self::new(message.event, message.data)
    }
}

/// Event names must be non-empty and fit on one SSE `event:` line
pub fn validate_event_name(event: &str) -> Result<(), ValidationError> {
    if event.is_empty() || event.contains(['\n', '\r']) {
        return Err(ValidationError::InvalidEvent);
    }
    Ok(())
}

/// ISO-8601 UTC timestamp with millisecond precision
#[must_use]
pub fn iso_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}
