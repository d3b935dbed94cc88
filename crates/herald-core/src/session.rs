//! Push sessions
//!
//! A session is one live client connection plus the events it may receive.

use crate::error::DeliveryError;
use crate::message::Frame;
use crate::sink::FrameSink;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Verified identity supplied by the auth gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Opaque user id
    pub id: String,
    /// Display name
    pub name: String,
}

impl Identity {
    /// Create an identity
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Unique session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a random (v4) id
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle: `Connecting -> Registered -> Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, not yet in the registry
    Connecting,
    /// In the registry and receiving broadcasts
    Registered,
    /// Connection released; terminal
    Closed,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Registered,
            _ => Self::Closed,
        }
    }
}

/// One live client connection
pub struct Session {
    id: SessionId,
    identity: Identity,
    authorized_events: HashSet<String>,
    connected_at: DateTime<Utc>,
    sink: Arc<dyn FrameSink>,
    state: AtomicU8,
}

impl Session {
    /// Create a session in the `Connecting` state
    pub fn new(
        identity: Identity,
        authorized_events: impl IntoIterator<Item = String>,
        sink: Arc<dyn FrameSink>,
    ) -> Self {
        Self::with_id(SessionId::new(), identity, authorized_events, sink)
    }

    /// Create a session with a caller-chosen id
    pub fn with_id(
        id: SessionId,
        identity: Identity,
        authorized_events: impl IntoIterator<Item = String>,
        sink: Arc<dyn FrameSink>,
    ) -> Self {
        Self {
            id,
            identity,
            authorized_events: authorized_events.into_iter().collect(),
            connected_at: Utc::now(),
            sink,
            state: AtomicU8::new(SessionState::Connecting as u8),
        }
    }

    /// Session id
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Identity the session was opened for
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Events this session may receive
    #[must_use]
    pub fn authorized_events(&self) -> &HashSet<String> {
        &self.authorized_events
    }

    /// Connect time
    #[must_use]
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Whether `event` frames are delivered to this session
    #[must_use]
    pub fn is_authorized(&self, event: &str) -> bool {
        self.authorized_events.contains(event)
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// `Connecting -> Registered`; false if the session moved on already
    pub(crate) fn mark_registered(&self) -> bool {
        self.state
            .compare_exchange(
                SessionState::Connecting as u8,
                SessionState::Registered as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Whether frames can still reach the client
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() != SessionState::Closed && !self.sink.is_closed()
    }

    /// Push a frame to the client
    pub fn push(&self, frame: Frame) -> Result<(), DeliveryError> {
        if self.state() == SessionState::Closed {
            return Err(DeliveryError::Closed);
        }
        self.sink.push(frame)
    }

    /// Transition to `Closed` and release the connection. Returns true only
    /// for the call that performed the transition.
    pub fn close(&self) -> bool {
        let previous = self.state.swap(SessionState::Closed as u8, Ordering::AcqRel);
        if previous == SessionState::Closed as u8 {
            return false;
        }
        self.sink.close();
        true
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("authorized_events", &self.authorized_events)
            .field("state", &self.state())
            .finish()
    }
}
