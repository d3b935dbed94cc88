//! Local session registry
//!
//! The live set of sessions connected to this process. Sharded locking keeps
//! connects and disconnects from contending with broadcasts; broadcasts work
//! on [`SessionRegistry::active_sessions`] snapshots.

use crate::error::{DeliveryError, Error, Result};
use crate::message::Frame;
use crate::session::{Session, SessionId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Concurrent map of active sessions
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
}

impl SessionRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session and mark it `Registered`
    pub fn register(&self, session: Arc<Session>) -> Result<()> {
        match self.sessions.entry(session.id()) {
            Entry::Occupied(_) => Err(Error::DuplicateSession { id: session.id() }),
            Entry::Vacant(slot) => {
                if !session.mark_registered() {
                    // Closed before it got here
                    return Err(DeliveryError::Closed.into());
                }
                debug!(session_id = %session.id(), "Session registered");
                slot.insert(session);
                Ok(())
            }
        }
    }

    /// Remove a session and close it. No-op for unknown ids.
    pub fn unregister(&self, id: SessionId) -> Option<Arc<Session>> {
        let (_, session) = self.sessions.remove(&id)?;
        session.close();
        debug!(session_id = %id, "Session unregistered");
        Some(session)
    }

    /// Snapshot of the active sessions, safe to iterate while the registry
    /// changes
    #[must_use]
    pub fn active_sessions(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Best-effort push to one session. Failures leave the session registered.
    pub fn push_to_session(&self, id: SessionId, frame: Frame) -> std::result::Result<(), DeliveryError> {
        let session = self.get(id).ok_or(DeliveryError::NotFound(id))?;
        session.push(frame)
    }

    /// Look up a session
    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|entry| entry.value().clone())
    }

    /// Number of active sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is connected
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of active sessions authorized for each event name
    #[must_use]
    pub fn counts_by_event(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for session in self.active_sessions() {
            for event in session.authorized_events() {
                *counts.entry(event.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Remove every session, returning them (closed)
    pub fn drain(&self) -> Vec<Arc<Session>> {
        let ids: Vec<SessionId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        ids.into_iter().filter_map(|id| self.unregister(id)).collect()
    }
}

#[cfg(test)]
mod tests;
