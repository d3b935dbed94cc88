//! Observable broker connection state

use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

/// Connection state of a bus client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// First connection attempt in progress
    Connecting,
    /// Connected and subscribed
    Connected,
    /// Connection lost, reconnecting with backoff
    Disconnected,
    /// Closed by the owner; terminal
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Publishes state transitions to any number of watchers and logs them
#[derive(Debug)]
pub struct ConnectionMonitor {
    name: &'static str,
    tx: watch::Sender<ConnectionState>,
}

impl ConnectionMonitor {
    /// Create a monitor in the `Connecting` state
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        let (tx, _) = watch::channel(ConnectionState::Connecting);
        Self { name, tx }
    }

    /// Record a transition; repeated states are not re-announced.
    /// `Closed` is terminal.
    pub fn set(&self, state: ConnectionState) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == state || *current == ConnectionState::Closed {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            info!(client = self.name, state = %state, "Bus connection state changed");
        }
    }

    /// Current state
    #[must_use]
    pub fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Watch future transitions
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transitions_are_observable() {
        let monitor = ConnectionMonitor::new("test");
        let mut rx = monitor.watch();
        assert_eq!(monitor.get(), ConnectionState::Connecting);

        monitor.set(ConnectionState::Connected);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ConnectionState::Connected);
    }

    #[test]
    fn test_closed_is_terminal() {
        let monitor = ConnectionMonitor::new("test");
        monitor.set(ConnectionState::Closed);
        monitor.set(ConnectionState::Connected);
        assert_eq!(monitor.get(), ConnectionState::Closed);
    }
}
