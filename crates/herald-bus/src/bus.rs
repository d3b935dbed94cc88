//! Publisher / Subscriber abstraction over the external broker.
//!
//! The broadcast engine only ever sees these traits, so the Redis client can
//! be swapped for the in-memory broker in tests or single-process setups.

use crate::error::Result;
use crate::metrics::BusMetricsSnapshot;
use crate::state::ConnectionState;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;

/// A raw message received from a broker channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Channel the message arrived on
    pub channel: String,
    /// Raw payload (JSON text for messages produced by a [`Publisher`])
    pub payload: String,
}

impl BusMessage {
    /// Create a message
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// Error type handlers may return; it is logged, never propagated
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Callback invoked for every inbound message on a channel
pub type MessageHandler = Arc<dyn Fn(&BusMessage) -> std::result::Result<(), HandlerError> + Send + Sync>;

/// Sends messages to named broker channels
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Serialize `message` and send it to `channel`.
    ///
    /// Transient failures are retried with bounded, increasing backoff.
    /// Returns the broker's fan-out count (number of subscribers that
    /// received the message); after the retry bound is exceeded returns
    /// [`crate::BusError::Connection`].
    async fn publish(&self, channel: &str, message: &Value) -> Result<u64>;

    /// Counters for this client
    fn metrics(&self) -> BusMetricsSnapshot;

    /// Terminate the broker connection; in-flight sends complete first.
    async fn close(&self) -> Result<()>;
}

/// Receives messages from named broker channels and dispatches them
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Subscribe to `channel`. Idempotent. The subscription survives broker
    /// reconnects without further calls.
    async fn subscribe(&self, channel: &str) -> Result<()>;

    /// Register a handler for `channel`. Handlers run in registration order;
    /// a failing handler never prevents the others from running.
    fn on_message(&self, channel: &str, handler: MessageHandler);

    /// Current connection state
    fn state(&self) -> ConnectionState;

    /// Watch connection state transitions
    fn watch_state(&self) -> watch::Receiver<ConnectionState>;

    /// Counters for this client
    fn metrics(&self) -> BusMetricsSnapshot;

    /// Stop listening and release the broker connection
    async fn close(&self) -> Result<()>;
}

/// Build a [`MessageHandler`] from a closure
pub fn handler<F>(f: F) -> MessageHandler
where
    F: Fn(&BusMessage) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
{
    Arc::new(f)
}
