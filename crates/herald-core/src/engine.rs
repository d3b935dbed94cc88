//! Broadcast Engine
//!
//! Bridges the per-process session registry and the cluster bus:
//!
//! - `publish` turns an application event into a bus message on the shared
//!   channel, so every process (this one included) sees it
//! - inbound bus messages are validated and pushed to the local sessions
//!   authorized for the event
//! - heartbeats go straight to every local session, never through the bus
//!
//! ## Usage
//!
//! ```ignore
//! let engine = BroadcastEngine::new(config, publisher, subscriber);
//! engine.start().await?;
//!
//! let (lease, frames) = engine.connect_channel(Some(identity), Some(events))?;
//! // stream `frames` to the client; dropping `lease` disconnects
//!
//! engine.publish("newRent", json!({"message": "rent created"})).await?;
//! engine.close().await?;
//! ```

use crate::config::EngineConfig;
use crate::error::{AuthError, Error, Result};
use crate::heartbeat::spawn_heartbeat;
use crate::message::{validate_event_name, EventMessage, Frame};
use crate::registry::SessionRegistry;
use crate::session::{Identity, Session, SessionId};
use crate::sink::{self, FrameSink};
use chrono::Utc;
use herald_bus::{handler, BusMetricsSnapshot, ConnectionState, Counter, Publisher, Subscriber};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of one local broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Sessions authorized for the event
    pub matched: usize,
    /// Frames queued successfully
    pub delivered: usize,
    /// Pushes that failed
    pub failed: usize,
    /// Authorized sessions skipped because they were already closed
    pub skipped: usize,
}

/// Point-in-time engine statistics
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    /// Locally connected sessions
    pub active_sessions: usize,
    /// Local sessions authorized per event name
    pub sessions_by_event: BTreeMap<String, usize>,
    /// Subscriber connection state
    pub bus_state: ConnectionState,
    /// Valid bus messages broadcast locally
    pub messages_broadcast: u64,
    /// Bus payloads dropped as malformed
    pub invalid_messages: u64,
    /// Frames pushed to sessions
    pub frames_delivered: u64,
    /// Failed pushes
    pub delivery_failures: u64,
    /// Heartbeat rounds sent
    pub heartbeats: u64,
    /// Publisher counters
    pub publisher: BusMetricsSnapshot,
    /// Subscriber counters
    pub subscriber: BusMetricsSnapshot,
}

#[derive(Default)]
struct EngineCounters {
    messages_broadcast: Counter,
    invalid_messages: Counter,
    frames_delivered: Counter,
    delivery_failures: Counter,
    heartbeats: Counter,
}

struct EngineInner {
    config: EngineConfig,
    registry: SessionRegistry,
    publisher: Arc<dyn Publisher>,
    subscriber: Arc<dyn Subscriber>,
    counters: EngineCounters,
    cancel: CancellationToken,
    started: AtomicBool,
    closed: AtomicBool,
    /// Held shared while a session registers and exclusively while the
    /// engine flips to closed, so no session registers after the final drain
    lifecycle: RwLock<()>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

/// Distributed broadcast engine (cheap to clone)
#[derive(Clone)]
pub struct BroadcastEngine {
    inner: Arc<EngineInner>,
}

impl BroadcastEngine {
    /// Create an engine over the given bus clients. Call [`Self::start`]
    /// before expecting remote events.
    pub fn new(
        config: EngineConfig,
        publisher: Arc<dyn Publisher>,
        subscriber: Arc<dyn Subscriber>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                registry: SessionRegistry::new(),
                publisher,
                subscriber,
                counters: EngineCounters::default(),
                cancel: CancellationToken::new(),
                started: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                lifecycle: RwLock::new(()),
                heartbeat: Mutex::new(None),
            }),
        }
    }

    /// Subscribe to the broadcast channel and start the heartbeat. Idempotent.
    pub async fn start(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            debug!("Broadcast engine already started");
            return Ok(());
        }

        let channel = self.inner.config.channel.clone();
        if let Err(e) = self.inner.subscriber.subscribe(&channel).await {
            // Leave the engine startable again
            self.inner.started.store(false, Ordering::SeqCst);
            return Err(Error::Subscribe(e));
        }
        let weak: Weak<EngineInner> = Arc::downgrade(&self.inner);
        self.inner.subscriber.on_message(
            &channel,
            handler(move |msg| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_bus_message(&msg.payload);
                }
                Ok(())
            }),
        );

        if let Some(period) = self.inner.config.heartbeat_interval() {
            let weak = Arc::downgrade(&self.inner);
            let handle = spawn_heartbeat(period, self.inner.cancel.clone(), move || {
                match weak.upgrade() {
                    Some(inner) => {
                        inner.heartbeat_tick();
                        true
                    }
                    None => false,
                }
            });
            *self.inner.heartbeat.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        }

        info!(
            channel = %channel,
            heartbeat_ms = self.inner.config.heartbeat_interval_ms,
            "Broadcast engine started"
        );
        Ok(())
    }

    /// Open a session for an authenticated client.
    ///
    /// Both the identity and the authorized-event set must be present
    /// (an empty set is allowed and receives only heartbeats). The session is
    /// registered, sent a `connection` acknowledgment, and stays registered
    /// until the returned lease is dropped.
    pub fn connect(
        &self,
        identity: Option<Identity>,
        authorized_events: Option<Vec<String>>,
        sink: Arc<dyn FrameSink>,
    ) -> Result<SessionLease> {
        let session = {
            let _registering = self.inner.lifecycle.read().unwrap_or_else(|e| e.into_inner());
            if self.inner.closed.load(Ordering::SeqCst) {
                return Err(Error::Closed);
            }
            let identity = identity
                .filter(|identity| !identity.id.is_empty())
                .ok_or(AuthError::MissingIdentity)?;
            let authorized_events =
                authorized_events.ok_or(AuthError::MissingAuthorizedEvents)?;

            let session = Arc::new(Session::new(identity, authorized_events, sink));
            self.inner.registry.register(session.clone())?;
            session
        };

        let lease = SessionLease {
            session: session.clone(),
            engine: Arc::downgrade(&self.inner),
        };

        // Dropping the lease on this error path unregisters the session
        session.push(Frame::connection_ack(Utc::now()))?;

        info!(
            session_id = %session.id(),
            user_id = %session.identity().id,
            user = %session.identity().name,
            events = session.authorized_events().len(),
            "Client connected"
        );
        Ok(lease)
    }

    /// [`Self::connect`] with a fresh bounded channel as the connection; the
    /// receiver yields the frames to write to the client
    pub fn connect_channel(
        &self,
        identity: Option<Identity>,
        authorized_events: Option<Vec<String>>,
    ) -> Result<(SessionLease, mpsc::Receiver<Frame>)> {
        let (sink, rx) = sink::channel(self.inner.config.session_buffer);
        let lease = self.connect(identity, authorized_events, Arc::new(sink))?;
        Ok((lease, rx))
    }

    /// Publish an event to every process through the bus.
    ///
    /// Returns the broker's fan-out count: subscribed processes, not clients.
    pub async fn publish(&self, event: &str, data: Value) -> Result<u64> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        validate_event_name(event)?;
        let message = EventMessage::new(event, data);
        match self
            .inner
            .publisher
            .publish(&self.inner.config.channel, &message.to_value())
            .await
        {
            Ok(receivers) => {
                debug!(event = %event, receivers = receivers, "Event published");
                Ok(receivers)
            }
            Err(e) => {
                error!(event = %event, error = %e, "Failed to publish event");
                Err(Error::Publish(e))
            }
        }
    }

    /// Handle a raw bus payload; malformed payloads are logged and dropped
    pub fn on_bus_message(&self, raw: &str) -> Option<BroadcastReport> {
        self.inner.on_bus_message(raw)
    }

    /// Push a validated message to every authorized local session
    pub fn broadcast_local(&self, message: &EventMessage) -> BroadcastReport {
        self.inner.broadcast_local(message)
    }

    /// Push one heartbeat to every local session; returns frames delivered
    pub fn heartbeat_tick(&self) -> usize {
        self.inner.heartbeat_tick()
    }

    /// Stop the heartbeat, notify and close every session, then release the
    /// bus connections. Idempotent.
    pub async fn close(&self) -> Result<()> {
        {
            let _closing = self.inner.lifecycle.write().unwrap_or_else(|e| e.into_inner());
            if self.inner.closed.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
        }
        info!(
            active_sessions = self.inner.registry.len(),
            "Broadcast engine shutting down"
        );

        self.inner.cancel.cancel();
        let heartbeat = self
            .inner
            .heartbeat
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = heartbeat {
            let _ = handle.await;
        }

        for session in self.inner.registry.active_sessions() {
            if let Err(e) = session.push(Frame::shutdown()) {
                debug!(session_id = %session.id(), error = %e, "Shutdown notice not delivered");
            }
        }
        let closed = self.inner.registry.drain();
        debug!(sessions = closed.len(), "Sessions closed");

        if let Err(e) = self.inner.subscriber.close().await {
            warn!(error = %e, "Error closing bus subscriber");
        }
        if let Err(e) = self.inner.publisher.close().await {
            warn!(error = %e, "Error closing bus publisher");
        }

        info!("Broadcast engine stopped");
        Ok(())
    }

    /// Whether [`Self::close`] has run
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Number of locally connected sessions
    #[must_use]
    pub fn active_session_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Local sessions authorized per event name
    #[must_use]
    pub fn sessions_by_event(&self) -> BTreeMap<String, usize> {
        self.inner.registry.counts_by_event()
    }

    /// The local registry
    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    /// Engine settings
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Watch the subscriber's connection state
    #[must_use]
    pub fn watch_bus_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.subscriber.watch_state()
    }

    /// Current statistics
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        let counters = &self.inner.counters;
        EngineStats {
            active_sessions: self.inner.registry.len(),
            sessions_by_event: self.inner.registry.counts_by_event(),
            bus_state: self.inner.subscriber.state(),
            messages_broadcast: counters.messages_broadcast.get(),
            invalid_messages: counters.invalid_messages.get(),
            frames_delivered: counters.frames_delivered.get(),
            delivery_failures: counters.delivery_failures.get(),
            heartbeats: counters.heartbeats.get(),
            publisher: self.inner.publisher.metrics(),
            subscriber: self.inner.subscriber.metrics(),
        }
    }
}

impl EngineInner {
    fn on_bus_message(&self, raw: &str) -> Option<BroadcastReport> {
        match EventMessage::parse(raw) {
            Ok(message) => Some(self.broadcast_local(&message)),
            Err(e) => {
                self.counters.invalid_messages.inc();
                warn!(error = %e, "Dropping invalid bus message");
                None
            }
        }
    }

    fn broadcast_local(&self, message: &EventMessage) -> BroadcastReport {
        self.counters.messages_broadcast.inc();
        let sessions = self.registry.active_sessions();
        let mut report = BroadcastReport::default();

        for session in sessions.iter().filter(|s| s.is_authorized(&message.event)) {
            report.matched += 1;
            if !session.is_open() {
                report.skipped += 1;
                continue;
            }
            match session.push(Frame::from(message.clone())) {
                Ok(()) => {
                    report.delivered += 1;
                    self.counters.frames_delivered.inc();
                }
                Err(e) => {
                    report.failed += 1;
                    self.counters.delivery_failures.inc();
                    error!(
                        session_id = %session.id(),
                        user_id = %session.identity().id,
                        event = %message.event,
                        error = %e,
                        "Failed to deliver message to session"
                    );
                }
            }
        }

        debug!(
            event = %message.event,
            delivered = report.delivered,
            total = sessions.len(),
            "Message broadcast"
        );
        report
    }

    fn heartbeat_tick(&self) -> usize {
        let sessions = self.registry.active_sessions();
        if sessions.is_empty() {
            return 0;
        }
        self.counters.heartbeats.inc();
        debug!(sessions = sessions.len(), "Sending heartbeat");

        let frame = Frame::heartbeat(Utc::now());
        let mut delivered = 0;
        for session in sessions.iter().filter(|s| s.is_open()) {
            match session.push(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    self.counters.delivery_failures.inc();
                    warn!(session_id = %session.id(), error = %e, "Heartbeat not delivered");
                }
            }
        }
        delivered
    }

    fn disconnect(&self, id: SessionId) {
        if let Some(session) = self.registry.unregister(id) {
            info!(
                session_id = %id,
                user_id = %session.identity().id,
                user = %session.identity().name,
                "Client disconnected"
            );
        }
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Keeps a session registered; dropping it unregisters and closes the session
pub struct SessionLease {
    session: Arc<Session>,
    engine: Weak<EngineInner>,
}

impl SessionLease {
    /// Id of the leased session
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.session.id()
    }

    /// The leased session
    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        match self.engine.upgrade() {
            Some(engine) => engine.disconnect(self.session.id()),
            None => {
                self.session.close();
            }
        }
    }
}

impl std::fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLease")
            .field("session_id", &self.session.id())
            .finish()
    }
}
