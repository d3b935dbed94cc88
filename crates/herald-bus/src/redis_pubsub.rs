//! Redis pub/sub clients.
//!
//! Publishing and subscribing use separate connections: a subscribed Redis
//! connection cannot issue ordinary commands.
//!
//! The subscriber owns a background listener with an outer reconnect loop.
//! The set of desired channels lives outside the connection, so every
//! reconnect re-subscribes to all of them without caller involvement.

use crate::bus::{BusMessage, MessageHandler, Publisher, Subscriber};
use crate::config::BrokerConfig;
use crate::dispatch::HandlerRegistry;
use crate::error::{BusError, Result};
use crate::metrics::{BusMetrics, BusMetricsSnapshot};
use crate::retry::{retry_with_backoff, Backoff, RetryConfig};
use crate::state::{ConnectionMonitor, ConnectionState};
use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

fn open_client(config: &BrokerConfig) -> Result<redis::Client> {
    config.validate()?;
    redis::Client::open(config.connection_url()).map_err(|e| BusError::InvalidConfig {
        field: "redis".to_string(),
        message: e.to_string(),
    })
}

fn timed_out(what: &str, after: Duration) -> BusError {
    BusError::Broker(format!("{} timed out after {}ms", what, after.as_millis()))
}

// =============================================================================
// Publisher
// =============================================================================

/// Publishes JSON messages with `PUBLISH` over a shared multiplexed connection
pub struct RedisPublisher {
    client: redis::Client,
    connection: Mutex<Option<MultiplexedConnection>>,
    connect_timeout: Duration,
    retry: RetryConfig,
    metrics: BusMetrics,
    closed: AtomicBool,
}

impl RedisPublisher {
    /// Create a publisher. The connection is established lazily on the first
    /// publish; malformed configuration is rejected here.
    pub fn new(config: &BrokerConfig) -> Result<Self> {
        let client = open_client(config)?;
        info!(url = %config.redacted_url(), "Redis publisher configured");
        Ok(Self {
            client,
            connection: Mutex::new(None),
            connect_timeout: config.connect_timeout(),
            retry: config.publish_retry(),
            metrics: BusMetrics::new(),
            closed: AtomicBool::new(false),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = timeout(
            self.connect_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| timed_out("connect", self.connect_timeout))??;

        debug!("Redis publisher connected");
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn publish_once(&self, channel: &str, payload: &str) -> Result<u64> {
        let mut conn = self.connection().await?;
        let sent = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async::<u64>(&mut conn)
            .await;

        match sent {
            Ok(receivers) => Ok(receivers),
            Err(e) => {
                let err = BusError::from(e);
                if err.is_transient() {
                    // Force a fresh connection on the next attempt
                    self.connection.lock().await.take();
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl Publisher for RedisPublisher {
    async fn publish(&self, channel: &str, message: &Value) -> Result<u64> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        let payload = serde_json::to_string(message)?;
        let payload = payload.as_str();

        let result = retry_with_backoff(
            &self.retry,
            || self.publish_once(channel, payload),
            BusError::is_transient,
        )
        .await;

        match result {
            Ok(receivers) => {
                self.metrics.published.inc();
                debug!(channel = %channel, receivers = receivers, "Message published");
                Ok(receivers)
            }
            Err(e) => {
                self.metrics.publish_failures.inc();
                error!(channel = %channel, attempts = e.attempts, error = %e.last_error, "Publish failed");
                Err(e.into())
            }
        }
    }

    fn metrics(&self) -> BusMetricsSnapshot {
        self.metrics.snapshot()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        // In-flight publishes hold their own clone of the connection
        self.connection.lock().await.take();
        info!("Redis publisher closed");
        Ok(())
    }
}

// =============================================================================
// Subscriber
// =============================================================================

enum Command {
    Subscribe {
        channel: String,
        ack: oneshot::Sender<Result<()>>,
    },
}

/// Subscribes to Redis channels and dispatches every message to the
/// handlers registered for its channel
pub struct RedisSubscriber {
    channels: Arc<std::sync::Mutex<BTreeSet<String>>>,
    handlers: Arc<HandlerRegistry>,
    metrics: BusMetrics,
    monitor: Arc<ConnectionMonitor>,
    commands: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RedisSubscriber {
    /// Validate `config` and start the background listener.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(config: &BrokerConfig) -> Result<Self> {
        let client = open_client(config)?;

        let channels = Arc::new(std::sync::Mutex::new(BTreeSet::new()));
        let handlers = Arc::new(HandlerRegistry::new());
        let metrics = BusMetrics::new();
        let monitor = Arc::new(ConnectionMonitor::new("redis-subscriber"));
        let (commands, command_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let listener = Listener {
            client,
            connect_timeout: config.connect_timeout(),
            backoff: Backoff::new(config.reconnect_backoff()),
            channels: channels.clone(),
            handlers: handlers.clone(),
            metrics: metrics.clone(),
            monitor: monitor.clone(),
            commands: command_rx,
            cancel: cancel.clone(),
            connected_once: false,
        };
        info!(url = %config.redacted_url(), "Redis subscriber starting");
        let task = tokio::spawn(listener.run());

        Ok(Self {
            channels,
            handlers,
            metrics,
            monitor,
            commands,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }
}

#[async_trait]
impl Subscriber for RedisSubscriber {
    async fn subscribe(&self, channel: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(BusError::Closed);
        }
        let added = self
            .channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(channel.to_string());
        if !added {
            debug!(channel = %channel, "Already subscribed");
            return Ok(());
        }

        let (ack, done) = oneshot::channel();
        self.commands
            .send(Command::Subscribe {
                channel: channel.to_string(),
                ack,
            })
            .map_err(|_| BusError::Closed)?;
        done.await.map_err(|_| BusError::Closed)?
    }

    fn on_message(&self, channel: &str, handler: MessageHandler) {
        self.handlers.register(channel, handler);
    }

    fn state(&self) -> ConnectionState {
        self.monitor.get()
    }

    fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.monitor.watch()
    }

    fn metrics(&self) -> BusMetricsSnapshot {
        self.metrics.snapshot()
    }

    async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Redis listener ended abnormally");
            }
        }
        self.monitor.set(ConnectionState::Closed);
        Ok(())
    }
}

impl Drop for RedisSubscriber {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Why a live connection stopped being serviced
enum Exit {
    Cancelled,
    Lost,
}

enum Event {
    Cancelled,
    Message(Option<redis::Msg>),
    Command(Option<Command>),
}

struct Listener {
    client: redis::Client,
    connect_timeout: Duration,
    backoff: Backoff,
    channels: Arc<std::sync::Mutex<BTreeSet<String>>>,
    handlers: Arc<HandlerRegistry>,
    metrics: BusMetrics,
    monitor: Arc<ConnectionMonitor>,
    commands: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
    connected_once: bool,
}

impl Listener {
    async fn run(mut self) {
        loop {
            match self.connect_and_listen().await {
                Ok(Exit::Cancelled) => break,
                Ok(Exit::Lost) => warn!("Redis subscription stream ended"),
                Err(e) => warn!(error = %e, "Redis subscriber connection failed"),
            }
            self.monitor.set(ConnectionState::Disconnected);

            let delay = self.backoff.next_delay();
            info!(
                delay_ms = delay.as_millis() as u64,
                attempt = self.backoff.attempts(),
                "Reconnecting to Redis"
            );
            if !self.wait_backoff(delay).await {
                break;
            }
        }
        self.monitor.set(ConnectionState::Closed);
        debug!("Redis listener stopped");
    }

    /// Sleep for `delay`, acknowledging subscribe requests meanwhile: the
    /// channel is already in the desired set and is joined on reconnect.
    /// Returns false when the subscriber was closed.
    async fn wait_backoff(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = &mut sleep => return true,
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Subscribe { channel, ack }) => {
                        debug!(channel = %channel, "Subscription deferred until reconnect");
                        let _ = ack.send(Ok(()));
                    }
                    None => return false,
                },
            }
        }
    }

    async fn connect_and_listen(&mut self) -> Result<Exit> {
        if self.connected_once {
            self.monitor.set(ConnectionState::Disconnected);
        } else {
            self.monitor.set(ConnectionState::Connecting);
        }

        let mut pubsub = timeout(self.connect_timeout, self.client.get_async_pubsub())
            .await
            .map_err(|_| timed_out("connect", self.connect_timeout))??;

        let desired: Vec<String> = self
            .channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect();
        for channel in &desired {
            pubsub.subscribe(channel).await?;
        }

        if self.connected_once {
            self.metrics.reconnects.inc();
            info!(channels = desired.len(), "Reconnected to Redis, subscriptions restored");
        } else {
            info!(channels = desired.len(), "Connected to Redis");
        }
        self.connected_once = true;
        self.backoff.reset();
        self.monitor.set(ConnectionState::Connected);

        loop {
            let event = {
                let mut stream = pubsub.on_message();
                tokio::select! {
                    _ = self.cancel.cancelled() => Event::Cancelled,
                    msg = stream.next() => Event::Message(msg),
                    cmd = self.commands.recv() => Event::Command(cmd),
                }
            };

            match event {
                Event::Cancelled | Event::Command(None) => return Ok(Exit::Cancelled),
                Event::Message(None) => return Ok(Exit::Lost),
                Event::Message(Some(msg)) => self.handle(&msg),
                Event::Command(Some(Command::Subscribe { channel, ack })) => {
                    match pubsub.subscribe(&channel).await {
                        Ok(()) => {
                            info!(channel = %channel, "Subscribed to channel");
                            let _ = ack.send(Ok(()));
                        }
                        Err(e) => {
                            // Still in the desired set; joined after reconnect
                            let _ = ack.send(Ok(()));
                            return Err(e.into());
                        }
                    }
                }
            }
        }
    }

    fn handle(&self, msg: &redis::Msg) {
        let channel = msg.get_channel_name();
        match msg.get_payload::<String>() {
            Ok(payload) => {
                self.metrics.received.inc();
                let message = BusMessage::new(channel, payload);
                self.handlers.dispatch(&message, &self.metrics);
            }
            Err(e) => {
                warn!(channel = %channel, error = %e, "Dropping non-text Redis payload");
            }
        }
    }
}
