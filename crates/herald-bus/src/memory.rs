//! In-process broker.
//!
//! Every publisher and subscriber created from one [`MemoryBroker`] shares its
//! channels, so several engines in one process behave like several processes
//! on one Redis. `disconnect` / `reconnect` simulate a broker outage: live
//! subscriptions are severed and must be re-established by the subscriber.

use crate::bus::{BusMessage, MessageHandler, Publisher, Subscriber};
use crate::dispatch::HandlerRegistry;
use crate::error::{BusError, Result};
use crate::metrics::{BusMetrics, BusMetricsSnapshot};
use crate::retry::{retry_with_backoff, Backoff, RetryConfig};
use crate::state::{ConnectionMonitor, ConnectionState};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default per-channel buffer
const DEFAULT_CAPACITY: usize = 1024;

struct BrokerInner {
    channels: RwLock<HashMap<String, broadcast::Sender<String>>>,
    online: AtomicBool,
    capacity: usize,
}

/// Shared in-memory broker
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl MemoryBroker {
    /// Create an online broker with the default channel capacity
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create an online broker buffering `capacity` messages per channel
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                channels: RwLock::new(HashMap::new()),
                online: AtomicBool::new(true),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Create a publisher with the default retry policy
    #[must_use]
    pub fn publisher(&self) -> MemoryPublisher {
        MemoryPublisher::new(self.clone(), RetryConfig::default())
    }

    /// Create a subscriber with the default reconnection delays
    #[must_use]
    pub fn subscriber(&self) -> MemorySubscriber {
        MemorySubscriber::new(
            self.clone(),
            RetryConfig::new(u32::MAX, Duration::from_millis(10), Duration::from_millis(500)),
        )
    }

    /// Whether the broker accepts connections
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Simulate a broker outage: drop every subscription, refuse traffic
    pub fn disconnect(&self) {
        self.inner.online.store(false, Ordering::SeqCst);
        let mut channels = self.inner.channels.write().unwrap_or_else(|e| e.into_inner());
        channels.clear();
        warn!("Memory broker went offline");
    }

    /// End a simulated outage
    pub fn reconnect(&self) {
        self.inner.online.store(true, Ordering::SeqCst);
        info!("Memory broker back online");
    }

    /// Number of live subscriptions on `channel`
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        let channels = self.inner.channels.read().unwrap_or_else(|e| e.into_inner());
        channels.get(channel).map_or(0, broadcast::Sender::receiver_count)
    }

    fn send(&self, channel: &str, payload: &str) -> Result<u64> {
        if !self.is_online() {
            return Err(BusError::Broker("broker offline".to_string()));
        }
        let channels = self.inner.channels.read().unwrap_or_else(|e| e.into_inner());
        // No sender means nobody ever subscribed: zero receivers
        let receivers = channels
            .get(channel)
            .and_then(|tx| tx.send(payload.to_string()).ok())
            .unwrap_or(0);
        Ok(receivers as u64)
    }

    fn receiver(&self, channel: &str) -> Result<broadcast::Receiver<String>> {
        if !self.is_online() {
            return Err(BusError::Broker("broker offline".to_string()));
        }
        let mut channels = self.inner.channels.write().unwrap_or_else(|e| e.into_inner());
        let tx = channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0);
        Ok(tx.subscribe())
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// Publisher half of the in-memory broker
pub struct MemoryPublisher {
    broker: MemoryBroker,
    retry: RetryConfig,
    metrics: BusMetrics,
    closed: AtomicBool,
}

impl MemoryPublisher {
    /// Create a publisher using `retry` as its bounded retry policy
    #[must_use]
    pub fn new(broker: MemoryBroker, retry: RetryConfig) -> Self {
        Self {
            broker,
            retry,
            metrics: BusMetrics::new(),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, channel: &str, message: &Value) -> Result<u64> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        let payload = serde_json::to_string(message)?;
        let payload = payload.as_str();
        let broker = &self.broker;

        let result = retry_with_backoff(
            &self.retry,
            || async move { broker.send(channel, payload) },
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
                Err(e.into())
            }
        }
    }

    fn metrics(&self) -> BusMetricsSnapshot {
        self.metrics.snapshot()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Subscriber half of the in-memory broker.
///
/// Each subscribed channel is served by one task, so messages of a channel
/// are dispatched in the order the broker delivered them.
pub struct MemorySubscriber {
    broker: MemoryBroker,
    reconnect: RetryConfig,
    handlers: Arc<HandlerRegistry>,
    metrics: BusMetrics,
    monitor: Arc<ConnectionMonitor>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl MemorySubscriber {
    /// Create a subscriber that paces reconnection with `reconnect`
    #[must_use]
    pub fn new(broker: MemoryBroker, reconnect: RetryConfig) -> Self {
        let monitor = ConnectionMonitor::new("memory-subscriber");
        if broker.is_online() {
            monitor.set(ConnectionState::Connected);
        }
        Self {
            broker,
            reconnect,
            handlers: Arc::new(HandlerRegistry::new()),
            metrics: BusMetrics::new(),
            monitor: Arc::new(monitor),
            tasks: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl Subscriber for MemorySubscriber {
    async fn subscribe(&self, channel: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(BusError::Closed);
        }
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if tasks.contains_key(channel) {
            debug!(channel = %channel, "Already subscribed");
            return Ok(());
        }

        // Subscribe before returning so nothing published afterwards is missed
        let initial = match self.broker.receiver(channel) {
            Ok(rx) => Some(rx),
            Err(e) => {
                warn!(channel = %channel, error = %e, "Broker unavailable, subscription deferred");
                self.monitor.set(ConnectionState::Disconnected);
                None
            }
        };

        let listener = ChannelListener {
            broker: self.broker.clone(),
            channel: channel.to_string(),
            handlers: self.handlers.clone(),
            metrics: self.metrics.clone(),
            monitor: self.monitor.clone(),
            backoff: Backoff::new(self.reconnect.clone()),
            cancel: self.cancel.clone(),
        };
        tasks.insert(channel.to_string(), tokio::spawn(listener.run(initial)));
        info!(channel = %channel, "Subscribed to channel");
        Ok(())
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
        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
        self.monitor.set(ConnectionState::Closed);
        Ok(())
    }
}

impl Drop for MemorySubscriber {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct ChannelListener {
    broker: MemoryBroker,
    channel: String,
    handlers: Arc<HandlerRegistry>,
    metrics: BusMetrics,
    monitor: Arc<ConnectionMonitor>,
    backoff: Backoff,
    cancel: CancellationToken,
}

impl ChannelListener {
    async fn run(mut self, mut initial: Option<broadcast::Receiver<String>>) {
        let mut lost = initial.is_none();

        loop {
            let mut rx = match initial.take() {
                Some(rx) => rx,
                None => match self.broker.receiver(&self.channel) {
                    Ok(rx) => {
                        if lost {
                            self.metrics.reconnects.inc();
                            info!(channel = %self.channel, "Resubscribed after broker reconnect");
                        }
                        rx
                    }
                    Err(_) => {
                        let delay = self.backoff.next_delay();
                        tokio::select! {
                            _ = self.cancel.cancelled() => return,
                            _ = tokio::time::sleep(delay) => continue,
                        }
                    }
                },
            };

            lost = false;
            self.backoff.reset();
            self.monitor.set(ConnectionState::Connected);

            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    received = rx.recv() => match received {
                        Ok(payload) => {
                            self.metrics.received.inc();
                            let message = BusMessage::new(self.channel.as_str(), payload);
                            self.handlers.dispatch(&message, &self.metrics);
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(channel = %self.channel, skipped = skipped, "Subscriber lagged, messages skipped");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            warn!(channel = %self.channel, "Broker connection lost");
                            self.monitor.set(ConnectionState::Disconnected);
                            lost = true;
                            break;
                        }
                    }
                }
            }
        }
    }
}
