//! Herald Bus - cluster pub/sub transport
//!
//! This crate carries broadcast messages between Herald processes:
//! - Bus: `Publisher` / `Subscriber` traits the engine is written against
//! - Redis: production clients with bounded publish retries and automatic
//!   resubscription after reconnects
//! - Memory: an in-process broker for tests and single-node deployments
//! - Retry: exponential backoff shared by both brokers

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bus;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod redis_pubsub;
pub mod retry;
pub mod state;

pub use bus::{handler, BusMessage, HandlerError, MessageHandler, Publisher, Subscriber};
pub use config::BrokerConfig;
pub use dispatch::{DispatchReport, HandlerRegistry};
pub use error::{BusError, Result};
pub use memory::{MemoryBroker, MemoryPublisher, MemorySubscriber};
pub use metrics::{BusMetrics, BusMetricsSnapshot, Counter};
pub use redis_pubsub::{RedisPublisher, RedisSubscriber};
pub use retry::{retry_with_backoff, Backoff, RetryConfig, RetryError};
pub use state::{ConnectionMonitor, ConnectionState};
