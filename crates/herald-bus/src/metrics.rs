//! Bus counters
//!
//! Lock-free counters shared between a bus client and whoever reports on it.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A thread-safe counter metric
#[derive(Debug, Default, Clone)]
pub struct Counter {
    value: Arc<AtomicU64>,
}

impl Counter {
    /// Create a new counter
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the counter by 1
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the counter by a specific amount
    pub fn inc_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Get the current value
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Counters for one bus client (publisher or subscriber)
#[derive(Debug, Default, Clone)]
pub struct BusMetrics {
    /// Messages accepted by the broker
    pub published: Counter,
    /// Publishes that failed after all retries
    pub publish_failures: Counter,
    /// Messages received from the broker
    pub received: Counter,
    /// Handler invocations that completed
    pub dispatched: Counter,
    /// Handler invocations that returned an error or panicked
    pub handler_failures: Counter,
    /// Reconnections performed by the subscriber
    pub reconnects: Counter,
}

/// Point-in-time copy of [`BusMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BusMetricsSnapshot {
    /// Messages accepted by the broker
    pub published: u64,
    /// Publishes that failed after all retries
    pub publish_failures: u64,
    /// Messages received from the broker
    pub received: u64,
    /// Handler invocations that completed
    pub dispatched: u64,
    /// Handler invocations that failed
    pub handler_failures: u64,
    /// Subscriber reconnections
    pub reconnects: u64,
}

impl BusMetrics {
    /// Create zeroed metrics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read all counters
    #[must_use]
    pub fn snapshot(&self) -> BusMetricsSnapshot {
        BusMetricsSnapshot {
            published: self.published.get(),
            publish_failures: self.publish_failures.get(),
            received: self.received.get(),
            dispatched: self.dispatched.get(),
            handler_failures: self.handler_failures.get(),
            reconnects: self.reconnects.get(),
        }
    }
}
