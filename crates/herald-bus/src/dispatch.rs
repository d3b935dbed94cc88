//! Per-channel handler lists with isolated invocation

use crate::bus::{BusMessage, MessageHandler};
use crate::metrics::BusMetrics;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::RwLock;
use tracing::{debug, error};

/// Outcome of dispatching one message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers that completed
    pub succeeded: usize,
    /// Handlers that returned an error or panicked
    pub failed: usize,
}

/// Handlers registered per channel, invoked in registration order
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Vec<MessageHandler>>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler to `channel`'s list
    pub fn register(&self, channel: &str, handler: MessageHandler) {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.entry(channel.to_string()).or_default().push(handler);
    }

    /// Number of handlers registered for `channel`
    #[must_use]
    pub fn handler_count(&self, channel: &str) -> usize {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.get(channel).map_or(0, Vec::len)
    }

    /// Invoke every handler of the message's channel.
    ///
    /// Errors and panics are caught per handler and logged; the remaining
    /// handlers still run.
    pub fn dispatch(&self, message: &BusMessage, metrics: &BusMetrics) -> DispatchReport {
        // Clone the list so handlers run without holding the lock
        let handlers: Vec<MessageHandler> = {
            let guard = self.handlers.read().unwrap_or_else(|e| e.into_inner());
            match guard.get(&message.channel) {
                Some(list) => list.clone(),
                None => {
                    debug!(channel = %message.channel, "No handlers for channel");
                    return DispatchReport::default();
                }
            }
        };

        let mut report = DispatchReport::default();
        for (index, handler) in handlers.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| handler(message))) {
                Ok(Ok(())) => {
                    report.succeeded += 1;
                    metrics.dispatched.inc();
                }
                Ok(Err(e)) => {
                    report.failed += 1;
                    metrics.handler_failures.inc();
                    error!(channel = %message.channel, handler = index, error = %e, "Bus handler failed");
                }
                Err(_) => {
                    report.failed += 1;
                    metrics.handler_failures.inc();
                    error!(channel = %message.channel, handler = index, "Bus handler panicked");
                }
            }
        }
        report
    }
}
