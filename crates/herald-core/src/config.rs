//! Broadcast engine settings

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine configuration, immutable after start
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Broker channel every process publishes to and subscribes on
    #[serde(default = "default_channel")]
    pub channel: String,
    /// Heartbeat period in milliseconds; 0 disables heartbeats
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Frames buffered per session before pushes start failing
    #[serde(default = "default_session_buffer")]
    pub session_buffer: usize,
}

fn default_channel() -> String {
    "sse-events".to_string()
}

fn default_heartbeat_interval_ms() -> u64 {
    6_000
}

fn default_session_buffer() -> usize {
    64
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            session_buffer: default_session_buffer(),
        }
    }
}

impl EngineConfig {
    /// Heartbeat period, `None` when disabled
    #[must_use]
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_ms > 0).then(|| Duration::from_millis(self.heartbeat_interval_ms))
    }
}
