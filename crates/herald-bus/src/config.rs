//! Broker connection configuration
//!
//! Immutable after process start. `validate` runs inside every broker
//! constructor so malformed settings fail before any connection is attempted.

use crate::error::{BusError, Result};
use crate::retry::RetryConfig;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Broker connection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Broker host name
    #[serde(default = "default_host")]
    pub host: String,
    /// Broker port
    #[serde(default = "default_port")]
    pub port: u16,
    /// ACL user name
    #[serde(default)]
    pub username: Option<String>,
    /// Password
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Logical database index
    #[serde(default)]
    pub db: i64,
    /// Connect over TLS (`rediss://`)
    #[serde(default)]
    pub tls: bool,
    /// Timeout for establishing a connection
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Attempts per publish before surfacing a connection error
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First retry delay
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,
    /// Cap on publish retry delay
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Cap on subscriber reconnection delay
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    6379
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_initial_delay_ms() -> u64 {
    100
}

fn default_retry_max_delay_ms() -> u64 {
    2_000
}

fn default_reconnect_max_delay_ms() -> u64 {
    30_000
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: None,
            password: None,
            db: 0,
            tls: false,
            connect_timeout_ms: default_connect_timeout_ms(),
            max_retries: default_max_retries(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
        }
    }
}

impl BrokerConfig {
    /// Reject settings no broker connection could work with
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(invalid("host", "must not be empty"));
        }
        if self.port == 0 {
            return Err(invalid("port", "must be between 1 and 65535"));
        }
        if self.db < 0 {
            return Err(invalid("db", "must not be negative"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(invalid("connect_timeout_ms", "must be positive"));
        }
        if self.max_retries == 0 {
            return Err(invalid("max_retries", "must allow at least one attempt"));
        }
        if self.retry_initial_delay_ms > self.retry_max_delay_ms {
            return Err(invalid(
                "retry_initial_delay_ms",
                "must not exceed retry_max_delay_ms",
            ));
        }
        if self.username.is_some() && self.password.is_none() {
            return Err(invalid("password", "required when username is set"));
        }
        Ok(())
    }

    /// Connection URL in the form accepted by `redis::Client::open`
    #[must_use]
    pub fn connection_url(&self) -> String {
        let scheme = if self.tls { "rediss" } else { "redis" };
        let auth = match (&self.username, &self.password) {
            (Some(user), Some(pass)) => format!("{}:{}@", encode(user), encode(pass)),
            (None, Some(pass)) => format!(":{}@", encode(pass)),
            _ => String::new(),
        };
        format!("{}://{}{}:{}/{}", scheme, auth, self.host, self.port, self.db)
    }

    /// URL with the password masked, for logs
    #[must_use]
    pub fn redacted_url(&self) -> String {
        let scheme = if self.tls { "rediss" } else { "redis" };
        let auth = match (&self.username, &self.password) {
            (Some(user), Some(_)) => format!("{}:***@", user),
            (None, Some(_)) => ":***@".to_string(),
            _ => String::new(),
        };
        format!("{}://{}{}:{}/{}", scheme, auth, self.host, self.port, self.db)
    }

    /// Timeout for a single connection attempt
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Bounded retry policy for publishes
    #[must_use]
    pub fn publish_retry(&self) -> RetryConfig {
        RetryConfig::new(
            self.max_retries,
            Duration::from_millis(self.retry_initial_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
        )
    }

    /// Delay schedule for the subscriber's reconnection loop
    #[must_use]
    pub fn reconnect_backoff(&self) -> RetryConfig {
        RetryConfig::new(
            u32::MAX,
            Duration::from_millis(self.retry_initial_delay_ms),
            Duration::from_millis(self.reconnect_max_delay_ms.max(self.retry_initial_delay_ms)),
        )
    }
}

fn invalid(field: &str, message: &str) -> BusError {
    BusError::InvalidConfig {
        field: field.to_string(),
        message: message.to_string(),
    }
}

fn encode(value: &str) -> String {
    utf8_percent_encode(value, NON_ALPHANUMERIC).to_string()
}
