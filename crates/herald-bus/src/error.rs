//! Error types for herald-bus

use crate::retry::RetryError;
use thiserror::Error;

/// Cluster bus error
#[derive(Debug, Error)]
pub enum BusError {
    /// Broker configuration is malformed (rejected at construction)
    #[error("invalid broker configuration: {field}: {message}")]
    InvalidConfig {
        /// Config field name
        field: String,
        /// Detailed message
        message: String,
    },

    /// Broker unreachable after the bounded retry policy
    #[error("broker connection failed after {attempts} attempt(s): {message}")]
    Connection {
        /// Attempts made before giving up
        attempts: u32,
        /// Last error reported by the broker client
        message: String,
    },

    /// The broker link failed (I/O, dropped connection, refusal, timeout);
    /// retrying may succeed
    #[error("broker error: {0}")]
    Broker(String),

    /// The broker answered with an error that retrying will not fix
    /// (authentication, permissions, wrong reply type)
    #[error("broker rejected the request: {0}")]
    Rejected(String),

    /// Message could not be serialized for the wire
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The bus client was closed
    #[error("bus client is closed")]
    Closed,
}

impl BusError {
    /// Whether a retry could plausibly succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Broker(_) | Self::Connection { .. })
    }
}

impl From<redis::RedisError> for BusError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_timeout()
        {
            Self::Broker(err.to_string())
        } else {
            Self::Rejected(err.to_string())
        }
    }
}

impl From<RetryError<BusError>> for BusError {
    /// Exhausted transient failures become [`BusError::Connection`]; a
    /// permanent failure is surfaced as-is
    fn from(err: RetryError<BusError>) -> Self {
        if err.last_error.is_transient() {
            Self::Connection {
                attempts: err.attempts,
                message: err.last_error.to_string(),
            }
        } else {
            err.last_error
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, BusError>;
