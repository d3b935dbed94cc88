//! Herald Core - distributed broadcast engine
//!
//! This crate provides the per-process side of Herald:
//! - Registry: the live set of locally connected push sessions
//! - Engine: publish through the cluster bus, permission-filtered local
//!   delivery, heartbeats and connection lifecycle
//! - Sink: the non-blocking push handle each session owns
//! - Message: the `{event, data}` bus envelope and pushed frames

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod engine;
pub mod error;
pub mod heartbeat;
pub mod message;
pub mod registry;
pub mod session;
pub mod sink;

pub use config::EngineConfig;
pub use engine::{BroadcastEngine, BroadcastReport, EngineStats, SessionLease};
pub use error::{AuthError, DeliveryError, Error, Result, ValidationError};
pub use message::{EventMessage, Frame};
pub use registry::SessionRegistry;
pub use session::{Identity, Session, SessionId, SessionState};
pub use sink::{ChannelSink, FrameSink};
