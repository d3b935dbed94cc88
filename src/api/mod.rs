//! HTTP API for Herald
//!
//! Provides endpoints for:
//! - Login (token issuance)
//! - SSE event delivery and publish triggers
//! - Health and engine statistics

pub mod error;
pub mod events;
pub mod health;
pub mod login;

pub use events::events_routes;
pub use health::health_routes;
pub use login::login_routes;

#[cfg(test)]
mod tests;
