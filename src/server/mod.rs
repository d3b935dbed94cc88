//! Server module
//!
//! Configuration, startup validation and the HTTP server lifecycle.

pub mod config;
mod init;
mod loader;
mod signal;
mod validation;

pub use init::{build_bus, build_router, run};
pub use loader::{environment, load_config};
pub use validation::validate_config;
