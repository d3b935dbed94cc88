//! Middleware module for the Herald HTTP server
//!
//! Provides:
//! - Bearer token authentication (`RequireAuth` extractor)

pub mod auth;
