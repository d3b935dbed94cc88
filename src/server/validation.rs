//! Startup configuration validation
//!
//! Hard errors for settings the process cannot run with, plus security
//! checks for production deployments.

use super::config::{AppConfig, DEFAULT_JWT_SECRET};
use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use tracing::warn;

/// Validate configuration before anything is started
pub fn validate_config(config: &AppConfig, environment: &str) -> Result<()> {
    if config.server.port == 0 {
        bail!("server.port must be between 1 and 65535");
    }
    if config.broadcast.channel.trim().is_empty() {
        bail!("broadcast.channel must not be empty");
    }
    if config.auth.jwt_secret.is_empty() {
        bail!("auth.jwt_secret must not be empty");
    }
    if config.auth.token_ttl_secs == 0 {
        bail!("auth.token_ttl_secs must be positive");
    }
    if config.redis.enabled {
        config
            .redis
            .connection
            .validate()
            .context("Invalid [redis] configuration")?;
    }

    let mut ids = HashSet::new();
    let mut emails = HashSet::new();
    for user in &config.auth.users {
        if user.id.is_empty() {
            bail!("auth.users: every user needs an id");
        }
        if !ids.insert(user.id.as_str()) {
            bail!("auth.users: duplicate id {}", user.id);
        }
        if !emails.insert(user.email.as_str()) {
            bail!("auth.users: duplicate email {}", user.email);
        }
    }

    if environment.eq_ignore_ascii_case("production") {
        validate_production_config(config)?;
    }
    Ok(())
}

/// Validate configuration for production security
fn validate_production_config(config: &AppConfig) -> Result<()> {
    if config.auth.jwt_secret == DEFAULT_JWT_SECRET {
        bail!("auth.jwt_secret is the built-in default; set HERALD_AUTH__JWT_SECRET in production");
    }

    if !config.redis.enabled {
        warn!(
            "SECURITY WARNING: Redis is disabled in production. Events will not reach \
             clients connected to other processes."
        );
    }

    if config.redis.enabled && config.redis.connection.password.is_none() {
        warn!(
            "SECURITY WARNING: Redis connection has no authentication in production. \
             Consider enabling Redis AUTH."
        );
    }

    if config.redis.enabled && !config.redis.connection.tls {
        warn!("SECURITY WARNING: Redis connection is not using TLS in production.");
    }

    if config.auth.users.iter().any(|u| u.password.len() < 8) {
        warn!("SECURITY WARNING: Some configured users have passwords shorter than 8 characters.");
    }

    Ok(())
}
