//! Configuration loading
//!
//! Handles loading configuration from embedded defaults, files, and environment.

use super::config::AppConfig;
use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};

/// Embedded default configuration (compiled into binary)
pub const DEFAULT_CONFIG: &str = include_str!("../../config/default.toml");

/// Deployment environment name (`HERALD_ENV`, default `development`)
pub fn environment() -> String {
    std::env::var("HERALD_ENV").unwrap_or_else(|_| "development".to_string())
}

/// Load configuration from files and environment
pub fn load_config() -> Result<AppConfig> {
    let config = Config::builder()
        // 1. Embedded defaults (always available)
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        // 2. External overrides (optional)
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{}", environment())).required(false))
        .add_source(File::with_name("config/local").required(false))
        // 3. Environment variables (highest priority): HERALD_REDIS__HOST etc.
        .add_source(
            Environment::with_prefix("HERALD")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    config
        .try_deserialize()
        .context("Failed to deserialize configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_defaults_deserialize() {
        let config: AppConfig = Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.broadcast.channel, "sse-events");
        assert_eq!(config.broadcast.heartbeat_interval_ms, 6000);
        assert!(config.redis.enabled);
        assert_eq!(config.redis.connection.host, "localhost");
        assert_eq!(config.redis.connection.max_retries, 3);
        assert_eq!(config.auth.users.len(), 2);
        assert_eq!(config.auth.users[0].permissions, vec!["newBloq", "newRent"]);
    }

    #[test]
    fn test_file_layer_overrides_defaults() {
        let overrides = r#"
            [redis]
            enabled = false
            port = 6380

            [broadcast]
            heartbeat_interval_ms = 0
        "#;
        let config: AppConfig = Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
            .add_source(File::from_str(overrides, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert!(!config.redis.enabled);
        assert_eq!(config.redis.connection.port, 6380);
        assert_eq!(config.redis.connection.host, "localhost");
        assert_eq!(config.broadcast.heartbeat_interval(), None);
    }
}
