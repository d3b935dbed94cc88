//! CLI module for Herald
//!
//! - `serve` (default): run the SSE server
//! - `check-config`: load and validate configuration, then print it

use clap::{Parser, Subcommand};

/// Herald distributed SSE broadcast server
#[derive(Parser, Debug)]
#[command(name = "herald")]
#[command(about = "Distributed server-sent events broadcast server")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the server (default)
    Serve,
    /// Validate the effective configuration and print it without secrets
    CheckConfig,
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Serve) | None => crate::server::run().await,
        Some(Commands::CheckConfig) => check_config(),
    }
}

fn check_config() -> anyhow::Result<()> {
    let config = crate::server::load_config()?;
    let environment = crate::server::environment();
    crate::server::validate_config(&config, &environment)?;

    println!("# environment: {}", environment);
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
