//! Server initialization and main run loop
//!
//! Contains the main `run()` function that wires the bus, engine and HTTP
//! routes together and drives graceful shutdown.

use super::config::{AppConfig, RedisConfig};
use super::loader::{environment, load_config};
use super::signal::wait_for_shutdown_signal;
use super::validation::validate_config;
use crate::auth::AuthService;
use anyhow::{Context, Result};
use axum::{Extension, Router};
use herald_bus::{MemoryBroker, Publisher, RedisPublisher, RedisSubscriber, Subscriber};
use herald_core::BroadcastEngine;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

/// Create the bus clients selected by `[redis]`
pub fn build_bus(config: &RedisConfig) -> Result<(Arc<dyn Publisher>, Arc<dyn Subscriber>)> {
    if config.enabled {
        info!(url = %config.connection.redacted_url(), "Using Redis broker");
        let publisher =
            RedisPublisher::new(&config.connection).context("Failed to create Redis publisher")?;
        let subscriber = RedisSubscriber::spawn(&config.connection)
            .context("Failed to create Redis subscriber")?;
        Ok((Arc::new(publisher), Arc::new(subscriber)))
    } else {
        warn!("Redis disabled, using in-process broker (events stay within this process)");
        let broker = MemoryBroker::new();
        Ok((Arc::new(broker.publisher()), Arc::new(broker.subscriber())))
    }
}

/// Build the HTTP router around a started engine
pub fn build_router(engine: BroadcastEngine, auth: Arc<AuthService>) -> Router {
    Router::new()
        .merge(crate::api::health_routes())
        .merge(crate::api::login_routes())
        // Auth applied per-handler via the RequireAuth extractor
        .merge(crate::api::events_routes())
        .layer(Extension(engine))
        .layer(Extension(auth))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Run the server
pub async fn run() -> Result<()> {
    info!("Starting Herald v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config().context("Failed to load configuration")?;
    let environment = environment();
    info!(environment = %environment, "Configuration loaded");

    validate_config(&config, &environment)?;
    serve(config).await
}

async fn serve(config: AppConfig) -> Result<()> {
    let (publisher, subscriber) = build_bus(&config.redis)?;
    let engine = BroadcastEngine::new(config.broadcast.clone(), publisher, subscriber);
    engine
        .start()
        .await
        .context("Failed to start broadcast engine")?;

    let auth = Arc::new(AuthService::new(&config.auth));
    info!(users = config.auth.users.len(), "Auth initialized");

    let app = build_router(engine.clone(), auth);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("HTTP server listening on http://{}", addr);

    // Closing the engine ends every SSE stream, letting in-flight
    // connections drain so graceful shutdown can complete.
    let shutdown_engine = engine.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_shutdown_signal().await;
            info!("Shutting down, closing broadcast engine");
            if let Err(e) = shutdown_engine.close().await {
                warn!(error = %e, "Broadcast engine close failed");
            }
        })
        .await
        .context("HTTP server error")?;

    info!("Herald shutdown complete");
    Ok(())
}
