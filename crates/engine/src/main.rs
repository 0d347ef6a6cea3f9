//! Waymark Engine - session server for the experience runtime
//!
//! The Engine is the backend server that:
//! - Serves AR clients over WebSocket (AOI snapshots, delta streams)
//! - Owns the file-backed state store and command dispatch
//! - Bridges state-change events onto the NATS event bus
//! - Integrates with the external chat service for NPC conversations

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use waymark_engine::api::websocket;
use waymark_engine::infrastructure::bus::NatsEventBus;
use waymark_engine::infrastructure::chat::ChatServiceClient;
use waymark_engine::infrastructure::clock::SystemClock;
use waymark_engine::infrastructure::config::AppConfig;
use waymark_engine::App;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "waymark_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Waymark Engine");

    // Load configuration
    let config = AppConfig::from_env()?;
    tracing::info!("Configuration loaded");
    tracing::info!("  Data root: {}", config.data_root.display());
    tracing::info!("  NATS: {}", config.nats.url);
    tracing::info!("  Chat service: {}", config.chat.base_url);

    // Connect infrastructure
    let bus = Arc::new(NatsEventBus::connect(&config.nats).await?);
    let chat = Arc::new(ChatServiceClient::new(&config.chat));
    let clock = Arc::new(SystemClock::new());

    let server_port = config.server_port;
    let app = Arc::new(App::new(config, bus, chat, clock));
    tracing::info!("Application state initialized");

    // Build the router
    let router = Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(websocket::ws_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(app);

    // Start the server
    let addr = SocketAddr::from(([0, 0, 0, 0], server_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server = axum::serve(listener, router);

    // Run with graceful shutdown on Ctrl+C
    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!("Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}
