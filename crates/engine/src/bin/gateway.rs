//! Waymark Gateway - transparent websocket tunnel in front of the engine.
//!
//! Validates the bearer token, then relays frames to the session endpoint
//! unmodified. External TLS termination sits in front of this process.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use waymark_engine::api::gateway::{self, Gateway};
use waymark_engine::infrastructure::config::GatewayConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "waymark_engine=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Waymark Gateway");

    let config = GatewayConfig::from_env()?;
    tracing::info!("  Backend: {}", config.backend_url);
    tracing::info!("  Pool ceiling: {}", config.max_connections);

    let listen_port = config.listen_port;
    let gateway = Arc::new(Gateway::new(&config));

    let router = Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(gateway::ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(gateway);

    let addr = SocketAddr::from(([0, 0, 0, 0], listen_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server = axum::serve(listener, router);

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!("Gateway error: {}", e);
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
