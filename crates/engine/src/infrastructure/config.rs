//! Application configuration loaded from environment

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

/// Engine configuration loaded from environment
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// WebSocket server port
    pub server_port: u16,

    /// Root directory of the persisted-state tree
    /// (`experiences/`, `players/`)
    pub data_root: PathBuf,

    /// CORS allowed origins (comma-separated, or "*" for any)
    pub cors_allowed_origins: Vec<String>,

    /// Event bus configuration
    pub nats: NatsConfig,

    /// Auth configuration
    pub auth: AuthConfig,

    /// Chat/narrative service configuration
    pub chat: ChatConfig,

    /// State store configuration
    pub store: StoreConfig,

    /// Session configuration
    pub session: SessionConfig,
}

/// NATS connection configuration
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// Server URL, e.g. nats://localhost:4222
    pub url: String,
    /// Client connection name
    pub name: Option<String>,
    /// Max automatic reconnect attempts before the client gives up
    pub max_reconnects: usize,
    /// Initial-connect retries (exponential backoff)
    pub max_retries: u32,
    /// Base delay between initial-connect retries (seconds)
    pub retry_delay_secs: u64,
}

/// JWT verification configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// HS256 shared secret for bearer-token verification
    pub jwt_secret: String,
}

/// External chat/narrative service configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Base URL of the chat service
    pub base_url: String,
    /// Per-call deadline (seconds)
    pub timeout_secs: u64,
}

/// State store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// How long a write waits on a contended file lock (milliseconds)
    pub lock_timeout_ms: u64,
}

/// Per-connection session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Heartbeat interval (seconds)
    pub heartbeat_interval_secs: u64,
    /// Outbound channel buffer per connection
    pub channel_buffer: usize,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            server_port: env::var("WAYMARK_SERVER_PORT")
                .unwrap_or_else(|_| "4000".to_string())
                .parse()
                .context("WAYMARK_SERVER_PORT must be a valid port number")?,

            data_root: env::var("WAYMARK_DATA_ROOT")
                .unwrap_or_else(|_| "./data".to_string())
                .into(),

            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "*".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),

            nats: NatsConfig {
                url: env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string()),
                name: env::var("NATS_CLIENT_NAME").ok(),
                max_reconnects: env::var("NATS_MAX_RECONNECTS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .unwrap_or(60),
                max_retries: env::var("NATS_CONNECT_RETRIES")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
                retry_delay_secs: env::var("NATS_RETRY_DELAY_SECONDS")
                    .unwrap_or_else(|_| "2".to_string())
                    .parse()
                    .unwrap_or(2),
            },

            auth: AuthConfig {
                jwt_secret: env::var("WAYMARK_JWT_SECRET")
                    .context("WAYMARK_JWT_SECRET environment variable is required")?,
            },

            chat: ChatConfig {
                base_url: env::var("CHAT_SERVICE_URL")
                    .unwrap_or_else(|_| "http://localhost:8300".to_string()),
                timeout_secs: env::var("CHAT_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()
                    .unwrap_or(20),
            },

            store: StoreConfig {
                lock_timeout_ms: env::var("STORE_LOCK_TIMEOUT_MS")
                    .unwrap_or_else(|_| "5000".to_string())
                    .parse()
                    .unwrap_or(5000),
            },

            session: SessionConfig {
                heartbeat_interval_secs: env::var("SESSION_HEARTBEAT_SECONDS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30),
                channel_buffer: env::var("SESSION_CHANNEL_BUFFER")
                    .unwrap_or_else(|_| "256".to_string())
                    .parse()
                    .unwrap_or(256),
            },
        })
    }
}

/// Gateway configuration loaded from environment
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Gateway listen port
    pub listen_port: u16,
    /// Backing session endpoint, e.g. ws://localhost:4000/ws
    pub backend_url: String,
    /// HS256 shared secret (same as the engine's)
    pub jwt_secret: String,
    /// Concurrent tunnel ceiling
    pub max_connections: usize,
}

impl GatewayConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            listen_port: env::var("WAYMARK_GATEWAY_PORT")
                .unwrap_or_else(|_| "4100".to_string())
                .parse()
                .context("WAYMARK_GATEWAY_PORT must be a valid port number")?,
            backend_url: env::var("WAYMARK_BACKEND_URL")
                .unwrap_or_else(|_| "ws://localhost:4000/ws".to_string()),
            jwt_secret: env::var("WAYMARK_JWT_SECRET")
                .context("WAYMARK_JWT_SECRET environment variable is required")?,
            max_connections: env::var("WAYMARK_GATEWAY_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .unwrap_or(100),
        })
    }
}
