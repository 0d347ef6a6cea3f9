//! Gateway proxy: a thin transparent websocket tunnel.
//!
//! Validates the bearer token, dials the backing session endpoint, and
//! relays frames in both directions. It inspects nothing beyond the
//! query parameters; a pool ceiling bounds concurrent tunnels.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Semaphore;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, protocol::frame::coding::CloseCode};

use crate::api::websocket::ConnectQuery;
use crate::infrastructure::auth::TokenVerifier;
use crate::infrastructure::config::GatewayConfig;

const CLOSE_POLICY_VIOLATION: u16 = 1008;
const CLOSE_INTERNAL_ERROR: u16 = 1011;

pub struct Gateway {
    verifier: TokenVerifier,
    backend_url: String,
    permits: Arc<Semaphore>,
}

impl Gateway {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            verifier: TokenVerifier::new(&config.jwt_secret),
            backend_url: config.backend_url.clone(),
            permits: Arc::new(Semaphore::new(config.max_connections)),
        }
    }

    pub fn available_capacity(&self) -> usize {
        self.permits.available_permits()
    }
}

/// WebSocket upgrade handler for the gateway listener.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    State(gateway): State<Arc<Gateway>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_tunnel(socket, gateway, query))
}

async fn handle_tunnel(client: WebSocket, gateway: Arc<Gateway>, query: ConnectQuery) {
    let (mut client_tx, mut client_rx) = client.split();

    let Some(token) = query.token.as_deref() else {
        close_client(&mut client_tx, CLOSE_POLICY_VIOLATION, "missing token").await;
        return;
    };
    if let Err(e) = gateway.verifier.verify(token) {
        tracing::warn!(error = %e, "gateway rejected token");
        close_client(&mut client_tx, CLOSE_POLICY_VIOLATION, "authentication failed").await;
        return;
    }

    let Ok(_permit) = gateway.permits.clone().try_acquire_owned() else {
        tracing::warn!("gateway at connection capacity");
        close_client(&mut client_tx, CLOSE_INTERNAL_ERROR, "gateway at capacity").await;
        return;
    };

    let mut backend_url = format!("{}?token={}", gateway.backend_url, token);
    if let Some(experience) = &query.experience {
        backend_url.push_str(&format!("&experience={experience}"));
    }

    let backend = match connect_async(backend_url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            tracing::error!(error = %e, "gateway could not reach the session endpoint");
            close_client(&mut client_tx, CLOSE_INTERNAL_ERROR, "backend unavailable").await;
            return;
        }
    };
    let (mut backend_tx, mut backend_rx) = backend.split();

    tracing::debug!("gateway tunnel established");

    // Pure relay: first side to close or error tears down both.
    loop {
        tokio::select! {
            frame = client_rx.next() => {
                match frame {
                    Some(Ok(message)) => {
                        let done = matches!(message, Message::Close(_));
                        if backend_tx.send(to_backend(message)).await.is_err() || done {
                            break;
                        }
                    }
                    _ => {
                        let _ = backend_tx
                            .send(tungstenite::Message::Close(None))
                            .await;
                        break;
                    }
                }
            }
            frame = backend_rx.next() => {
                match frame {
                    Some(Ok(message)) => {
                        let done = matches!(message, tungstenite::Message::Close(_));
                        match to_client(message) {
                            Some(message) => {
                                if client_tx.send(message).await.is_err() || done {
                                    break;
                                }
                            }
                            None if done => break,
                            None => {}
                        }
                    }
                    _ => {
                        let _ = client_tx.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        }
    }

    tracing::debug!("gateway tunnel closed");
}

/// Client-side (axum) frame to backend-side (tungstenite) frame.
fn to_backend(message: Message) -> tungstenite::Message {
    match message {
        Message::Text(text) => tungstenite::Message::Text(text.to_string()),
        Message::Binary(data) => tungstenite::Message::Binary(data.to_vec()),
        Message::Ping(data) => tungstenite::Message::Ping(data.to_vec()),
        Message::Pong(data) => tungstenite::Message::Pong(data.to_vec()),
        Message::Close(frame) => tungstenite::Message::Close(frame.map(|f| {
            tungstenite::protocol::CloseFrame {
                code: CloseCode::from(f.code),
                reason: f.reason.to_string().into(),
            }
        })),
    }
}

/// Backend-side (tungstenite) frame to client-side (axum) frame.
fn to_client(message: tungstenite::Message) -> Option<Message> {
    match message {
        tungstenite::Message::Text(text) => Some(Message::Text(text.into())),
        tungstenite::Message::Binary(data) => Some(Message::Binary(data.into())),
        tungstenite::Message::Ping(data) => Some(Message::Ping(data.into())),
        tungstenite::Message::Pong(data) => Some(Message::Pong(data.into())),
        tungstenite::Message::Close(frame) => Some(Message::Close(frame.map(|f| CloseFrame {
            code: u16::from(f.code),
            reason: f.reason.to_string().into(),
        }))),
        tungstenite::Message::Frame(_) => None,
    }
}

async fn close_client(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    code: u16,
    reason: &str,
) {
    let _ = sender
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await;
}
