//! WebSocket session endpoint.
//!
//! Owns one persistent client connection: authenticate once from the
//! query token, register (closing any prior connection for the user),
//! subscribe the user's world-update subject, send the welcome frame,
//! then serve the message loop with a 30-second heartbeat. Teardown is
//! one scope: unsubscribe, cancel the heartbeat, deregister, close.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use waymark_domain::{ConnectionId, ExperienceId};
use waymark_shared::{ClientMessage, ServerMessage};

use crate::api::connections::Outbound;
use crate::app::App;
use crate::infrastructure::auth::AuthenticatedUser;
use crate::infrastructure::clock::unix_ms;
use crate::use_cases::commands::CommandError;

/// Close codes from the wire contract.
const CLOSE_POLICY_VIOLATION: u16 = 1008;
const CLOSE_INTERNAL_ERROR: u16 = 1011;

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub experience: Option<String>,
}

/// WebSocket upgrade handler - entry point for new connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    State(app): State<Arc<App>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app, query))
}

/// Handle an individual WebSocket connection.
async fn handle_socket(socket: WebSocket, app: Arc<App>, query: ConnectQuery) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Authenticate before any state access.
    let user = match query.token.as_deref().map(|t| app.verifier.verify(t)) {
        Some(Ok(user)) => user,
        Some(Err(e)) => {
            tracing::warn!(error = %e, "websocket auth failed");
            close_now(&mut ws_sender, CLOSE_POLICY_VIOLATION, "authentication failed").await;
            return;
        }
        None => {
            close_now(&mut ws_sender, CLOSE_POLICY_VIOLATION, "missing token").await;
            return;
        }
    };

    let Some(experience) = query.experience.map(ExperienceId::new) else {
        close_now(&mut ws_sender, CLOSE_POLICY_VIOLATION, "missing experience").await;
        return;
    };
    if let Err(e) = app.store.load_experience_config(&experience).await {
        tracing::warn!(error = %e, experience = %experience, "websocket rejected");
        close_now(&mut ws_sender, CLOSE_POLICY_VIOLATION, "unknown experience").await;
        return;
    }

    let connection_id = ConnectionId::new();
    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel::<Outbound>(app.config.session.channel_buffer);

    app.connections.register(
        &user.user_id,
        &experience,
        connection_id,
        tx.clone(),
        cancel.clone(),
    );

    // One persistent subscription per connection.
    let subject = waymark_shared::user_subject(&user.user_id);
    let mut subscription = match app.bus.subscribe(&subject).await {
        Ok(subscription) => subscription,
        Err(e) => {
            tracing::error!(error = %e, subject = %subject, "bus subscription failed");
            app.connections.unregister(&user.user_id, connection_id);
            close_now(&mut ws_sender, CLOSE_INTERNAL_ERROR, "event bus unavailable").await;
            return;
        }
    };

    tracing::info!(
        connection_id = %connection_id,
        user_id = %user.user_id,
        experience = %experience,
        "websocket connection established"
    );

    // Forward queued frames to the socket; a failed write ends the session.
    let send_cancel = cancel.clone();
    let send_task = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let sent = match outbound {
                Outbound::Frame(message) => match serde_json::to_string(&message) {
                    Ok(json) => ws_sender.send(Message::Text(json.into())).await.is_ok(),
                    Err(e) => {
                        tracing::error!(error = %e, "outbound frame failed to serialize");
                        true
                    }
                },
                Outbound::Raw(json) => ws_sender.send(Message::Text(json.into())).await.is_ok(),
                Outbound::Close { code, reason } => {
                    let _ = ws_sender
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    false
                }
            };
            if !sent {
                send_cancel.cancel();
                break;
            }
        }
    });

    // Welcome frame.
    let _ = tx
        .try_send(Outbound::Frame(ServerMessage::Connected {
            connection_id: connection_id.to_string(),
            user_id: user.user_id.clone(),
            experience: experience.clone(),
            timestamp: now_ms(&app),
        }))
        .map_err(|e| tracing::warn!(error = %e, "welcome frame not queued"));

    // Heartbeat; a send into a closed channel ends the task.
    let heartbeat_tx = tx.clone();
    let heartbeat_cancel = cancel.clone();
    let heartbeat_interval =
        std::time::Duration::from_secs(app.config.session.heartbeat_interval_secs);
    let heartbeat_app = app.clone();
    let heartbeat_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat_interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = heartbeat_cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let frame = Outbound::Frame(ServerMessage::Heartbeat {
                        timestamp: now_ms(&heartbeat_app),
                    });
                    if heartbeat_tx.send(frame).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Message loop: client frames and bus events, merged in receipt order.
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            event = subscription.recv() => {
                match event {
                    Some(payload) => {
                        let json = String::from_utf8_lossy(&payload).into_owned();
                        if tx.try_send(Outbound::Raw(json)).is_err() {
                            tracing::warn!(
                                connection_id = %connection_id,
                                "outbound buffer full, dropping session"
                            );
                            break;
                        }
                    }
                    None => {
                        tracing::warn!(connection_id = %connection_id, "bus subscription ended");
                        break;
                    }
                }
            }

            frame = ws_receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match handle_client_frame(&app, &user, &experience, &text).await {
                            FrameOutcome::Reply(message) => {
                                let _ = tx.try_send(Outbound::Frame(message));
                            }
                            FrameOutcome::Close { code, reason } => {
                                let _ = tx.try_send(Outbound::Close { code, reason });
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!(connection_id = %connection_id, "websocket closed by client");
                        break;
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!(connection_id = %connection_id, error = %e, "websocket error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    // Teardown is atomic: subscription, heartbeat, registry entry, socket.
    cancel.cancel();
    drop(subscription);
    heartbeat_task.abort();
    app.connections.unregister(&user.user_id, connection_id);
    send_task.abort();

    tracing::info!(
        connection_id = %connection_id,
        user_id = %user.user_id,
        "websocket connection terminated"
    );
}

/// What one inbound frame produces.
pub enum FrameOutcome {
    Reply(ServerMessage),
    Close { code: u16, reason: String },
}

/// Dispatch one client frame. Protocol violations answer with an `error`
/// frame and keep the connection open.
pub async fn handle_client_frame(
    app: &App,
    user: &AuthenticatedUser,
    experience: &ExperienceId,
    text: &str,
) -> FrameOutcome {
    let timestamp = now_ms(app);

    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(error = %e, "unparseable client frame");
            return FrameOutcome::Reply(ServerMessage::error(
                "invalid_message",
                format!("Invalid message format: {e}"),
                timestamp,
            ));
        }
    };

    match message {
        ClientMessage::Ping { timestamp } => {
            FrameOutcome::Reply(ServerMessage::Pong { timestamp })
        }

        ClientMessage::UpdateLocation { lat, lng } => {
            match app.aoi.execute(&user.user_id, experience, lat, lng).await {
                Ok(aoi) => FrameOutcome::Reply(ServerMessage::AreaOfInterest {
                    snapshot_version: aoi.snapshot_version,
                    zone: aoi.zone,
                    areas: aoi.areas,
                    player: aoi.player,
                }),
                Err(e) => {
                    tracing::error!(error = %e, user_id = %user.user_id, "aoi build failed");
                    FrameOutcome::Reply(ServerMessage::error(
                        "aoi_failed",
                        "Could not build your surroundings. Try again.",
                        timestamp,
                    ))
                }
            }
        }

        ClientMessage::Action { action, args } => {
            match app.dispatcher.dispatch(user, experience, &action, &args).await {
                Ok(result) => FrameOutcome::Reply(ServerMessage::ActionResponse {
                    action,
                    success: result.success,
                    message: result.message_to_player.unwrap_or_default(),
                    metadata: result.metadata,
                    timestamp,
                }),
                Err(CommandError::AdminRequired) => FrameOutcome::Close {
                    code: CLOSE_POLICY_VIOLATION,
                    reason: "admin-only operation".to_string(),
                },
                Err(e) => {
                    tracing::error!(error = %e, action = %action, "dispatch failed");
                    FrameOutcome::Reply(ServerMessage::error(
                        "action_failed",
                        "That action failed. Try again.",
                        timestamp,
                    ))
                }
            }
        }

        ClientMessage::Chat { text } => {
            tracing::debug!(user_id = %user.user_id, chars = text.len(), "chat message received");
            FrameOutcome::Reply(ServerMessage::ActionResponse {
                action: "chat".to_string(),
                success: true,
                message: "The woods are listening, but no one answers yet.".to_string(),
                metadata: None,
                timestamp,
            })
        }
    }
}

fn now_ms(app: &App) -> i64 {
    unix_ms(app.clock.now())
}

async fn close_now(
    sender: &mut SplitSink<WebSocket, Message>,
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
