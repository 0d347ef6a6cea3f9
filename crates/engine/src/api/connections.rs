//! Connection management for WebSocket clients.
//!
//! Tracks one live connection per user. A reconnect closes the prior
//! connection first so resources never leak across reconnects.

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use waymark_domain::{ConnectionId, ExperienceId, UserId};
use waymark_shared::ServerMessage;

use crate::infrastructure::ports::{SessionRegistryPort, SessionSnapshot};

/// Frames queued for a connection's send task.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// A protocol frame, serialized on the way out.
    Frame(ServerMessage),
    /// Pre-serialized JSON forwarded verbatim (bus events).
    Raw(String),
    /// Instruct the send task to close the socket.
    Close { code: u16, reason: String },
}

/// One registered connection.
struct ConnectionEntry {
    connection_id: ConnectionId,
    experience: ExperienceId,
    sender: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
}

/// Manages all active WebSocket connections, keyed by user
/// (single-session-per-user policy).
#[derive(Default)]
pub struct ConnectionManager {
    connections: DashMap<UserId, ConnectionEntry>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Any prior connection for the same user is
    /// told to close and its tasks are cancelled.
    pub fn register(
        &self,
        user: &UserId,
        experience: &ExperienceId,
        connection_id: ConnectionId,
        sender: mpsc::Sender<Outbound>,
        cancel: CancellationToken,
    ) {
        let entry = ConnectionEntry {
            connection_id,
            experience: experience.clone(),
            sender,
            cancel,
        };
        if let Some(prior) = self.connections.insert(user.clone(), entry) {
            tracing::info!(
                user_id = %user,
                prior_connection = %prior.connection_id,
                new_connection = %connection_id,
                "closing prior connection for reconnecting user"
            );
            let _ = prior.sender.try_send(Outbound::Close {
                code: 1000,
                reason: "superseded by a new connection".to_string(),
            });
            prior.cancel.cancel();
        }
        tracing::debug!(user_id = %user, connection_id = %connection_id, "connection registered");
    }

    /// Remove a connection, but only if it still owns the slot (a
    /// takeover may already have replaced it).
    pub fn unregister(&self, user: &UserId, connection_id: ConnectionId) {
        let removed = self
            .connections
            .remove_if(user, |_, entry| entry.connection_id == connection_id);
        if removed.is_some() {
            tracing::debug!(user_id = %user, connection_id = %connection_id, "connection unregistered");
        }
    }
}

impl SessionRegistryPort for ConnectionManager {
    fn session_count(&self) -> usize {
        self.connections.len()
    }

    fn sessions(&self) -> Vec<SessionSnapshot> {
        self.connections
            .iter()
            .map(|entry| SessionSnapshot {
                connection_id: entry.value().connection_id.to_string(),
                user_id: entry.key().to_string(),
                experience_id: entry.value().experience.to_string(),
            })
            .collect()
    }
}
