//! WebSocket frames between client and session endpoint.
//!
//! Client frames carry a required `type` tag; unknown tags are answered
//! with an `error` frame, never a disconnect.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use waymark_domain::{AreaId, ExperienceId, UserId};

use crate::aoi::{AreaView, PlayerSummary, ZoneView};

/// Messages from client to the session endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// GPS fix; answered with a fresh `area_of_interest`.
    UpdateLocation { lat: f64, lng: f64 },
    /// A player action; `action` selects the verb, remaining fields are
    /// verb-specific and validated by the dispatcher.
    Action {
        action: String,
        #[serde(flatten)]
        args: Map<String, Value>,
    },
    /// Free-form chat (MVP: canned response).
    Chat { text: String },
    /// Liveness probe; echoed back as `pong`.
    Ping { timestamp: i64 },
}

/// Messages from the session endpoint to the client.
///
/// `world_update` frames are forwarded verbatim from the event bus and are
/// not re-encoded through this enum; see [`crate::WorldUpdateEvent`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Welcome frame, sent once after a successful accept.
    Connected {
        connection_id: String,
        user_id: UserId,
        experience: ExperienceId,
        timestamp: i64,
    },
    /// Area-of-Interest snapshot for the client's GPS position.
    AreaOfInterest {
        snapshot_version: u64,
        zone: Option<ZoneView>,
        areas: indexmap::IndexMap<AreaId, AreaView>,
        player: PlayerSummary,
    },
    /// Outcome of a dispatched action.
    ActionResponse {
        action: String,
        success: bool,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Map<String, Value>>,
        timestamp: i64,
    },
    /// Protocol-level failure; the connection stays open.
    Error {
        code: String,
        message: String,
        timestamp: i64,
    },
    Heartbeat { timestamp: i64 },
    Pong { timestamp: i64 },
}

impl ServerMessage {
    /// Short error frame constructor used on the hot receive path.
    pub fn error(code: &str, message: impl Into<String>, timestamp: i64) -> Self {
        ServerMessage::Error {
            code: code.to_string(),
            message: message.into(),
            timestamp,
        }
    }
}
