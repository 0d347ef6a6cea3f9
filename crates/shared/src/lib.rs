//! Waymark wire protocol.
//!
//! Message types exchanged over the websocket connection, the v0.4
//! world-update event envelope carried over the event bus, and the
//! Area-of-Interest payload. Both the engine and client tooling consume
//! these types; every frame is a JSON object with a required `type` field.

mod aoi;
mod events;
mod messages;

pub use aoi::{AreaOfInterest, AreaView, PlayerSummary, ZoneView};
pub use events::{
    apply_to_view_replica, user_subject, ChangeOperation, EventMetadata, WorldUpdateEvent,
    WORLD_UPDATE_VERSION,
};
pub use messages::{ClientMessage, ServerMessage};
