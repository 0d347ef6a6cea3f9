//! Waymark domain model.
//!
//! Pure data types shared by the engine and the wire protocol: typed
//! identifiers, experience configuration, GPS geography, the hierarchical
//! world model (zones, areas, instances), content templates, and the
//! per-player view with NPC relationship state.
//!
//! This crate has no I/O. Everything here serializes to the JSON documents
//! the state store persists.

mod error;
mod experience;
mod geo;
mod ids;
mod instance;
mod view;
mod world;

pub use error::DomainError;
pub use experience::{Bootstrap, Capabilities, ExperienceConfig, StateModel};
pub use geo::{haversine_m, nearby_geographies, Geography};
pub use ids::{AreaId, ConnectionId, ExperienceId, InstanceId, NpcId, TemplateId, UserId, ZoneId};
pub use instance::{merged_record, Instance, Template, TemplateKind};
pub use view::{ConversationTurn, PlayerView, RelationshipState, CONVERSATION_HISTORY_LIMIT};
pub use world::{Area, Cardinal, Gps, World, Zone};
