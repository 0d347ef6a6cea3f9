//! Per-player view state.
//!
//! One view exists per (user, experience): current position, inventory,
//! NPC relationships, and the monotonic snapshot version that every
//! published world update increments by one. In isolated experiences the
//! view also carries the player's private copy of the world.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::experience::{ExperienceConfig, StateModel};
use crate::ids::{AreaId, ExperienceId, NpcId, UserId, ZoneId};
use crate::instance::Instance;
use crate::world::Zone;

/// Conversation history ring buffer length per NPC relationship.
pub const CONVERSATION_HISTORY_LIMIT: usize = 20;

const INITIAL_TRUST: i64 = 50;

/// One exchange in an NPC conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_message: Option<String>,
    pub npc_reply: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-NPC, per-player relationship state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipState {
    /// Bounded to [0, 100].
    pub trust_level: i64,
    #[serde(default)]
    pub total_conversations: u64,
    pub first_met: DateTime<Utc>,
    #[serde(default)]
    pub conversation_history: Vec<ConversationTurn>,
}

impl RelationshipState {
    pub fn first_contact(now: DateTime<Utc>) -> Self {
        Self {
            trust_level: INITIAL_TRUST,
            total_conversations: 0,
            first_met: now,
            conversation_history: Vec::new(),
        }
    }
}

/// Per-(user, experience) state container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerView {
    pub user_id: UserId,
    pub experience_id: ExperienceId,
    #[serde(default)]
    pub current_location: Option<ZoneId>,
    #[serde(default)]
    pub current_area: Option<AreaId>,
    #[serde(default)]
    pub inventory: Vec<Instance>,
    #[serde(default)]
    pub npcs: IndexMap<NpcId, RelationshipState>,
    /// Monotonic; incremented by exactly one per published write.
    #[serde(default)]
    pub snapshot_version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action: Option<DateTime<Utc>>,
    /// Private world copy; present only under the isolated state model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<IndexMap<ZoneId, Zone>>,
}

impl PlayerView {
    /// Create a fresh view from the experience bootstrap.
    ///
    /// Isolated experiences get their private world copy seeded separately
    /// by the state store (from the world template).
    pub fn bootstrap(user_id: UserId, config: &ExperienceConfig) -> Self {
        Self {
            user_id,
            experience_id: config.experience_id.clone(),
            current_location: config.bootstrap.starting_location.clone(),
            current_area: None,
            inventory: config.bootstrap.starting_inventory.clone(),
            npcs: IndexMap::new(),
            snapshot_version: 0,
            last_action: None,
            locations: match config.state_model {
                StateModel::Shared => None,
                StateModel::Isolated => Some(IndexMap::new()),
            },
        }
    }

    pub fn inventory_item(&self, instance_id: &crate::ids::InstanceId) -> Option<&Instance> {
        self.inventory.iter().find(|i| &i.instance_id == instance_id)
    }
}
