//! World-update events (v0.4) carried over the event bus.
//!
//! The state store publishes one event per committed write on the
//! affected user's subject; sessions forward the payload to the client
//! verbatim, so this envelope is also a wire frame (`type: "world_update"`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use waymark_domain::{AreaId, ExperienceId, InstanceId, StateModel, TemplateId, UserId};

/// Envelope version of the world-update delta format.
pub const WORLD_UPDATE_VERSION: &str = "0.4";

/// Pub/sub subject carrying one user's world updates.
pub fn user_subject(user_id: &UserId) -> String {
    format!("world.updates.user.{user_id}")
}

/// One structural change within a world update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum ChangeOperation {
    /// An instance left a container.
    Remove {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        area_id: Option<AreaId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        instance_id: InstanceId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        template_id: Option<TemplateId>,
    },
    /// An instance entered a container. `item` is the instance merged
    /// with its template for direct client rendering.
    Add {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        area_id: Option<AreaId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        item: Value,
    },
    /// A field changed in place.
    Update { path: String, value: Value },
}

/// Event metadata block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    pub source: String,
    pub state_model: StateModel,
}

/// The v0.4 world-update event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldUpdateEvent {
    #[serde(rename = "type")]
    pub message_type: String,
    pub version: String,
    pub experience: ExperienceId,
    pub user_id: UserId,
    /// Version the client last held; `snapshot_version` is always
    /// `base_version + 1`.
    pub base_version: u64,
    pub snapshot_version: u64,
    pub changes: Vec<ChangeOperation>,
    pub timestamp: i64,
    pub metadata: EventMetadata,
}

impl WorldUpdateEvent {
    pub fn new(
        experience: ExperienceId,
        user_id: UserId,
        base_version: u64,
        changes: Vec<ChangeOperation>,
        timestamp: i64,
        state_model: StateModel,
    ) -> Self {
        Self {
            message_type: "world_update".to_string(),
            version: WORLD_UPDATE_VERSION.to_string(),
            experience,
            user_id,
            base_version,
            snapshot_version: base_version + 1,
            changes,
            timestamp,
            metadata: EventMetadata {
                source: "state_store".to_string(),
                state_model,
            },
        }
    }
}

/// Apply a world-update's `player.*` changes to a local replica of the
/// player view document. Clients use this to keep their copy in sync
/// between AOI refreshes; the engine uses it in tests to prove replica
/// convergence.
pub fn apply_to_view_replica(replica: &mut Value, event: &WorldUpdateEvent) {
    for change in &event.changes {
        match change {
            ChangeOperation::Add { path: Some(path), item, .. } => {
                if let Some(rest) = path.strip_prefix("player.") {
                    if let Some(Value::Array(list)) = descend_mut(replica, rest) {
                        list.push(item.clone());
                    }
                }
            }
            ChangeOperation::Remove { path: Some(path), instance_id, .. } => {
                if let Some(rest) = path.strip_prefix("player.") {
                    if let Some(Value::Array(list)) = descend_mut(replica, rest) {
                        list.retain(|v| {
                            v.get("instance_id").and_then(Value::as_str)
                                != Some(instance_id.as_str())
                        });
                    }
                }
            }
            ChangeOperation::Update { path, value } => {
                if let Some(rest) = path.strip_prefix("player.") {
                    let (parent_path, key) = match rest.rsplit_once('.') {
                        Some((parent, key)) => (Some(parent), key),
                        None => (None, rest),
                    };
                    let parent = match parent_path {
                        Some(p) => descend_mut(replica, p),
                        None => Some(&mut *replica),
                    };
                    if let Some(Value::Object(map)) = parent {
                        map.insert(key.to_string(), value.clone());
                    }
                }
            }
            _ => {}
        }
    }
    if let Value::Object(map) = replica {
        map.insert(
            "snapshot_version".to_string(),
            Value::from(event.snapshot_version),
        );
    }
}

fn descend_mut<'a>(value: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.as_object_mut()?.get_mut(segment)?;
    }
    Some(current)
}
