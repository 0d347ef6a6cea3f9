//! Collect handler.
//!
//! Moves an item from the player's current area into their inventory.
//! The instance record transfers intact (no new id is minted); the store
//! commits the area removal and inventory append as one versioned write.

use std::sync::Arc;

use serde_json::{json, Value};

use waymark_domain::{AreaId, ExperienceId, InstanceId, StateModel, UserId};

use crate::infrastructure::clock::ClockPort;
use crate::infrastructure::store::{StateStore, TemplateRegistry};

use super::{world_for, CommandError, CommandResult};

pub struct Collect {
    store: Arc<StateStore>,
    templates: Arc<TemplateRegistry>,
    clock: Arc<dyn ClockPort>,
}

impl Collect {
    pub fn new(
        store: Arc<StateStore>,
        templates: Arc<TemplateRegistry>,
        clock: Arc<dyn ClockPort>,
    ) -> Self {
        Self {
            store,
            templates,
            clock,
        }
    }

    pub async fn execute(
        &self,
        user: &UserId,
        experience: &ExperienceId,
        item_id: &InstanceId,
        area_override: Option<AreaId>,
    ) -> Result<CommandResult, CommandError> {
        let config = self.store.load_experience_config(experience).await?;
        let view = self.store.get_player_view(experience, user).await?;

        let Some(zone_id) = view.current_location.clone() else {
            return Ok(CommandResult::fail(
                "You aren't anywhere yet. Send your location first.",
            ));
        };
        let Some(area_id) = area_override.or_else(|| view.current_area.clone()) else {
            return Ok(CommandResult::fail(
                "You need to be somewhere specific to pick things up.",
            ));
        };

        let world = world_for(&self.store, &config, experience, &view).await?;
        let Some(area) = world.area(&zone_id, &area_id) else {
            return Ok(CommandResult::fail("That place doesn't seem to exist."));
        };

        let Some(instance) = area.item(item_id).filter(|i| i.visible) else {
            return Ok(CommandResult::fail(format!(
                "There's no {item_id} here."
            )));
        };

        let template = self.templates.resolve(experience, instance).await?;
        let name = template
            .as_ref()
            .map(|t| t.name.clone())
            .unwrap_or_else(|| item_id.to_string());
        let collectible = match &template {
            Some(template) => instance.is_collectible(template),
            None => instance.collectible.unwrap_or(false),
        };
        if !collectible {
            return Ok(CommandResult::fail(format!(
                "The {name} can't be picked up."
            )));
        }

        // First-interaction ownership in shared worlds: the first player to
        // touch an instance claims it.
        if config.state_model == StateModel::Shared {
            if let Some(owner) = instance.state.get("owned_by").and_then(Value::as_str) {
                if owner != user.as_str() {
                    return Ok(CommandResult::fail(format!(
                        "Someone else has already claimed the {name}."
                    )));
                }
            }
        }

        let mut moved = instance.clone();
        moved.state.insert(
            "collected_at".to_string(),
            Value::from(self.clock.now().timestamp_millis()),
        );
        if config.state_model == StateModel::Shared {
            moved
                .state
                .insert("owned_by".to_string(), Value::String(user.to_string()));
        }

        let changes = json!({
            "locations": {zone_id.as_str(): {"areas": {area_id.as_str(): {"items":
                {"$remove": {"instance_id": item_id.as_str()}}
            }}}},
            "player": {
                "inventory": {"$append": serde_json::to_value(&moved).unwrap_or(Value::Null)},
                "last_action": {"$set": self.clock.now().to_rfc3339()}
            }
        });

        Ok(CommandResult::ok(format!("You pick up the {name}."))
            .with_changes(changes)
            .with_meta("item_id", item_id.as_str())
            .with_meta("area_id", area_id.as_str()))
    }
}
