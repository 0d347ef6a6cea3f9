//! Give handler.
//!
//! Hands an inventory item to an NPC in the player's current area. The
//! item leaves the world entirely; NPC-owned items are not world-visible.
//! Quest evaluation is a separate subsystem, not this handler's concern.

use std::sync::Arc;

use serde_json::json;

use waymark_domain::{ExperienceId, InstanceId, NpcId, TemplateKind, UserId};

use crate::infrastructure::clock::ClockPort;
use crate::infrastructure::store::{StateStore, TemplateRegistry};

use super::{world_for, CommandError, CommandResult};

pub struct Give {
    store: Arc<StateStore>,
    templates: Arc<TemplateRegistry>,
    clock: Arc<dyn ClockPort>,
}

impl Give {
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
        npc_id: &NpcId,
    ) -> Result<CommandResult, CommandError> {
        let config = self.store.load_experience_config(experience).await?;
        let view = self.store.get_player_view(experience, user).await?;

        let Some(instance) = view.inventory_item(item_id) else {
            return Ok(CommandResult::fail("You aren't carrying that."));
        };

        let (Some(zone_id), area_id) = (view.current_location.clone(), view.current_area.clone())
        else {
            return Ok(CommandResult::fail(
                "You aren't anywhere yet. Send your location first.",
            ));
        };

        let world = world_for(&self.store, &config, experience, &view).await?;
        let Some(zone) = world.zone(&zone_id) else {
            return Ok(CommandResult::fail("That place doesn't seem to exist."));
        };

        // Exact proximity: the NPC must be attached to the player's
        // current area, or to the zone itself.
        let nearby = area_id
            .as_ref()
            .and_then(|a| zone.areas.get(a))
            .map(|area| area.npc.as_ref() == Some(npc_id))
            .unwrap_or(false)
            || zone.npc.as_ref() == Some(npc_id);
        let npc_name = self.npc_name(experience, npc_id).await?;
        if !nearby {
            return Ok(CommandResult::fail(format!("{npc_name} isn't here.")));
        }

        let item_name = match self.templates.resolve(experience, instance).await? {
            Some(template) => template.name.clone(),
            None => item_id.to_string(),
        };

        let changes = json!({
            "player": {
                "inventory": {"$remove": {"instance_id": item_id.as_str()}},
                "last_action": {"$set": self.clock.now().to_rfc3339()}
            }
        });

        Ok(
            CommandResult::ok(format!("You give the {item_name} to {npc_name}."))
                .with_changes(changes)
                .with_meta("item_id", item_id.as_str())
                .with_meta("npc_id", npc_id.as_str()),
        )
    }

    async fn npc_name(
        &self,
        experience: &ExperienceId,
        npc_id: &NpcId,
    ) -> Result<String, CommandError> {
        let template = self
            .templates
            .get(
                experience,
                TemplateKind::Npc,
                &waymark_domain::TemplateId::new(npc_id.as_str()),
            )
            .await?;
        Ok(template
            .map(|t| t.name.clone())
            .unwrap_or_else(|| npc_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::Fixture;
    use super::*;

    async fn holding_bottle() -> Fixture {
        let fixture = Fixture::shared().await;
        fixture.move_player_to("u1", "woander_store", "counter").await;
        let result = fixture
            .dispatcher()
            .dispatch(
                &fixture.player(),
                &fixture.experience(),
                "collect",
                serde_json::json!({"item_id": "dream_bottle_1"})
                    .as_object()
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(result.success);
        fixture
    }

    #[tokio::test]
    async fn giving_requires_the_npc_to_be_in_reach() {
        let fixture = holding_bottle().await;
        let handler = Give::new(
            fixture.store.clone(),
            fixture.templates.clone(),
            fixture.clock.clone(),
        );

        // Player is at the counter; the fox lives in the back room.
        let result = handler
            .execute(
                &UserId::new("u1"),
                &fixture.experience(),
                &InstanceId::new("dream_bottle_1"),
                &NpcId::new("shadow_fox"),
            )
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.message_to_player.unwrap().contains("Shadow Fox"));
    }

    #[tokio::test]
    async fn giving_removes_the_item_without_returning_it_to_the_world() {
        let fixture = holding_bottle().await;
        fixture.move_player_to("u1", "woander_store", "back_room").await;
        let dispatcher = fixture.dispatcher();

        let result = dispatcher
            .dispatch(
                &fixture.player(),
                &fixture.experience(),
                "give",
                serde_json::json!({"item_id": "dream_bottle_1", "npc_id": "shadow_fox"})
                    .as_object()
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(result.success, "{:?}", result.message_to_player);

        let view = fixture.view("u1").await;
        assert!(view.inventory.is_empty());
        let world = fixture.world().await;
        assert!(world
            .find_instance(&InstanceId::new("dream_bottle_1"))
            .is_none());
    }

    #[tokio::test]
    async fn giving_an_item_you_lack_fails() {
        let fixture = Fixture::shared().await;
        fixture.move_player_to("u1", "woander_store", "back_room").await;
        let handler = Give::new(
            fixture.store.clone(),
            fixture.templates.clone(),
            fixture.clock.clone(),
        );

        let result = handler
            .execute(
                &UserId::new("u1"),
                &fixture.experience(),
                &InstanceId::new("dream_bottle_1"),
                &NpcId::new("shadow_fox"),
            )
            .await
            .unwrap();

        assert!(!result.success);
    }
}
