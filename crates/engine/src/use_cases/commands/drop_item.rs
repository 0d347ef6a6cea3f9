//! Drop handler: the inverse of collect.
//!
//! Proximity to anything is not required; the player just needs a current
//! location and area to drop into. The instance transfers intact.

use std::sync::Arc;

use serde_json::{json, Value};

use waymark_domain::{ExperienceId, InstanceId, UserId};

use crate::infrastructure::clock::ClockPort;
use crate::infrastructure::store::{StateStore, TemplateRegistry};

use super::{world_for, CommandError, CommandResult};

pub struct DropItem {
    store: Arc<StateStore>,
    templates: Arc<TemplateRegistry>,
    clock: Arc<dyn ClockPort>,
}

impl DropItem {
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
    ) -> Result<CommandResult, CommandError> {
        let config = self.store.load_experience_config(experience).await?;
        let view = self.store.get_player_view(experience, user).await?;

        let (Some(zone_id), Some(area_id)) =
            (view.current_location.clone(), view.current_area.clone())
        else {
            return Ok(CommandResult::fail(
                "You need to be somewhere to drop that.",
            ));
        };

        let Some(instance) = view.inventory_item(item_id) else {
            return Ok(CommandResult::fail("You aren't carrying that."));
        };

        let world = world_for(&self.store, &config, experience, &view).await?;
        if world.area(&zone_id, &area_id).is_none() {
            return Ok(CommandResult::fail("That place doesn't seem to exist."));
        }

        let name = match self.templates.resolve(experience, instance).await? {
            Some(template) => template.name.clone(),
            None => item_id.to_string(),
        };

        let changes = json!({
            "locations": {zone_id.as_str(): {"areas": {area_id.as_str(): {"items":
                {"$append": serde_json::to_value(instance).unwrap_or(Value::Null)}
            }}}},
            "player": {
                "inventory": {"$remove": {"instance_id": item_id.as_str()}},
                "last_action": {"$set": self.clock.now().to_rfc3339()}
            }
        });

        Ok(CommandResult::ok(format!("You set down the {name}."))
            .with_changes(changes)
            .with_meta("item_id", item_id.as_str())
            .with_meta("area_id", area_id.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::Fixture;
    use super::*;

    async fn collected_fixture() -> Fixture {
        let fixture = Fixture::shared().await;
        fixture.move_player_to("u1", "woander_store", "counter").await;
        let dispatcher = fixture.dispatcher();
        let result = dispatcher
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
    async fn drop_requires_holding_the_item() {
        let fixture = Fixture::shared().await;
        fixture.move_player_to("u1", "woander_store", "counter").await;
        let handler = DropItem::new(
            fixture.store.clone(),
            fixture.templates.clone(),
            fixture.clock.clone(),
        );

        let result = handler
            .execute(
                &UserId::new("u1"),
                &fixture.experience(),
                &InstanceId::new("dream_bottle_1"),
            )
            .await
            .unwrap();

        assert!(!result.success);
    }

    #[tokio::test]
    async fn drop_then_collect_restores_inventory_and_area() {
        let fixture = collected_fixture().await;
        let dispatcher = fixture.dispatcher();

        let dropped = dispatcher
            .dispatch(
                &fixture.player(),
                &fixture.experience(),
                "drop",
                serde_json::json!({"item_id": "dream_bottle_1"})
                    .as_object()
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(dropped.success, "{:?}", dropped.message_to_player);

        let view = fixture.view("u1").await;
        assert!(view.inventory.is_empty());
        let world = fixture.world().await;
        assert!(world
            .find_instance(&InstanceId::new("dream_bottle_1"))
            .is_some());

        // The owner can take their own item back.
        let recollected = dispatcher
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
        assert!(recollected.success);

        let view = fixture.view("u1").await;
        assert_eq!(view.inventory.len(), 1);
        assert_eq!(view.inventory[0].instance_id.as_str(), "dream_bottle_1");
    }

    #[tokio::test]
    async fn drop_into_a_different_area_moves_the_item_there() {
        let fixture = collected_fixture().await;
        fixture.move_player_to("u1", "woander_store", "garden").await;
        let dispatcher = fixture.dispatcher();

        let result = dispatcher
            .dispatch(
                &fixture.player(),
                &fixture.experience(),
                "drop",
                serde_json::json!({"item_id": "dream_bottle_1"})
                    .as_object()
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(result.success);

        let world = fixture.world().await;
        let (_, area_id, _) = world
            .find_instance(&InstanceId::new("dream_bottle_1"))
            .unwrap();
        assert_eq!(area_id.as_str(), "garden");
    }
}
