//! Go handler.
//!
//! Resolves a movement target against the current zone's areas (by id or
//! name), against cardinal directions, or against another zone entirely.
//! Unresolvable targets fail with the available options.

use std::sync::Arc;

use serde_json::{json, Value};

use waymark_domain::{Cardinal, ExperienceId, UserId};

use crate::infrastructure::clock::ClockPort;
use crate::infrastructure::store::StateStore;

use super::{world_for, CommandError, CommandResult};

pub struct Go {
    store: Arc<StateStore>,
    clock: Arc<dyn ClockPort>,
}

impl Go {
    pub fn new(store: Arc<StateStore>, clock: Arc<dyn ClockPort>) -> Self {
        Self { store, clock }
    }

    pub async fn execute(
        &self,
        user: &UserId,
        experience: &ExperienceId,
        target: &str,
    ) -> Result<CommandResult, CommandError> {
        let config = self.store.load_experience_config(experience).await?;
        let view = self.store.get_player_view(experience, user).await?;

        let Some(zone_id) = view.current_location.clone() else {
            return Ok(CommandResult::fail(
                "You aren't anywhere yet. Send your location first.",
            ));
        };
        let world = world_for(&self.store, &config, experience, &view).await?;
        let Some(zone) = world.zone(&zone_id) else {
            return Ok(CommandResult::fail("That place doesn't seem to exist."));
        };

        // Cardinal directions route through the current area's exits.
        if let Ok(direction) = target.parse::<Cardinal>() {
            let through = view
                .current_area
                .as_ref()
                .and_then(|a| zone.areas.get(a))
                .and_then(|area| area.cardinal_exits.get(&direction));
            return match through {
                Some(next) => {
                    let name = zone
                        .areas
                        .get(next)
                        .map(|a| a.name.clone())
                        .unwrap_or_else(|| next.to_string());
                    Ok(self.move_to_area(next.as_str(), &name))
                }
                None => Ok(CommandResult::fail(format!(
                    "There's nothing to the {direction}."
                ))),
            };
        }

        if let Some(area) = zone.resolve_area(target) {
            let name = area.name.clone();
            return Ok(self.move_to_area(area.id.as_str(), &name));
        }

        // A different zone: logical teleport, GPS re-confirms on the next
        // update_location.
        if let Some(other) = world.resolve_zone(target) {
            if other.id != zone_id {
                let changes = json!({
                    "player": {
                        "current_location": {"$set": other.id.as_str()},
                        "current_area": {"$set": Value::Null},
                        "last_action": {"$set": self.clock.now().to_rfc3339()}
                    }
                });
                return Ok(
                    CommandResult::ok(format!("You set out for {}.", other.name))
                        .with_changes(changes)
                        .with_meta("zone_id", other.id.as_str()),
                );
            }
        }

        let mut options: Vec<String> = zone.areas.values().map(|a| a.name.clone()).collect();
        if let Some(area) = view.current_area.as_ref().and_then(|a| zone.areas.get(a)) {
            options.extend(area.cardinal_exits.keys().map(|c| c.to_string()));
        }
        Ok(CommandResult::fail(format!(
            "You can't get to '{target}' from here. Try: {}.",
            options.join(", ")
        )))
    }

    fn move_to_area(&self, area_id: &str, name: &str) -> CommandResult {
        let changes = json!({
            "player": {
                "current_area": {"$set": area_id},
                "last_action": {"$set": self.clock.now().to_rfc3339()}
            }
        });
        CommandResult::ok(format!("You head to the {name}."))
            .with_changes(changes)
            .with_meta("area_id", area_id)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::Fixture;
    use super::*;

    fn handler(fixture: &Fixture) -> Go {
        Go::new(fixture.store.clone(), fixture.clock.clone())
    }

    #[tokio::test]
    async fn go_resolves_area_by_name_case_insensitively() {
        let fixture = Fixture::shared().await;
        fixture.move_player_to("u1", "woander_store", "counter").await;

        let result = handler(&fixture)
            .execute(&UserId::new("u1"), &fixture.experience(), "back room")
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(
            result.state_changes.unwrap()["player"]["current_area"]["$set"],
            "back_room"
        );
    }

    #[tokio::test]
    async fn go_follows_cardinal_exits() {
        let fixture = Fixture::shared().await;
        fixture.move_player_to("u1", "woander_store", "counter").await;

        let result = handler(&fixture)
            .execute(&UserId::new("u1"), &fixture.experience(), "north")
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(
            result.state_changes.unwrap()["player"]["current_area"]["$set"],
            "back_room"
        );
    }

    #[tokio::test]
    async fn go_into_an_unconnected_direction_fails() {
        let fixture = Fixture::shared().await;
        fixture.move_player_to("u1", "woander_store", "counter").await;

        let result = handler(&fixture)
            .execute(&UserId::new("u1"), &fixture.experience(), "west")
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.message_to_player.unwrap().contains("west"));
    }

    #[tokio::test]
    async fn go_to_another_zone_clears_the_area() {
        let fixture = Fixture::shared().await;
        fixture.move_player_to("u1", "woander_store", "counter").await;

        let result = handler(&fixture)
            .execute(&UserId::new("u1"), &fixture.experience(), "Moon Grove")
            .await
            .unwrap();

        assert!(result.success);
        let changes = result.state_changes.unwrap();
        assert_eq!(changes["player"]["current_location"]["$set"], "moon_grove");
        assert_eq!(changes["player"]["current_area"]["$set"], Value::Null);
    }

    #[tokio::test]
    async fn unresolvable_target_lists_options() {
        let fixture = Fixture::shared().await;
        fixture.move_player_to("u1", "woander_store", "counter").await;

        let result = handler(&fixture)
            .execute(&UserId::new("u1"), &fixture.experience(), "the moon")
            .await
            .unwrap();

        assert!(!result.success);
        let message = result.message_to_player.unwrap();
        assert!(message.contains("Back Room"));
        assert!(message.contains("north"));
    }
}
