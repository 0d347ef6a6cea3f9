//! Read-only verbs: inventory, look, examine.
//!
//! These produce narrative text and never emit state changes.

use std::sync::Arc;

use waymark_domain::{ExperienceId, Instance, TemplateKind, UserId};

use crate::infrastructure::store::{StateStore, TemplateRegistry};

use super::{world_for, CommandError, CommandResult};

pub struct Observe {
    store: Arc<StateStore>,
    templates: Arc<TemplateRegistry>,
}

impl Observe {
    pub fn new(store: Arc<StateStore>, templates: Arc<TemplateRegistry>) -> Self {
        Self { store, templates }
    }

    pub async fn inventory(
        &self,
        user: &UserId,
        experience: &ExperienceId,
    ) -> Result<CommandResult, CommandError> {
        let view = self.store.get_player_view(experience, user).await?;
        if view.inventory.is_empty() {
            return Ok(CommandResult::ok("You aren't carrying anything."));
        }

        let mut names = Vec::with_capacity(view.inventory.len());
        for instance in &view.inventory {
            names.push(self.display_name(experience, instance).await?);
        }
        Ok(
            CommandResult::ok(format!("You are carrying: {}.", names.join(", ")))
                .with_meta("count", view.inventory.len()),
        )
    }

    pub async fn look(
        &self,
        user: &UserId,
        experience: &ExperienceId,
    ) -> Result<CommandResult, CommandError> {
        let config = self.store.load_experience_config(experience).await?;
        let view = self.store.get_player_view(experience, user).await?;

        let Some(zone_id) = view.current_location.clone() else {
            return Ok(CommandResult::ok(
                "You are nowhere in particular. Send your location to arrive somewhere.",
            ));
        };
        let world = world_for(&self.store, &config, experience, &view).await?;
        let Some(zone) = world.zone(&zone_id) else {
            return Ok(CommandResult::ok("There is nothing here."));
        };

        let Some(area) = view.current_area.as_ref().and_then(|a| zone.areas.get(a)) else {
            let areas: Vec<&str> = zone.areas.values().map(|a| a.name.as_str()).collect();
            return Ok(CommandResult::ok(format!(
                "{}. {} You could head to: {}.",
                zone.name,
                zone.description,
                areas.join(", ")
            )));
        };

        let mut lines = vec![format!("{}. {}", area.name, area.description)];
        let mut visible = Vec::new();
        for instance in area.items.iter().filter(|i| i.visible) {
            visible.push(self.display_name(experience, instance).await?);
        }
        if !visible.is_empty() {
            lines.push(format!("You see: {}.", visible.join(", ")));
        }
        if let Some(npc_id) = &area.npc {
            lines.push(format!("{} is here.", self.npc_name(experience, npc_id.as_str()).await?));
        }
        Ok(CommandResult::ok(lines.join(" ")))
    }

    pub async fn examine(
        &self,
        user: &UserId,
        experience: &ExperienceId,
        target: Option<&str>,
    ) -> Result<CommandResult, CommandError> {
        let Some(target) = target else {
            return self.look(user, experience).await;
        };

        let config = self.store.load_experience_config(experience).await?;
        let view = self.store.get_player_view(experience, user).await?;

        // Inventory first, then the current area.
        let mut candidates: Vec<Instance> = view.inventory.clone();
        if let (Some(zone_id), Some(area_id)) = (&view.current_location, &view.current_area) {
            let world = world_for(&self.store, &config, experience, &view).await?;
            if let Some(area) = world.area(zone_id, area_id) {
                candidates.extend(area.items.iter().filter(|i| i.visible).cloned());
            }
        }

        for instance in &candidates {
            let template = self.templates.resolve(experience, instance).await?;
            let name = template
                .as_ref()
                .map(|t| t.name.clone())
                .unwrap_or_else(|| instance.instance_id.to_string());
            if instance.instance_id.as_str().eq_ignore_ascii_case(target)
                || name.eq_ignore_ascii_case(target)
            {
                let description = template
                    .as_ref()
                    .map(|t| t.description.clone())
                    .filter(|d| !d.is_empty())
                    .unwrap_or_else(|| format!("It's a {name}. Nothing more to say."));
                return Ok(CommandResult::ok(format!("{name}: {description}"))
                    .with_meta("instance_id", instance.instance_id.as_str()));
            }
        }

        Ok(CommandResult::fail(format!(
            "You don't see any '{target}' here."
        )))
    }

    async fn display_name(
        &self,
        experience: &ExperienceId,
        instance: &Instance,
    ) -> Result<String, CommandError> {
        Ok(self
            .templates
            .resolve(experience, instance)
            .await?
            .map(|t| t.name.clone())
            .unwrap_or_else(|| instance.instance_id.to_string()))
    }

    async fn npc_name(
        &self,
        experience: &ExperienceId,
        npc_id: &str,
    ) -> Result<String, CommandError> {
        Ok(self
            .templates
            .get(
                experience,
                TemplateKind::Npc,
                &waymark_domain::TemplateId::new(npc_id),
            )
            .await?
            .map(|t| t.name.clone())
            .unwrap_or_else(|| npc_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::Fixture;
    use super::*;

    fn handler(fixture: &Fixture) -> Observe {
        Observe::new(fixture.store.clone(), fixture.templates.clone())
    }

    #[tokio::test]
    async fn empty_inventory_reads_as_empty_hands() {
        let fixture = Fixture::shared().await;
        let result = handler(&fixture)
            .inventory(&UserId::new("u1"), &fixture.experience())
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.message_to_player.unwrap().contains("anything"));
        assert!(result.state_changes.is_none());
    }

    #[tokio::test]
    async fn look_describes_visible_items_and_npc_only() {
        let fixture = Fixture::shared().await;
        fixture.move_player_to("u1", "woander_store", "counter").await;

        let result = handler(&fixture)
            .look(&UserId::new("u1"), &fixture.experience())
            .await
            .unwrap();

        let message = result.message_to_player.unwrap();
        assert!(message.contains("Dream Bottle"));
        assert!(message.contains("Anvil"));
        assert!(!message.contains("Hidden Key"));
    }

    #[tokio::test]
    async fn examine_finds_area_items_by_name() {
        let fixture = Fixture::shared().await;
        fixture.move_player_to("u1", "woander_store", "counter").await;

        let result = handler(&fixture)
            .examine(&UserId::new("u1"), &fixture.experience(), Some("dream bottle"))
            .await
            .unwrap();

        assert!(result.success);
        assert!(result
            .message_to_player
            .unwrap()
            .contains("softly glowing"));
    }

    #[tokio::test]
    async fn examine_misses_politely() {
        let fixture = Fixture::shared().await;
        fixture.move_player_to("u1", "woander_store", "counter").await;

        let result = handler(&fixture)
            .examine(&UserId::new("u1"), &fixture.experience(), Some("dragon"))
            .await
            .unwrap();

        assert!(!result.success);
    }
}
