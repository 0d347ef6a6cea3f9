//! Area-of-Interest builder.
//!
//! Composes the AOI payload for (user, experience, lat, lng): pick the
//! nearest geofenced zone, emit its areas with visible template-merged
//! items and NPCs, and stamp the view's snapshot version. No candidate
//! zone is a normal outcome (empty AOI), never an error.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use waymark_domain::{
    nearby_geographies, ExperienceId, Instance, StateModel, TemplateKind, UserId, World, Zone,
};
use waymark_shared::{AreaOfInterest, AreaView, PlayerSummary, ZoneView};

use crate::infrastructure::store::{StateStore, StoreError, TemplateRegistry};

/// AOI read path. Pure function of the post-write state.
pub struct BuildAoi {
    store: Arc<StateStore>,
    templates: Arc<TemplateRegistry>,
}

impl BuildAoi {
    pub fn new(store: Arc<StateStore>, templates: Arc<TemplateRegistry>) -> Self {
        Self { store, templates }
    }

    pub async fn execute(
        &self,
        user: &UserId,
        experience: &ExperienceId,
        lat: f64,
        lng: f64,
    ) -> Result<AreaOfInterest, StoreError> {
        let config = self.store.load_experience_config(experience).await?;
        let view = self.store.get_player_view(experience, user).await?;

        let world = match config.state_model {
            StateModel::Shared => self.store.get_world_state(experience).await?,
            StateModel::Isolated => World {
                locations: view.locations.clone().unwrap_or_default(),
            },
        };

        let zone = self.select_zone(&config.geographies, config.geofence_radius_m, &world, lat, lng);

        let (zone_view, areas) = match zone {
            Some(zone) => {
                let mut areas = IndexMap::new();
                for (area_id, area) in &zone.areas {
                    let mut items = Vec::new();
                    let mut npcs = Vec::new();
                    for instance in &area.items {
                        if !instance.visible {
                            continue;
                        }
                        let Some(record) = self.render(experience, instance).await else {
                            continue;
                        };
                        match instance.kind {
                            TemplateKind::Item => items.push(record),
                            TemplateKind::Npc => npcs.push(record),
                            TemplateKind::Quest => {}
                        }
                    }
                    if let Some(npc_id) = &area.npc {
                        if let Some(record) = self.render_npc(experience, npc_id.as_str()).await {
                            npcs.push(record);
                        }
                    }
                    areas.insert(
                        area_id.clone(),
                        AreaView {
                            id: area.id.clone(),
                            name: area.name.clone(),
                            description: area.description.clone(),
                            items,
                            npcs,
                        },
                    );
                }
                (
                    Some(ZoneView {
                        id: zone.id.clone(),
                        name: zone.name.clone(),
                        description: zone.description.clone(),
                        gps: zone.gps,
                    }),
                    areas,
                )
            }
            None => (None, IndexMap::new()),
        };

        let mut inventory = Vec::new();
        for instance in &view.inventory {
            if !instance.visible {
                continue;
            }
            if let Some(record) = self.render(experience, instance).await {
                inventory.push(record);
            }
        }

        Ok(AreaOfInterest {
            snapshot_version: view.snapshot_version,
            zone: zone_view,
            areas,
            player: PlayerSummary {
                current_location: view.current_location.clone(),
                current_area: view.current_area.clone(),
                inventory,
            },
        })
    }

    /// Nearest geofenced zone for the position. Falls back to zone GPS
    /// anchors when the experience declares no geographies.
    fn select_zone<'w>(
        &self,
        geographies: &[waymark_domain::Geography],
        radius_m: f64,
        world: &'w World,
        lat: f64,
        lng: f64,
    ) -> Option<&'w Zone> {
        if !geographies.is_empty() {
            return nearby_geographies(geographies, lat, lng, radius_m)
                .into_iter()
                .find_map(|(geo, _)| world.zone(&geo.zone_id));
        }

        let mut candidates: Vec<(&Zone, f64)> = world
            .locations
            .values()
            .map(|z| {
                (
                    z,
                    waymark_domain::haversine_m(lat, lng, z.gps.lat, z.gps.lng),
                )
            })
            .filter(|(_, d)| *d <= radius_m)
            .collect();
        candidates.sort_by(|a, b| a.1.total_cmp(&b.1));
        candidates.first().map(|(z, _)| *z)
    }

    async fn render(&self, experience: &ExperienceId, instance: &Instance) -> Option<Value> {
        match self.templates.resolve(experience, instance).await {
            Ok(Some(template)) => Some(waymark_domain::merged_record(instance, &template)),
            Ok(None) => {
                tracing::debug!(
                    instance_id = %instance.instance_id,
                    template_id = %instance.template_id,
                    "skipping instance with missing template"
                );
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "template resolution failed while building AOI");
                None
            }
        }
    }

    /// Area- and zone-resident NPCs are referenced by template id, not
    /// spawned as instances; render them straight from the template.
    async fn render_npc(&self, experience: &ExperienceId, npc_id: &str) -> Option<Value> {
        let template_id = waymark_domain::TemplateId::new(npc_id);
        match self
            .templates
            .get(experience, TemplateKind::Npc, &template_id)
            .await
        {
            Ok(Some(template)) => {
                let instance = Instance::from_template(
                    waymark_domain::InstanceId::new(npc_id),
                    &template,
                );
                Some(waymark_domain::merged_record(&instance, &template))
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, npc_id, "npc template resolution failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::MockClockPort;
    use crate::infrastructure::ports::MockEventBusPort;
    use crate::infrastructure::store::{write_json_atomic, StoreLayout};
    use serde_json::json;
    use std::time::Duration;

    const EXP: &str = "wylding-woods";

    async fn seed(root: &std::path::Path) {
        let layout = StoreLayout::new(root);
        let exp = ExperienceId::new(EXP);
        write_json_atomic(
            &layout.config_path(&exp),
            &json!({
                "experience_id": EXP,
                "state_model": "shared",
                "bootstrap": {"starting_location": "woander_store"},
                "geographies": [
                    {"id": "g1", "lat": 37.906233, "lng": -122.547721, "zone_id": "woander_store"}
                ]
            }),
        )
        .await
        .unwrap();
        write_json_atomic(
            &layout.world_template_path(&exp),
            &json!({
                "locations": {
                    "woander_store": {
                        "id": "woander_store",
                        "name": "Woander Store",
                        "description": "A curious shop.",
                        "gps": {"lat": 37.906233, "lng": -122.547721},
                        "areas": {
                            "counter": {
                                "id": "counter",
                                "name": "Counter",
                                "items": [
                                    {"instance_id": "dream_bottle_1", "template_id": "dream_bottle", "type": "item"},
                                    {"instance_id": "hidden_key_1", "template_id": "hidden_key", "type": "item", "visible": false}
                                ]
                            },
                            "back_room": {"id": "back_room", "name": "Back Room", "npc": "shadow_fox"}
                        }
                    }
                }
            }),
        )
        .await
        .unwrap();
        write_json_atomic(
            &layout.template_path(
                &exp,
                TemplateKind::Item,
                &waymark_domain::TemplateId::new("dream_bottle"),
            ),
            &json!({
                "template_id": "dream_bottle",
                "type": "item",
                "name": "Dream Bottle",
                "collectible": true,
                "properties": {"glowing": true}
            }),
        )
        .await
        .unwrap();
        write_json_atomic(
            &layout.template_path(
                &exp,
                TemplateKind::Item,
                &waymark_domain::TemplateId::new("hidden_key"),
            ),
            &json!({
                "template_id": "hidden_key",
                "type": "item",
                "name": "Hidden Key",
                "collectible": true
            }),
        )
        .await
        .unwrap();
        write_json_atomic(
            &layout.template_path(
                &exp,
                TemplateKind::Npc,
                &waymark_domain::TemplateId::new("shadow_fox"),
            ),
            &json!({
                "template_id": "shadow_fox",
                "type": "npc",
                "name": "Shadow Fox",
                "description": "A sly guide."
            }),
        )
        .await
        .unwrap();
    }

    fn builder(root: &std::path::Path) -> BuildAoi {
        let layout = StoreLayout::new(root);
        let templates = Arc::new(TemplateRegistry::new(layout.clone()));
        let mut clock = MockClockPort::new();
        clock.expect_now().returning(chrono::Utc::now);
        let store = Arc::new(StateStore::new(
            layout,
            templates.clone(),
            Arc::new(MockEventBusPort::new()),
            Arc::new(clock),
            Duration::from_millis(200),
        ));
        BuildAoi::new(store, templates)
    }

    #[tokio::test]
    async fn out_of_range_position_yields_empty_aoi_not_error() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path()).await;
        let aoi = builder(dir.path())
            .execute(&UserId::new("u1"), &ExperienceId::new(EXP), 0.0, 0.0)
            .await
            .unwrap();

        assert!(aoi.zone.is_none());
        assert!(aoi.areas.is_empty());
        assert_eq!(
            aoi.player.current_location.as_ref().unwrap().as_str(),
            "woander_store"
        );
        assert!(aoi.player.inventory.is_empty());
    }

    #[tokio::test]
    async fn in_range_position_resolves_the_zone_with_areas_in_order() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path()).await;
        let aoi = builder(dir.path())
            .execute(
                &UserId::new("u1"),
                &ExperienceId::new(EXP),
                37.906233,
                -122.547721,
            )
            .await
            .unwrap();

        assert_eq!(aoi.zone.as_ref().unwrap().id.as_str(), "woander_store");
        let order: Vec<&str> = aoi.areas.keys().map(|k| k.as_str()).collect();
        assert_eq!(order, vec!["counter", "back_room"]);
    }

    #[tokio::test]
    async fn invisible_items_never_appear() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path()).await;
        let aoi = builder(dir.path())
            .execute(
                &UserId::new("u1"),
                &ExperienceId::new(EXP),
                37.906233,
                -122.547721,
            )
            .await
            .unwrap();

        let counter = &aoi.areas[&waymark_domain::AreaId::new("counter")];
        assert_eq!(counter.items.len(), 1);
        assert_eq!(counter.items[0]["instance_id"], "dream_bottle_1");
        assert_eq!(counter.items[0]["glowing"], true);
        assert!(!serde_json::to_string(&aoi).unwrap().contains("hidden_key"));
    }

    #[tokio::test]
    async fn area_npcs_render_from_templates() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path()).await;
        let aoi = builder(dir.path())
            .execute(
                &UserId::new("u1"),
                &ExperienceId::new(EXP),
                37.906233,
                -122.547721,
            )
            .await
            .unwrap();

        let back_room = &aoi.areas[&waymark_domain::AreaId::new("back_room")];
        assert_eq!(back_room.npcs.len(), 1);
        assert_eq!(back_room.npcs[0]["name"], "Shadow Fox");
    }
}
