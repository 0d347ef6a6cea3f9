//! Admin console verbs.
//!
//! Gated on the session's `is_admin` claim (enforced by the dispatcher).
//! Destructive verbs demand a literal `CONFIRM` token and otherwise answer
//! with a preview of what would happen. Every admin write goes through the
//! state store, so it versions and publishes exactly like a player action.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use uuid::Uuid;

use waymark_domain::{
    Area, AreaId, Cardinal, ExperienceId, Instance, InstanceId, TemplateId, TemplateKind, UserId,
    World,
};

use crate::infrastructure::auth::AuthenticatedUser;
use crate::infrastructure::clock::ClockPort;
use crate::infrastructure::ports::{EventBusPort, SessionRegistryPort};
use crate::infrastructure::store::{StateStore, TemplateRegistry};

use super::{CommandError, CommandResult};

const CONFIRM: &str = "CONFIRM";

pub struct Admin {
    store: Arc<StateStore>,
    templates: Arc<TemplateRegistry>,
    clock: Arc<dyn ClockPort>,
    bus: Arc<dyn EventBusPort>,
    sessions: Arc<dyn SessionRegistryPort>,
}

impl Admin {
    pub fn new(
        store: Arc<StateStore>,
        templates: Arc<TemplateRegistry>,
        clock: Arc<dyn ClockPort>,
        bus: Arc<dyn EventBusPort>,
        sessions: Arc<dyn SessionRegistryPort>,
    ) -> Self {
        Self {
            store,
            templates,
            clock,
            bus,
            sessions,
        }
    }

    pub async fn execute(
        &self,
        user: &AuthenticatedUser,
        experience: &ExperienceId,
        verb: &str,
        args: &[String],
    ) -> Result<CommandResult, CommandError> {
        match verb {
            "@list" => self.list(experience, args).await,
            "@inspect" => self.inspect(experience, args).await,
            "@create" => self.create(experience, args).await,
            "@edit" => self.edit(experience, args).await,
            "@delete" => self.delete(experience, args).await,
            "@connect" => self.connect(experience, args).await,
            "@disconnect" => self.disconnect(experience, args).await,
            "@reset" => self.reset(user, experience, args).await,
            "@where" => self.locate(user, experience, args).await,
            "@find" => self.find(experience, args).await,
            "@stats" => self.stats(experience).await,
            other => Err(CommandError::UnknownAction(other.to_string())),
        }
    }

    async fn list(
        &self,
        experience: &ExperienceId,
        args: &[String],
    ) -> Result<CommandResult, CommandError> {
        let world = self.store.get_world_state(experience).await?;
        match args.first().map(String::as_str) {
            Some("zones") | Some("locations") => {
                let lines: Vec<String> = world
                    .locations
                    .values()
                    .map(|z| format!("{} - {}", z.id, z.name))
                    .collect();
                Ok(CommandResult::ok(listing("zones", lines)))
            }
            Some("areas") | Some("sublocations") => {
                let Some(zone) = args.get(1).and_then(|z| world.zone(&z.as_str().into())) else {
                    return Ok(CommandResult::fail(
                        "Usage: @list areas <zone_id>",
                    ));
                };
                let lines: Vec<String> = zone
                    .areas
                    .values()
                    .map(|a| format!("{} - {} ({} items)", a.id, a.name, a.items.len()))
                    .collect();
                Ok(CommandResult::ok(listing("areas", lines)))
            }
            Some("instances") => {
                let lines: Vec<String> = instances_of(&world)
                    .map(|(zone, area, instance)| {
                        format!(
                            "{} ({}) - {}/{}",
                            instance.instance_id, instance.template_id, zone, area
                        )
                    })
                    .collect();
                Ok(CommandResult::ok(listing("instances", lines)))
            }
            Some("players") => {
                let users = self.store.users_with_view(experience).await?;
                let lines: Vec<String> = users.iter().map(ToString::to_string).collect();
                Ok(CommandResult::ok(listing("players", lines)))
            }
            _ => Ok(CommandResult::fail(
                "Usage: @list <zones|areas|instances|players> [zone_id]",
            )),
        }
    }

    async fn inspect(
        &self,
        experience: &ExperienceId,
        args: &[String],
    ) -> Result<CommandResult, CommandError> {
        let world = self.store.get_world_state(experience).await?;
        let dump = |value: Value| {
            serde_json::to_string_pretty(&value).unwrap_or_else(|_| "<unprintable>".to_string())
        };

        match args.first().map(String::as_str) {
            Some("zone") => {
                let Some(zone) = args.get(1).and_then(|z| world.zone(&z.as_str().into())) else {
                    return Ok(CommandResult::fail("Usage: @inspect zone <zone_id>"));
                };
                Ok(CommandResult::ok(dump(
                    serde_json::to_value(zone).unwrap_or(Value::Null),
                )))
            }
            Some("area") | Some("sublocation") => {
                let (Some(zone_id), Some(area_id)) = (args.get(1), args.get(2)) else {
                    return Ok(CommandResult::fail(
                        "Usage: @inspect area <zone_id> <area_id>",
                    ));
                };
                let Some(area) = world.area(&zone_id.as_str().into(), &area_id.as_str().into())
                else {
                    return Ok(CommandResult::fail(format!(
                        "No area {area_id} in zone {zone_id}."
                    )));
                };
                Ok(CommandResult::ok(dump(
                    serde_json::to_value(area).unwrap_or(Value::Null),
                )))
            }
            Some("instance") => {
                let Some(instance_id) = args.get(1) else {
                    return Ok(CommandResult::fail("Usage: @inspect instance <instance_id>"));
                };
                match world.find_instance(&instance_id.as_str().into()) {
                    Some((zone, area, instance)) => Ok(CommandResult::ok(format!(
                        "at {zone}/{area}:\n{}",
                        dump(serde_json::to_value(instance).unwrap_or(Value::Null))
                    ))),
                    None => Ok(CommandResult::fail(format!(
                        "Instance {instance_id} is not in the world."
                    ))),
                }
            }
            Some("player") => {
                let Some(user_id) = args.get(1) else {
                    return Ok(CommandResult::fail("Usage: @inspect player <user_id>"));
                };
                let view = self
                    .store
                    .get_player_view(experience, &UserId::new(user_id.as_str()))
                    .await?;
                Ok(CommandResult::ok(dump(
                    serde_json::to_value(&view).unwrap_or(Value::Null),
                )))
            }
            _ => Ok(CommandResult::fail(
                "Usage: @inspect <zone|area|instance|player> <id...>",
            )),
        }
    }

    async fn create(
        &self,
        experience: &ExperienceId,
        args: &[String],
    ) -> Result<CommandResult, CommandError> {
        let (Some(kind), Some(template_id), Some(zone_id), Some(area_id)) =
            (args.first(), args.get(1), args.get(2), args.get(3))
        else {
            return Ok(CommandResult::fail(
                "Usage: @create instance <template_id> <zone_id> <area_id>",
            ));
        };
        if kind != "instance" {
            return Ok(CommandResult::fail("Only '@create instance' is supported."));
        }

        let template_id = TemplateId::new(template_id.as_str());
        let mut template = None;
        for kind in [TemplateKind::Item, TemplateKind::Npc, TemplateKind::Quest] {
            if let Some(found) = self.templates.get(experience, kind, &template_id).await? {
                template = Some(found);
                break;
            }
        }
        let Some(template) = template else {
            return Ok(CommandResult::fail(format!(
                "No template named {template_id}."
            )));
        };

        let world = self.store.get_world_state(experience).await?;
        if world
            .area(&zone_id.as_str().into(), &area_id.as_str().into())
            .is_none()
        {
            return Ok(CommandResult::fail(format!(
                "No area {area_id} in zone {zone_id}."
            )));
        }

        let instance_id = InstanceId::new(format!(
            "{}_{}",
            template_id,
            &Uuid::new_v4().simple().to_string()[..8]
        ));
        let instance = Instance::from_template(instance_id.clone(), &template);

        let changes = json!({
            "locations": {zone_id.as_str(): {"areas": {area_id.as_str(): {"items":
                {"$append": serde_json::to_value(&instance).unwrap_or(Value::Null)}
            }}}}
        });

        Ok(CommandResult::ok(format!(
            "Spawned {instance_id} ({}) at {zone_id}/{area_id}.",
            template.name
        ))
        .with_changes(changes)
        .with_meta("instance_id", instance_id.as_str()))
    }

    async fn edit(
        &self,
        experience: &ExperienceId,
        args: &[String],
    ) -> Result<CommandResult, CommandError> {
        let world = self.store.get_world_state(experience).await?;
        match args.first().map(String::as_str) {
            Some("zone") => {
                let (Some(zone_id), Some(field), Some(value)) =
                    (args.get(1), args.get(2), args.get(3))
                else {
                    return Ok(CommandResult::fail(
                        "Usage: @edit zone <zone_id> <field> <value>",
                    ));
                };
                if world.zone(&zone_id.as_str().into()).is_none() {
                    return Ok(CommandResult::fail(format!("No zone named {zone_id}.")));
                }
                let patch = match field.as_str() {
                    "name" | "description" => {
                        json!({field.as_str(): {"$set": value.as_str()}})
                    }
                    "lat" | "lng" => {
                        let Ok(parsed) = value.parse::<f64>() else {
                            return Ok(CommandResult::fail(format!(
                                "'{value}' is not a number."
                            )));
                        };
                        let bound = if field == "lat" { 90.0 } else { 180.0 };
                        if parsed.abs() > bound {
                            return Ok(CommandResult::fail(format!(
                                "{field} must be within ±{bound}."
                            )));
                        }
                        json!({"gps": {field.as_str(): {"$set": parsed}}})
                    }
                    other => {
                        return Ok(CommandResult::fail(format!(
                            "Zones have no editable field '{other}'."
                        )))
                    }
                };
                Ok(
                    CommandResult::ok(format!("Zone {zone_id} {field} updated."))
                        .with_changes(json!({"locations": {zone_id.as_str(): patch}})),
                )
            }
            Some("area") | Some("sublocation") => {
                let (Some(zone_id), Some(area_id), Some(field), Some(value)) =
                    (args.get(1), args.get(2), args.get(3), args.get(4))
                else {
                    return Ok(CommandResult::fail(
                        "Usage: @edit area <zone_id> <area_id> <field> <value>",
                    ));
                };
                if world
                    .area(&zone_id.as_str().into(), &area_id.as_str().into())
                    .is_none()
                {
                    return Ok(CommandResult::fail(format!(
                        "No area {area_id} in zone {zone_id}."
                    )));
                }
                if !matches!(field.as_str(), "name" | "description") {
                    return Ok(CommandResult::fail(format!(
                        "Areas have no editable field '{field}'."
                    )));
                }
                let changes = json!({"locations": {zone_id.as_str(): {"areas": {area_id.as_str():
                    {field.as_str(): {"$set": value.as_str()}}
                }}}});
                Ok(
                    CommandResult::ok(format!("Area {zone_id}/{area_id} {field} updated."))
                        .with_changes(changes),
                )
            }
            Some("instance") => {
                let (Some(instance_id), Some(field), Some(value)) =
                    (args.get(1), args.get(2), args.get(3))
                else {
                    return Ok(CommandResult::fail(
                        "Usage: @edit instance <instance_id> <field> <value>",
                    ));
                };
                let Some((zone_id, area_id, _)) =
                    world.find_instance(&instance_id.as_str().into())
                else {
                    return Ok(CommandResult::fail(format!(
                        "Instance {instance_id} is not in the world."
                    )));
                };
                if !matches!(field.as_str(), "visible" | "collectible") {
                    return Ok(CommandResult::fail(format!(
                        "Instances have no editable field '{field}'."
                    )));
                }
                let Ok(flag) = value.parse::<bool>() else {
                    return Ok(CommandResult::fail(format!(
                        "'{value}' is not true/false."
                    )));
                };
                let changes = json!({
                    "locations": {zone_id.as_str(): {"areas": {area_id.as_str(): {"items":
                        {"$update": [{"instance_id": instance_id.as_str(), field.as_str(): flag}]}
                    }}}}
                });
                Ok(
                    CommandResult::ok(format!("Instance {instance_id} {field} = {flag}."))
                        .with_changes(changes),
                )
            }
            _ => Ok(CommandResult::fail(
                "Usage: @edit <zone|area|instance> <id...> <field> <value>",
            )),
        }
    }

    async fn delete(
        &self,
        experience: &ExperienceId,
        args: &[String],
    ) -> Result<CommandResult, CommandError> {
        let world = self.store.get_world_state(experience).await?;
        match args.first().map(String::as_str) {
            Some("instance") => {
                let Some(instance_id) = args.get(1) else {
                    return Ok(CommandResult::fail(
                        "Usage: @delete instance <instance_id> CONFIRM",
                    ));
                };
                let Some((zone_id, area_id, _)) =
                    world.find_instance(&instance_id.as_str().into())
                else {
                    return Ok(CommandResult::fail(format!(
                        "Instance {instance_id} is not in the world."
                    )));
                };
                if !confirmed(args) {
                    return Ok(CommandResult::ok(format!(
                        "This will permanently delete {instance_id} from {zone_id}/{area_id}. \
                         Re-run as: @delete instance {instance_id} CONFIRM"
                    )));
                }
                let changes = json!({
                    "locations": {zone_id.as_str(): {"areas": {area_id.as_str(): {"items":
                        {"$remove": {"instance_id": instance_id.as_str()}}
                    }}}}
                });
                Ok(CommandResult::ok(format!("Deleted {instance_id}."))
                    .with_changes(changes))
            }
            Some("area") | Some("sublocation") => {
                let (Some(zone_id), Some(area_id)) = (args.get(1), args.get(2)) else {
                    return Ok(CommandResult::fail(
                        "Usage: @delete sublocation <zone_id> <area_id> CONFIRM",
                    ));
                };
                let Some(zone) = world.zone(&zone_id.as_str().into()) else {
                    return Ok(CommandResult::fail(format!("No zone named {zone_id}.")));
                };
                let target: AreaId = area_id.as_str().into();
                if !zone.areas.contains_key(&target) {
                    return Ok(CommandResult::fail(format!(
                        "No area {area_id} in zone {zone_id}."
                    )));
                }
                if !confirmed(args) {
                    return Ok(CommandResult::ok(format!(
                        "This will permanently delete area {area_id} from {zone_id} and unlink \
                         its exits. Re-run as: @delete sublocation {zone_id} {area_id} CONFIRM"
                    )));
                }

                // Rebuild the zone's area map without the target and with
                // every reference to it stripped from the peers.
                let mut remaining: Vec<Area> = zone
                    .areas
                    .values()
                    .filter(|a| a.id != target)
                    .cloned()
                    .collect();
                for area in &mut remaining {
                    area.exits.remove(&target);
                    area.cardinal_exits.retain(|_, to| *to != target);
                }
                let mut rebuilt = Map::new();
                for area in remaining {
                    rebuilt.insert(
                        area.id.to_string(),
                        serde_json::to_value(&area).unwrap_or(Value::Null),
                    );
                }

                let changes = json!({
                    "locations": {zone_id.as_str(): {"areas": {"$set": Value::Object(rebuilt)}}}
                });
                Ok(
                    CommandResult::ok(format!("Deleted area {area_id} from {zone_id}."))
                        .with_changes(changes),
                )
            }
            _ => Ok(CommandResult::fail(
                "Usage: @delete <instance|sublocation> <id...> CONFIRM",
            )),
        }
    }

    async fn connect(
        &self,
        experience: &ExperienceId,
        args: &[String],
    ) -> Result<CommandResult, CommandError> {
        let (Some(zone_id), Some(a_id), Some(b_id)) = (args.first(), args.get(1), args.get(2))
        else {
            return Ok(CommandResult::fail(
                "Usage: @connect <zone_id> <area_a> <area_b> [n|s|e|w]",
            ));
        };
        if a_id == b_id {
            return Ok(CommandResult::fail("An area cannot connect to itself."));
        }
        let cardinal = match args.get(3) {
            Some(raw) => match raw.parse::<Cardinal>() {
                Ok(c) => Some(c),
                Err(_) => {
                    return Ok(CommandResult::fail(format!(
                        "'{raw}' is not a cardinal direction."
                    )))
                }
            },
            None => None,
        };

        let world = self.store.get_world_state(experience).await?;
        let Some(zone) = world.zone(&zone_id.as_str().into()) else {
            return Ok(CommandResult::fail(format!("No zone named {zone_id}.")));
        };
        let (a, b): (AreaId, AreaId) = (a_id.as_str().into(), b_id.as_str().into());
        let (Some(area_a), Some(area_b)) = (zone.areas.get(&a), zone.areas.get(&b)) else {
            return Ok(CommandResult::fail(
                "Both areas must exist in that zone.",
            ));
        };

        // Exits are bidirectional by construction.
        let mut a_patch = json!({"exits": {"$set": with_exit(area_a, &b)}});
        let mut b_patch = json!({"exits": {"$set": with_exit(area_b, &a)}});
        if let Some(direction) = cardinal {
            a_patch["cardinal_exits"] =
                json!({direction.short(): {"$set": b.as_str()}});
            b_patch["cardinal_exits"] =
                json!({direction.opposite().short(): {"$set": a.as_str()}});
        }

        let changes = json!({
            "locations": {zone_id.as_str(): {"areas": {
                a.as_str(): a_patch,
                b.as_str(): b_patch
            }}}
        });

        let direction_note = cardinal
            .map(|c| format!(" ({c} from {a}, {} from {b})", c.opposite()))
            .unwrap_or_default();
        Ok(
            CommandResult::ok(format!("Connected {a} and {b}{direction_note}."))
                .with_changes(changes),
        )
    }

    async fn disconnect(
        &self,
        experience: &ExperienceId,
        args: &[String],
    ) -> Result<CommandResult, CommandError> {
        let (Some(zone_id), Some(a_id), Some(b_id)) = (args.first(), args.get(1), args.get(2))
        else {
            return Ok(CommandResult::fail(
                "Usage: @disconnect <zone_id> <area_a> <area_b>",
            ));
        };

        let world = self.store.get_world_state(experience).await?;
        let Some(zone) = world.zone(&zone_id.as_str().into()) else {
            return Ok(CommandResult::fail(format!("No zone named {zone_id}.")));
        };
        let (a, b): (AreaId, AreaId) = (a_id.as_str().into(), b_id.as_str().into());
        let (Some(area_a), Some(area_b)) = (zone.areas.get(&a), zone.areas.get(&b)) else {
            return Ok(CommandResult::fail(
                "Both areas must exist in that zone.",
            ));
        };

        let changes = json!({
            "locations": {zone_id.as_str(): {"areas": {
                a.as_str(): {
                    "exits": {"$set": without_exit(area_a, &b)},
                    "cardinal_exits": {"$set": cardinals_without(area_a, &b)}
                },
                b.as_str(): {
                    "exits": {"$set": without_exit(area_b, &a)},
                    "cardinal_exits": {"$set": cardinals_without(area_b, &a)}
                }
            }}}
        });

        Ok(CommandResult::ok(format!("Disconnected {a} and {b}.")).with_changes(changes))
    }

    async fn reset(
        &self,
        user: &AuthenticatedUser,
        experience: &ExperienceId,
        args: &[String],
    ) -> Result<CommandResult, CommandError> {
        match args.first().map(String::as_str) {
            Some("instance") => {
                let Some(instance_id) = args.get(1) else {
                    return Ok(CommandResult::fail(
                        "Usage: @reset instance <instance_id> CONFIRM",
                    ));
                };
                if !confirmed(args) {
                    return Ok(CommandResult::ok(format!(
                        "This will restore {instance_id} to its authored state. \
                         Re-run as: @reset instance {instance_id} CONFIRM"
                    )));
                }
                self.store
                    .reset_instance(experience, &instance_id.as_str().into())
                    .await?;
                Ok(CommandResult::ok(format!("Instance {instance_id} reset.")))
            }
            Some("player") => {
                let Some(user_id) = args.get(1) else {
                    return Ok(CommandResult::fail(
                        "Usage: @reset player <user_id> CONFIRM",
                    ));
                };
                if !confirmed(args) {
                    return Ok(CommandResult::ok(format!(
                        "This will delete {user_id}'s view of {experience}. \
                         Re-run as: @reset player {user_id} CONFIRM"
                    )));
                }
                self.store
                    .reset_player(&UserId::new(user_id.as_str()), experience)
                    .await?;
                Ok(CommandResult::ok(format!("Player {user_id} reset.")))
            }
            Some("experience") => {
                if !confirmed(args) {
                    return Ok(CommandResult::ok(format!(
                        "This will re-initialize {experience} from its template. \
                         Re-run as: @reset experience CONFIRM"
                    )));
                }
                self.store.reset_experience(experience).await?;
                tracing::info!(admin = %user.user_id, experience = %experience, "experience reset");
                Ok(CommandResult::ok(format!("Experience {experience} reset.")))
            }
            _ => Ok(CommandResult::fail(
                "Usage: @reset <instance|player|experience> <id...> CONFIRM",
            )),
        }
    }

    async fn locate(
        &self,
        user: &AuthenticatedUser,
        experience: &ExperienceId,
        args: &[String],
    ) -> Result<CommandResult, CommandError> {
        let target = args
            .first()
            .map(|u| UserId::new(u.as_str()))
            .unwrap_or_else(|| user.user_id.clone());
        let view = self.store.get_player_view(experience, &target).await?;

        let place = match (&view.current_location, &view.current_area) {
            (Some(zone), Some(area)) => format!("{zone}/{area}"),
            (Some(zone), None) => zone.to_string(),
            _ => "nowhere".to_string(),
        };
        Ok(CommandResult::ok(format!(
            "{target} is at {place} (version {}, {} items held).",
            view.snapshot_version,
            view.inventory.len()
        )))
    }

    async fn find(
        &self,
        experience: &ExperienceId,
        args: &[String],
    ) -> Result<CommandResult, CommandError> {
        let Some(term) = args.first() else {
            return Ok(CommandResult::fail("Usage: @find <term>"));
        };
        let needle = term.to_ascii_lowercase();

        let world = self.store.get_world_state(experience).await?;
        let lines: Vec<String> = instances_of(&world)
            .filter(|(_, _, instance)| {
                instance
                    .instance_id
                    .as_str()
                    .to_ascii_lowercase()
                    .contains(&needle)
                    || instance
                        .template_id
                        .as_str()
                        .to_ascii_lowercase()
                        .contains(&needle)
            })
            .map(|(zone, area, instance)| {
                format!(
                    "{} ({}) - {}/{}",
                    instance.instance_id, instance.template_id, zone, area
                )
            })
            .collect();

        if lines.is_empty() {
            Ok(CommandResult::ok(format!("No instances match '{term}'.")))
        } else {
            Ok(CommandResult::ok(lines.join("\n")))
        }
    }

    async fn stats(&self, experience: &ExperienceId) -> Result<CommandResult, CommandError> {
        let world = self.store.get_world_state(experience).await?;
        let instances = instances_of(&world).count();
        let players = self.store.users_with_view(experience).await?.len();

        Ok(CommandResult::ok(format!(
            "sessions: {} | zones: {} | instances: {} | players: {} | experiences cached: {} | bus: {}",
            self.sessions.session_count(),
            world.locations.len(),
            instances,
            players,
            self.store.cached_experience_count(),
            if self.bus.is_connected() { "connected" } else { "disconnected" },
        ))
        .with_meta("sessions", self.sessions.session_count())
        .with_meta("timestamp", self.clock.now().timestamp_millis()))
    }
}

fn confirmed(args: &[String]) -> bool {
    args.last().map(String::as_str) == Some(CONFIRM)
}

fn listing(kind: &str, lines: Vec<String>) -> String {
    if lines.is_empty() {
        format!("No {kind}.")
    } else {
        lines.join("\n")
    }
}

fn instances_of(world: &World) -> impl Iterator<Item = (&waymark_domain::ZoneId, &AreaId, &Instance)> {
    world.locations.iter().flat_map(|(zone_id, zone)| {
        zone.areas.iter().flat_map(move |(area_id, area)| {
            area.items
                .iter()
                .map(move |instance| (zone_id, area_id, instance))
        })
    })
}

fn with_exit(area: &Area, to: &AreaId) -> Vec<String> {
    let mut exits: BTreeSet<AreaId> = area.exits.clone();
    exits.insert(to.clone());
    exits.iter().map(ToString::to_string).collect()
}

fn without_exit(area: &Area, to: &AreaId) -> Vec<String> {
    area.exits
        .iter()
        .filter(|e| *e != to)
        .map(ToString::to_string)
        .collect()
}

fn cardinals_without(area: &Area, to: &AreaId) -> Value {
    let mut map = Map::new();
    for (direction, target) in &area.cardinal_exits {
        if target != to {
            map.insert(direction.short().to_string(), Value::String(target.to_string()));
        }
    }
    Value::Object(map)
}
