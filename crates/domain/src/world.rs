//! The hierarchical world model: zones and their areas.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::ids::{AreaId, InstanceId, NpcId, ZoneId};
use crate::instance::Instance;

/// A WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gps {
    pub lat: f64,
    pub lng: f64,
}

/// Compass direction for area exits. Serialized as the short form the
/// content files use (`n`/`s`/`e`/`w`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cardinal {
    #[serde(rename = "n")]
    North,
    #[serde(rename = "s")]
    South,
    #[serde(rename = "e")]
    East,
    #[serde(rename = "w")]
    West,
}

impl Cardinal {
    pub fn opposite(&self) -> Cardinal {
        match self {
            Cardinal::North => Cardinal::South,
            Cardinal::South => Cardinal::North,
            Cardinal::East => Cardinal::West,
            Cardinal::West => Cardinal::East,
        }
    }

    pub fn short(&self) -> &'static str {
        match self {
            Cardinal::North => "n",
            Cardinal::South => "s",
            Cardinal::East => "e",
            Cardinal::West => "w",
        }
    }
}

impl std::fmt::Display for Cardinal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Cardinal::North => "north",
            Cardinal::South => "south",
            Cardinal::East => "east",
            Cardinal::West => "west",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for Cardinal {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "n" | "north" => Ok(Cardinal::North),
            "s" | "south" => Ok(Cardinal::South),
            "e" | "east" => Ok(Cardinal::East),
            "w" | "west" => Ok(Cardinal::West),
            other => Err(DomainError::UnknownCardinal(other.to_string())),
        }
    }
}

/// A subdivision of a zone. The ordered `items` list is the authoritative
/// source for which instances exist at this area.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Area {
    pub id: AreaId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub items: Vec<Instance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub npc: Option<NpcId>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub exits: BTreeSet<AreaId>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub cardinal_exits: IndexMap<Cardinal, AreaId>,
}

impl Area {
    pub fn item(&self, instance_id: &InstanceId) -> Option<&Instance> {
        self.items.iter().find(|i| &i.instance_id == instance_id)
    }
}

/// A themed location within an experience; the granularity at which an
/// AOI is produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub gps: Gps,
    #[serde(default)]
    pub areas: IndexMap<AreaId, Area>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub npc: Option<NpcId>,
}

impl Zone {
    /// Resolve an area by id, or by name case-insensitively.
    pub fn resolve_area(&self, target: &str) -> Option<&Area> {
        self.areas.get(&AreaId::new(target)).or_else(|| {
            self.areas
                .values()
                .find(|a| a.name.eq_ignore_ascii_case(target))
        })
    }
}

/// World snapshot: every zone in an experience, in stored order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct World {
    #[serde(default)]
    pub locations: IndexMap<ZoneId, Zone>,
}

impl World {
    pub fn zone(&self, zone_id: &ZoneId) -> Option<&Zone> {
        self.locations.get(zone_id)
    }

    pub fn area(&self, zone_id: &ZoneId, area_id: &AreaId) -> Option<&Area> {
        self.locations.get(zone_id).and_then(|z| z.areas.get(area_id))
    }

    /// Resolve a zone by id, or by name case-insensitively.
    pub fn resolve_zone(&self, target: &str) -> Option<&Zone> {
        self.locations.get(&ZoneId::new(target)).or_else(|| {
            self.locations
                .values()
                .find(|z| z.name.eq_ignore_ascii_case(target))
        })
    }

    /// Locate an instance anywhere in the world.
    pub fn find_instance(
        &self,
        instance_id: &InstanceId,
    ) -> Option<(&ZoneId, &AreaId, &Instance)> {
        for (zone_id, zone) in &self.locations {
            for (area_id, area) in &zone.areas {
                if let Some(instance) = area.item(instance_id) {
                    return Some((zone_id, area_id, instance));
                }
            }
        }
        None
    }
}
