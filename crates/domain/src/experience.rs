//! Experience configuration.
//!
//! An experience is the top of the content hierarchy: one configuration
//! record selects the consistency model, the bootstrap state for new
//! players, and the GPS anchors used by the AOI builder.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::geo::Geography;
use crate::ids::{ExperienceId, ZoneId};
use crate::instance::Instance;

/// Consistency model for an experience's world state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateModel {
    /// One authoritative world per experience, shared by all players.
    Shared,
    /// Each player gets a private copy of the world in their view.
    Isolated,
}

impl std::fmt::Display for StateModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateModel::Shared => write!(f, "shared"),
            StateModel::Isolated => write!(f, "isolated"),
        }
    }
}

/// Initial state handed to a player view on first connect.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bootstrap {
    #[serde(default)]
    pub starting_location: Option<ZoneId>,
    #[serde(default)]
    pub starting_inventory: Vec<Instance>,
}

/// Feature switches declared by the experience author.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub gps_based: bool,
    #[serde(default)]
    pub ar_enabled: bool,
    #[serde(default)]
    pub multiplayer: bool,
    /// Forward-compatible capability flags.
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

fn default_geofence_radius_m() -> f64 {
    75.0
}

/// One experience's static configuration, loaded from
/// `experiences/<id>/config` and cached in memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperienceConfig {
    pub experience_id: ExperienceId,
    pub state_model: StateModel,
    #[serde(default)]
    pub bootstrap: Bootstrap,
    #[serde(default)]
    pub capabilities: Capabilities,
    /// GPS anchors mapping real-world positions onto zones.
    #[serde(default)]
    pub geographies: Vec<Geography>,
    /// Radius within which a geography anchors a zone to a position.
    #[serde(default = "default_geofence_radius_m")]
    pub geofence_radius_m: f64,
}
