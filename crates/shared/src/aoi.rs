//! Area-of-Interest payload types.
//!
//! The AOI is the server-composed snapshot of the one zone relevant to a
//! client's GPS position. Item and NPC entries are template-merged records
//! (see `waymark_domain::merged_record`), so clients render them without a
//! second lookup.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use waymark_domain::{AreaId, Gps, ZoneId};

/// The selected zone, without its areas (those are siblings in the frame).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneView {
    pub id: ZoneId,
    pub name: String,
    pub description: String,
    pub gps: Gps,
}

/// One area with its visible, template-merged contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AreaView {
    pub id: AreaId,
    pub name: String,
    pub description: String,
    pub items: Vec<Value>,
    pub npcs: Vec<Value>,
}

/// The player block of an AOI frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSummary {
    pub current_location: Option<ZoneId>,
    pub current_area: Option<AreaId>,
    pub inventory: Vec<Value>,
}

/// A complete AOI snapshot, stamped with the view's version as of the read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AreaOfInterest {
    pub snapshot_version: u64,
    pub zone: Option<ZoneView>,
    pub areas: IndexMap<AreaId, AreaView>,
    pub player: PlayerSummary,
}
