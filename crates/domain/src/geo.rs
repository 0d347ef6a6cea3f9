//! GPS geography and distance queries.

use serde::{Deserialize, Serialize};

use crate::ids::ZoneId;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A GPS anchor tying a real-world position to a zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Geography {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    pub zone_id: ZoneId,
}

/// Great-circle distance in meters between two WGS84 coordinates.
pub fn haversine_m(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);

    2.0 * a.sqrt().asin() * EARTH_RADIUS_M
}

/// Geographies within `radius_m` of a position, closest first.
pub fn nearby_geographies(
    geographies: &[Geography],
    lat: f64,
    lng: f64,
    radius_m: f64,
) -> Vec<(&Geography, f64)> {
    let mut hits: Vec<(&Geography, f64)> = geographies
        .iter()
        .map(|g| (g, haversine_m(lat, lng, g.lat, g.lng)))
        .filter(|(_, d)| *d <= radius_m)
        .collect();
    hits.sort_by(|a, b| a.1.total_cmp(&b.1));
    hits
}
