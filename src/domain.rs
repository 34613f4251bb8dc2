use std::fmt;

use serde::{Deserialize, Serialize};

/// Decimal places kept on grid coordinates.
pub const COORD_DECIMALS: i32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GridPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self {
            lat: round_coord(lat),
            lon: round_coord(lon),
        }
    }

    /// Well-known-text form expected by the provider: `POINT(lon lat)`.
    pub fn wkt(&self) -> String {
        format!("POINT({:?} {:?})", self.lon, self.lat)
    }
}

impl fmt::Display for GridPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4},{:.4}", self.lat, self.lon)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub year: i32,
    pub point: GridPoint,
}

impl WorkItem {
    pub fn new(year: i32, point: GridPoint) -> Self {
        Self { year, point }
    }

    /// File name of the artifact; fixed precision so re-runs resolve to the same name.
    pub fn artifact_name(&self) -> String {
        format!(
            "nsrdb_{}_{:.4}_{:.4}.csv",
            self.year, self.point.lat, self.point.lon
        )
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.year, self.point)
    }
}

pub fn round_coord(value: f64) -> f64 {
    let scale = 10f64.powi(COORD_DECIMALS);
    let rounded = (value * scale).round() / scale;
    // normalise -0.0 so names never carry a stray sign
    if rounded == 0.0 { 0.0 } else { rounded }
}
