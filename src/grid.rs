use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{GridPoint, WorkItem, round_coord};
use crate::error::BulkError;

/// Slack applied at the upper bound to absorb floating-point accumulation.
pub const AXIS_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

/// Bounding box, step sizes and years of a download plan.
///
/// Axis values run from `min` to `max` inclusive and are rounded to six
/// decimals, so the same grid always yields the same artifact paths.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSpec {
    bbox: BoundingBox,
    dlat: f64,
    dlon: f64,
    years: Vec<i32>,
}

impl GridSpec {
    pub fn new(bbox: BoundingBox, dlat: f64, dlon: f64, years: Vec<i32>) -> Result<Self, BulkError> {
        for (name, step) in [("dlat", dlat), ("dlon", dlon)] {
            if !step.is_finite() || step <= 0.0 {
                return Err(BulkError::InvalidGrid(format!(
                    "{name} must be a positive number, got {step}"
                )));
            }
        }
        let bounds = [
            ("lat_min", bbox.lat_min),
            ("lat_max", bbox.lat_max),
            ("lon_min", bbox.lon_min),
            ("lon_max", bbox.lon_max),
        ];
        for (name, value) in bounds {
            if !value.is_finite() {
                return Err(BulkError::InvalidGrid(format!(
                    "{name} must be a finite number, got {value}"
                )));
            }
        }
        if bbox.lat_min > bbox.lat_max || bbox.lon_min > bbox.lon_max {
            warn!(?bbox, "bounding box is inverted; grid is empty");
        }

        let mut unique_years = Vec::with_capacity(years.len());
        for year in years {
            if !unique_years.contains(&year) {
                unique_years.push(year);
            }
        }

        Ok(Self {
            bbox,
            dlat,
            dlon,
            years: unique_years,
        })
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    pub fn years(&self) -> &[i32] {
        &self.years
    }

    pub fn latitudes(&self) -> Vec<f64> {
        axis(self.bbox.lat_min, self.bbox.lat_max, self.dlat)
    }

    pub fn longitudes(&self) -> Vec<f64> {
        axis(self.bbox.lon_min, self.bbox.lon_max, self.dlon)
    }

    /// Grid points in latitude-major order.
    pub fn points(&self) -> Vec<GridPoint> {
        let lons = self.longitudes();
        self.latitudes()
            .into_iter()
            .flat_map(|lat| lons.iter().map(move |&lon| GridPoint::new(lat, lon)))
            .collect()
    }

    pub fn planned_items(&self) -> usize {
        self.latitudes().len() * self.longitudes().len() * self.years.len()
    }

    /// Lazily yields every (year, point) pair: outer year, then latitude, then longitude.
    ///
    /// Pure function of the grid; calling it twice gives identical sequences.
    pub fn work_items(&self) -> impl Iterator<Item = WorkItem> + '_ {
        let points = self.points();
        self.years.iter().flat_map(move |&year| {
            points
                .clone()
                .into_iter()
                .map(move |point| WorkItem::new(year, point))
        })
    }
}

/// Inclusive arithmetic progression from `min` to `max`, rounded to grid precision.
///
/// Empty when `min > max` or the step is not a positive finite number.
pub fn axis(min: f64, max: f64, step: f64) -> Vec<f64> {
    if !min.is_finite() || !max.is_finite() || !step.is_finite() || step <= 0.0 {
        return Vec::new();
    }

    let mut values: Vec<f64> = Vec::new();
    let mut index: u64 = 0;
    loop {
        let value = min + index as f64 * step;
        if value > max + AXIS_EPSILON {
            break;
        }
        let rounded = round_coord(value);
        if values.last() != Some(&rounded) {
            values.push(rounded);
        }
        index += 1;
    }
    values
}
