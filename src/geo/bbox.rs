use serde::{Deserialize, Serialize};

use super::GeoPoint;
use crate::error::{SyncError, SyncResult};

const METERS_PER_DEGREE_LAT: f64 = 111_320.0;
const MIN_LON_METERS_PER_DEGREE: f64 = 10_000.0;

/// Largest span accepted on either axis before an upstream query is issued.
pub const MAX_SPAN_DEGREES: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl BoundingBox {
    /// Square box of `delta` degrees on each side of `center`.
    pub fn around(center: GeoPoint, delta: f64) -> Self {
        Self {
            south: center.lat - delta,
            west: center.lon - delta,
            north: center.lat + delta,
            east: center.lon + delta,
        }
    }

    /// Smallest box enclosing `points`, grown by `radius_m` in every direction.
    ///
    /// The longitude delta is scaled by the cosine of the mean latitude so the
    /// real-world margin stays constant. Returns `None` for an empty slice.
    pub fn enclosing(points: &[GeoPoint], radius_m: f64) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut bbox = Self {
            south: f64::INFINITY,
            west: f64::INFINITY,
            north: f64::NEG_INFINITY,
            east: f64::NEG_INFINITY,
        };
        let mut lat_sum = 0.0;
        for p in points {
            bbox.south = bbox.south.min(p.lat);
            bbox.north = bbox.north.max(p.lat);
            bbox.west = bbox.west.min(p.lon);
            bbox.east = bbox.east.max(p.lon);
            lat_sum += p.lat;
        }
        let mean_lat = lat_sum / points.len() as f64;
        let lat_delta = radius_m / METERS_PER_DEGREE_LAT;
        let lon_meters_per_degree =
            (METERS_PER_DEGREE_LAT * mean_lat.to_radians().cos()).abs().max(MIN_LON_METERS_PER_DEGREE);
        let lon_delta = radius_m / lon_meters_per_degree;

        bbox.south -= lat_delta;
        bbox.north += lat_delta;
        bbox.west -= lon_delta;
        bbox.east += lon_delta;
        Some(bbox)
    }

    pub fn lat_span(&self) -> f64 {
        self.north - self.south
    }

    pub fn lon_span(&self) -> f64 {
        self.east - self.west
    }

    pub fn contains(&self, p: GeoPoint) -> bool {
        (self.south..=self.north).contains(&p.lat) && (self.west..=self.east).contains(&p.lon)
    }

    /// Rejects non-finite, inverted, out-of-range or oversized boxes.
    pub fn validate(&self) -> SyncResult<()> {
        let values = [self.south, self.west, self.north, self.east];
        if !values.iter().all(|v| v.is_finite()) {
            return Err(SyncError::BboxRejected(
                "south, west, north, east must be valid numbers".into(),
            ));
        }
        if self.south >= self.north || self.west >= self.east {
            return Err(SyncError::BboxRejected(
                "expected south<north and west<east".into(),
            ));
        }
        if self.south < -90.0 || self.north > 90.0 || self.west < -180.0 || self.east > 180.0 {
            return Err(SyncError::BboxRejected(
                "out of valid latitude/longitude range".into(),
            ));
        }
        if self.lat_span() > MAX_SPAN_DEGREES || self.lon_span() > MAX_SPAN_DEGREES {
            return Err(SyncError::BboxRejected(format!(
                "too large ({:.3} x {:.3} deg); reduce the area",
                self.lat_span(),
                self.lon_span()
            )));
        }
        Ok(())
    }

    /// `south,west,north,east` with 5 decimals, used in cache keys.
    pub fn cache_fragment(&self) -> String {
        format!(
            "{:.5},{:.5},{:.5},{:.5}",
            self.south, self.west, self.north, self.east
        )
    }
}
