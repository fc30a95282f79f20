//! Overpass response model and query construction.

mod query;

pub use query::{OutputMode, union_query};

use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;
use crate::hazards::Tags;

pub const DEFAULT_OVERPASS_URL: &str = "https://overpass-api.de/api/interpreter";

/// A node, way or relation as returned by `out body geom|center`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverpassElement {
    #[serde(rename = "type")]
    pub element_type: String,
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center: Option<GeoPoint>,
    /// Way/relation member coordinates; Overpass emits `null` for members
    /// outside the query area.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Vec<Option<GeoPoint>>>,
    #[serde(default)]
    pub tags: Tags,
}

impl OverpassElement {
    /// Own coordinate, else geometry centroid, else the server-computed centre.
    pub fn coordinate(&self) -> Option<GeoPoint> {
        if let (Some(lat), Some(lon)) = (self.lat, self.lon) {
            let p = GeoPoint::new(lat, lon);
            if p.is_finite() {
                return Some(p);
            }
        }
        if let Some(centroid) = self.geometry.as_deref().and_then(centroid) {
            return Some(centroid);
        }
        self.center.filter(GeoPoint::is_finite)
    }
}

fn centroid(points: &[Option<GeoPoint>]) -> Option<GeoPoint> {
    let (mut lat, mut lon, mut n) = (0.0, 0.0, 0usize);
    for p in points.iter().flatten().filter(|p| p.is_finite()) {
        lat += p.lat;
        lon += p.lon;
        n += 1;
    }
    (n > 0).then(|| GeoPoint::new(lat / n as f64, lon / n as f64))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverpassPayload {
    #[serde(default)]
    pub elements: Vec<OverpassElement>,
}

impl OverpassPayload {
    /// Parses a response body, dropping individual elements that do not fit
    /// the model instead of failing the whole payload.
    pub fn parse(body: &str) -> serde_json::Result<Self> {
        #[derive(Deserialize)]
        struct Loose {
            #[serde(default)]
            elements: Vec<serde_json::Value>,
        }
        let loose: Loose = serde_json::from_str(body)?;
        let elements = loose
            .elements
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect();
        Ok(Self { elements })
    }
}
