//! Versioned data packs: wire format, parsing, on-device store and the
//! version registry.

mod parser;
mod registry;
mod store;

pub use parser::{
    parse_centres_pack, parse_hazards_pack, parse_routes_pack, validate_hazards_pack,
    validate_routes_pack,
};
pub use registry::{PackRegistry, RegistryRecord};
pub use store::{CacheEnvelope, PackStore, PACK_TTL};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::geo::{BoundingBox, GeoPoint};
use crate::hazards::HazardFeature;

/// Cache key used for the single catalogue of centres.
pub const CENTRES_KEY: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackType {
    Centres,
    Routes,
    Hazards,
}

impl PackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackType::Centres => "centres",
            PackType::Routes => "routes",
            PackType::Hazards => "hazards",
        }
    }
}

impl fmt::Display for PackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "centres" => Ok(PackType::Centres),
            "routes" => Ok(PackType::Routes),
            "hazards" => Ok(PackType::Hazards),
            other => Err(format!("unknown pack type: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackMetadata {
    pub version: String,
    /// ISO-8601 timestamp; kept as text so foreign formats survive a round trip.
    pub generated_at: String,
    pub bbox: BoundingBox,
}

/// Anything carrying pack metadata.
pub trait Pack {
    fn metadata(&self) -> &PackMetadata;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HazardsPack {
    pub metadata: PackMetadata,
    #[serde(alias = "entityId")]
    pub centre_id: String,
    pub hazards: Vec<HazardFeature>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeRoute {
    pub id: String,
    pub name: String,
    pub geometry: Vec<GeoPoint>,
    #[serde(default)]
    pub distance_m: f64,
    #[serde(default)]
    pub duration_s: f64,
    pub start_lat: f64,
    pub start_lon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutesPack {
    pub metadata: PackMetadata,
    #[serde(alias = "entityId")]
    pub centre_id: String,
    pub routes: Vec<PracticeRoute>,
}

/// A test centre the packs are scoped around.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Centre {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: String,
    pub lat: f64,
    pub lon: f64,
}

impl Centre {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CentresPack {
    pub metadata: PackMetadata,
    pub centres: Vec<Centre>,
}

impl Pack for HazardsPack {
    fn metadata(&self) -> &PackMetadata {
        &self.metadata
    }
}

impl Pack for RoutesPack {
    fn metadata(&self) -> &PackMetadata {
        &self.metadata
    }
}

impl Pack for CentresPack {
    fn metadata(&self) -> &PackMetadata {
        &self.metadata
    }
}
