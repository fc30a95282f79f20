//! Hazard feature model shared by ingestion, resolution and advisories.

pub mod classify;
mod spatial_index;

pub use spatial_index::SpatialIndex;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::geo::GeoPoint;

pub type Tags = BTreeMap<String, String>;

/// The closed set of road hazards the pipeline knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HazardType {
    TrafficSignal,
    ZebraCrossing,
    GiveWay,
    SpeedCamera,
    Roundabout,
    MiniRoundabout,
    SchoolZone,
    BusLane,
    BusStop,
    /// Hard restriction: no entry, reversed one-way, access=no, turn bans.
    NoEntry,
}

impl HazardType {
    pub const ALL: [HazardType; 10] = [
        HazardType::TrafficSignal,
        HazardType::ZebraCrossing,
        HazardType::GiveWay,
        HazardType::SpeedCamera,
        HazardType::Roundabout,
        HazardType::MiniRoundabout,
        HazardType::SchoolZone,
        HazardType::BusLane,
        HazardType::BusStop,
        HazardType::NoEntry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HazardType::TrafficSignal => "TRAFFIC_SIGNAL",
            HazardType::ZebraCrossing => "ZEBRA_CROSSING",
            HazardType::GiveWay => "GIVE_WAY",
            HazardType::SpeedCamera => "SPEED_CAMERA",
            HazardType::Roundabout => "ROUNDABOUT",
            HazardType::MiniRoundabout => "MINI_ROUNDABOUT",
            HazardType::SchoolZone => "SCHOOL_ZONE",
            HazardType::BusLane => "BUS_LANE",
            HazardType::BusStop => "BUS_STOP",
            HazardType::NoEntry => "NO_ENTRY",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for HazardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HazardType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        HazardType::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| format!("unknown hazard type: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.75 {
            ConfidenceLevel::High
        } else if score >= 0.5 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }
}

/// One located hazard. Never mutated after construction; a newer fetch
/// replaces the whole set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HazardFeature {
    pub id: String,
    #[serde(rename = "type")]
    pub hazard_type: HazardType,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub tags: Tags,
    pub source: String,
    pub confidence_hint: f64,
}

impl HazardFeature {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }

    pub fn confidence_level(&self) -> ConfidenceLevel {
        ConfidenceLevel::from_score(self.confidence_hint)
    }

    pub fn voice_eligible(&self) -> bool {
        matches!(
            self.confidence_level(),
            ConfidenceLevel::High | ConfidenceLevel::Medium
        )
    }

    /// Key used when merging results from different sources: type plus
    /// coordinates rounded to 5 decimals.
    pub fn location_key(&self) -> String {
        format!("{}:{:.5}:{:.5}", self.hazard_type, self.lat, self.lon)
    }
}

/// Drops later features whose [`HazardFeature::location_key`] was already seen.
pub fn dedupe_by_location(features: impl IntoIterator<Item = HazardFeature>) -> Vec<HazardFeature> {
    let mut seen = std::collections::HashSet::new();
    features
        .into_iter()
        .filter(|f| seen.insert(f.location_key()))
        .collect()
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("{table}: no entry for {hazard_type}")]
    Missing {
        table: &'static str,
        hazard_type: HazardType,
    },
    #[error("{table}: duplicate entry for {hazard_type}")]
    Duplicate {
        table: &'static str,
        hazard_type: HazardType,
    },
}

/// Per-type parameter lookup built from a list of entries and checked to cover
/// every [`HazardType`] exactly once.
#[derive(Debug, Clone)]
pub struct TypeTable<T> {
    // indexed by declaration order of HazardType
    values: Vec<T>,
}

impl<T: Clone> TypeTable<T> {
    pub fn from_entries(table: &'static str, entries: &[(HazardType, T)]) -> Result<Self, TableError> {
        let mut slots: [Option<T>; 10] = Default::default();
        for (hazard_type, value) in entries {
            let slot = &mut slots[hazard_type.index()];
            if slot.is_some() {
                return Err(TableError::Duplicate {
                    table,
                    hazard_type: *hazard_type,
                });
            }
            *slot = Some(value.clone());
        }

        let mut values = Vec::with_capacity(slots.len());
        for (hazard_type, slot) in HazardType::ALL.into_iter().zip(slots) {
            match slot {
                Some(value) => values.push(value),
                None => return Err(TableError::Missing { table, hazard_type }),
            }
        }
        Ok(Self { values })
    }

    pub fn get(&self, hazard_type: HazardType) -> &T {
        &self.values[hazard_type.index()]
    }
}
