//! Maps raw map-data elements onto hazard features.
//!
//! [`resolve_types`] is a pure function from a tag set to every hazard type it
//! satisfies; one element can produce several features.

use std::collections::{BTreeSet, HashSet};

use tracing::debug;

use super::{HazardFeature, HazardType, TableError, Tags, TypeTable};
use crate::overpass::OverpassElement;

pub const SOURCE_OVERPASS: &str = "overpass";

/// Bus lanes tagged only through lane lists are inferred and stay below the
/// voice threshold.
pub const BUS_LANE_EXPLICIT_CONFIDENCE: f64 = 0.7;
pub const BUS_LANE_INFERRED_CONFIDENCE: f64 = 0.3;

const BASE_CONFIDENCE: [(HazardType, f64); 10] = [
    (HazardType::TrafficSignal, 0.85),
    (HazardType::Roundabout, 0.8),
    (HazardType::MiniRoundabout, 0.78),
    (HazardType::ZebraCrossing, 0.75),
    (HazardType::SchoolZone, 0.7),
    (HazardType::BusStop, 0.68),
    (HazardType::GiveWay, 0.72),
    (HazardType::SpeedCamera, 0.85),
    (HazardType::BusLane, BUS_LANE_INFERRED_CONFIDENCE),
    (HazardType::NoEntry, 0.92),
];

fn tag<'a>(tags: &'a Tags, key: &str) -> Option<&'a str> {
    tags.get(key).map(String::as_str)
}

fn tag_is(tags: &Tags, key: &str, value: &str) -> bool {
    tag(tags, key) == Some(value)
}

fn has_tag(tags: &Tags, key: &str) -> bool {
    tags.get(key).is_some_and(|v| !v.is_empty())
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(needle)
}

fn is_give_way_sign(sign: &str) -> bool {
    let lower = sign.to_lowercase();
    ["giveway", "give_way", "give way"]
        .iter()
        .any(|needle| lower.contains(needle))
}

fn has_explicit_busway(tags: &Tags) -> bool {
    has_tag(tags, "busway") || has_tag(tags, "busway:left") || has_tag(tags, "busway:right")
}

fn is_hard_restriction(tags: &Tags) -> bool {
    if tags.is_empty() {
        return false;
    }
    let road_context =
        tags.contains_key("highway") || tags.contains_key("junction") || tags.contains_key("oneway");
    let access_denied = road_context
        && (tag_is(tags, "access", "no")
            || tag_is(tags, "vehicle", "no")
            || tag_is(tags, "motor_vehicle", "no"));
    let reverse_oneway = road_context && tag_is(tags, "oneway", "-1");
    let no_entry_sign = ["traffic_sign", "traffic_sign:forward", "traffic_sign:backward"]
        .iter()
        .filter_map(|key| tag(tags, key))
        .any(|sign| contains_ignore_case(sign, "no_entry") || contains_ignore_case(sign, "no entry"));
    let turn_ban = tag_is(tags, "type", "restriction")
        && tag(tags, "restriction").is_some_and(|r| r.to_lowercase().starts_with("no_"));

    access_denied || reverse_oneway || no_entry_sign || turn_ban
}

/// Every hazard type the tag set satisfies.
pub fn resolve_types(tags: &Tags) -> BTreeSet<HazardType> {
    let mut types = BTreeSet::new();
    if tags.is_empty() {
        return types;
    }

    if tag_is(tags, "highway", "traffic_signals") {
        types.insert(HazardType::TrafficSignal);
    }

    let zebra = tag_is(tags, "crossing", "zebra") || tag_is(tags, "crossing_ref", "zebra");
    if zebra {
        types.insert(HazardType::ZebraCrossing);
    }

    if tag_is(tags, "junction", "roundabout") {
        types.insert(HazardType::Roundabout);
    }

    if tag_is(tags, "highway", "mini_roundabout")
        || tag_is(tags, "junction", "mini_roundabout")
        || tag_is(tags, "mini_roundabout", "yes")
    {
        types.insert(HazardType::MiniRoundabout);
    }

    if tag_is(tags, "amenity", "school") || tag_is(tags, "landuse", "school") {
        types.insert(HazardType::SchoolZone);
    }

    let bus = tag(tags, "bus");
    let bus_stop = tag_is(tags, "highway", "bus_stop")
        || (tag_is(tags, "public_transport", "stop_position")
            && matches!(bus, Some("yes") | Some("designated")))
        || (tag_is(tags, "public_transport", "platform")
            && (bus == Some("yes") || tag_is(tags, "highway", "bus_stop")));
    if bus_stop {
        types.insert(HazardType::BusStop);
    }

    if tag_is(tags, "highway", "give_way")
        || tag_is(tags, "give_way", "yes")
        || tag(tags, "traffic_sign").is_some_and(is_give_way_sign)
    {
        types.insert(HazardType::GiveWay);
    }

    if tag_is(tags, "highway", "speed_camera")
        || tag_is(tags, "enforcement", "speed_camera")
        || tag_is(tags, "speed_camera", "yes")
        || tag_is(tags, "camera:speed", "yes")
    {
        types.insert(HazardType::SpeedCamera);
    }

    if has_tag(tags, "bus:lanes") || has_tag(tags, "lanes:bus") || has_explicit_busway(tags) {
        types.insert(HazardType::BusLane);
    }

    if is_hard_restriction(tags) {
        types.insert(HazardType::NoEntry);
    }

    types
}

/// Turns Overpass elements into scored, deduplicated hazard features.
#[derive(Debug, Clone)]
pub struct Classifier {
    confidence: TypeTable<f64>,
}

impl Classifier {
    pub fn new() -> Result<Self, TableError> {
        Ok(Self {
            confidence: TypeTable::from_entries("base confidence", &BASE_CONFIDENCE)?,
        })
    }

    pub fn score(&self, hazard_type: HazardType, tags: &Tags) -> f64 {
        if hazard_type == HazardType::BusLane {
            return if has_explicit_busway(tags) {
                BUS_LANE_EXPLICIT_CONFIDENCE
            } else {
                BUS_LANE_INFERRED_CONFIDENCE
            };
        }
        *self.confidence.get(hazard_type)
    }

    /// Builds one feature per (type, element kind, element id), restricted to
    /// `allowed` when given. Elements without a usable coordinate are skipped.
    pub fn features_from_elements(
        &self,
        elements: &[OverpassElement],
        allowed: Option<&BTreeSet<HazardType>>,
    ) -> Vec<HazardFeature> {
        let mut seen = HashSet::new();
        let mut features = Vec::new();
        let mut skipped = 0usize;

        for element in elements {
            let types = resolve_types(&element.tags);
            if types.is_empty() {
                continue;
            }
            let Some(point) = element.coordinate() else {
                skipped += 1;
                continue;
            };

            for hazard_type in types {
                if allowed.is_some_and(|a| !a.contains(&hazard_type)) {
                    continue;
                }
                let id = format!(
                    "{}:{}:{}",
                    hazard_type.as_str().to_lowercase(),
                    element.element_type,
                    element.id
                );
                if !seen.insert(id.clone()) {
                    continue;
                }
                features.push(HazardFeature {
                    id,
                    hazard_type,
                    lat: point.lat,
                    lon: point.lon,
                    tags: element.tags.clone(),
                    source: SOURCE_OVERPASS.to_string(),
                    confidence_hint: self.score(hazard_type, &element.tags),
                });
            }
        }

        debug!(
            elements = elements.len(),
            features = features.len(),
            skipped,
            "Mapped upstream elements"
        );
        features
    }
}
