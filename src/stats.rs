use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::hazards::{ConfidenceLevel, HazardFeature, HazardType};
use crate::pack::HazardsPack;

/// Flat per-build summary, one CSV row per hazards pack.
#[derive(Debug, Default, Clone, Serialize)]
pub struct HazardStats {
    pub timestamp: DateTime<Utc>,
    pub centre_id: Option<String>,
    pub version: Option<String>,
    pub total_hazards: usize,

    // hazard types
    pub traffic_signals: usize,
    pub zebra_crossings: usize,
    pub give_ways: usize,
    pub speed_cameras: usize,
    pub roundabouts: usize,
    pub mini_roundabouts: usize,
    pub school_zones: usize,
    pub bus_lanes: usize,
    pub bus_stops: usize,
    pub no_entries: usize,

    // confidence
    pub high_confidence: usize,
    pub medium_confidence: usize,
    pub low_confidence: usize,
    pub voice_eligible: usize,

    // upstream health
    pub stale_queries: usize,
    pub empty_queries: usize,

    // error tracking
    pub error_type: Option<String>,
    pub error_message: Option<String>,
}

impl HazardStats {
    pub fn from_hazards(hazards: &[HazardFeature]) -> Self {
        let mut s = HazardStats {
            timestamp: Utc::now(),
            total_hazards: hazards.len(),
            ..Default::default()
        };

        for h in hazards {
            let slot = match h.hazard_type {
                HazardType::TrafficSignal => &mut s.traffic_signals,
                HazardType::ZebraCrossing => &mut s.zebra_crossings,
                HazardType::GiveWay => &mut s.give_ways,
                HazardType::SpeedCamera => &mut s.speed_cameras,
                HazardType::Roundabout => &mut s.roundabouts,
                HazardType::MiniRoundabout => &mut s.mini_roundabouts,
                HazardType::SchoolZone => &mut s.school_zones,
                HazardType::BusLane => &mut s.bus_lanes,
                HazardType::BusStop => &mut s.bus_stops,
                HazardType::NoEntry => &mut s.no_entries,
            };
            *slot += 1;

            match h.confidence_level() {
                ConfidenceLevel::High => s.high_confidence += 1,
                ConfidenceLevel::Medium => s.medium_confidence += 1,
                ConfidenceLevel::Low => s.low_confidence += 1,
            }

            if h.voice_eligible() {
                s.voice_eligible += 1;
            }
        }

        s
    }

    pub fn from_pack(pack: &HazardsPack) -> Self {
        let mut s = Self::from_hazards(&pack.hazards);
        s.centre_id = Some(pack.centre_id.clone());
        s.version = Some(pack.metadata.version.clone());
        s
    }

    pub fn pct(part: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            (part as f64 / total as f64) * 100.0
        }
    }

    pub fn voice_eligible_pct(&self) -> f64 {
        Self::pct(self.voice_eligible, self.total_hazards)
    }

    /// Create an error record with timestamp and error information
    pub fn from_error(error_type: &str, error_message: &str) -> Self {
        HazardStats {
            timestamp: Utc::now(),
            error_type: Some(error_type.to_string()),
            error_message: Some(error_message.to_string()),
            ..Default::default()
        }
    }

    pub fn with_centre_info(mut self, centre_id: &str, version: &str) -> Self {
        self.centre_id = Some(centre_id.to_string());
        self.version = Some(version.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hazards::Tags;

    fn hazard(id: &str, hazard_type: HazardType, confidence: f64) -> HazardFeature {
        HazardFeature {
            id: id.to_string(),
            hazard_type,
            lat: 51.5,
            lon: -0.1,
            tags: Tags::new(),
            source: "overpass".to_string(),
            confidence_hint: confidence,
        }
    }

    #[test]
    fn test_pct_with_zero_total() {
        assert_eq!(HazardStats::pct(10, 0), 0.0);
    }

    #[test]
    fn test_pct_normal_values() {
        assert_eq!(HazardStats::pct(50, 100), 50.0);
        assert_eq!(HazardStats::pct(1, 4), 25.0);
    }

    #[test]
    fn test_from_hazards_empty() {
        let stats = HazardStats::from_hazards(&[]);
        assert_eq!(stats.total_hazards, 0);
        assert_eq!(stats.voice_eligible_pct(), 0.0);
    }

    #[test]
    fn test_from_hazards_counts_types_and_levels() {
        let stats = HazardStats::from_hazards(&[
            hazard("a", HazardType::TrafficSignal, 0.85),
            hazard("b", HazardType::BusLane, 0.3),
            hazard("c", HazardType::BusLane, 0.7),
            hazard("d", HazardType::NoEntry, 0.92),
        ]);

        assert_eq!(stats.total_hazards, 4);
        assert_eq!(stats.traffic_signals, 1);
        assert_eq!(stats.bus_lanes, 2);
        assert_eq!(stats.no_entries, 1);
        assert_eq!(stats.high_confidence, 2);
        assert_eq!(stats.medium_confidence, 1);
        assert_eq!(stats.low_confidence, 1);
        assert_eq!(stats.voice_eligible, 3);
        assert_eq!(stats.voice_eligible_pct(), 75.0);
    }

    #[test]
    fn test_from_error_keeps_message() {
        let stats = HazardStats::from_error("network", "timeout").with_centre_info("c1", "hazards-1");
        assert_eq!(stats.error_type.as_deref(), Some("network"));
        assert_eq!(stats.centre_id.as_deref(), Some("c1"));
        assert_eq!(stats.total_hazards, 0);
    }
}
