use crate::hazards::{HazardType, TableError, TypeTable};

/// When a feature of a given type becomes a prompt candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Trigger {
    /// Fires once at `distance_m`. Unscaled triggers ignore prompt sensitivity.
    Single { distance_m: f64, scaled: bool },
    /// An early heads-up followed by a late reminder.
    Staged {
        primary_m: f64,
        secondary_m: f64,
        min_secondary_speed_mph: Option<f64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdvisoryRule {
    pub trigger: Trigger,
    pub priority: u8,
}

impl AdvisoryRule {
    /// Staged and unscaled rules gate themselves per feature and skip the
    /// blanket per-type cooldowns.
    pub fn self_gated(&self) -> bool {
        !matches!(self.trigger, Trigger::Single { scaled: true, .. })
    }
}

const fn single(distance_m: f64, priority: u8) -> AdvisoryRule {
    AdvisoryRule {
        trigger: Trigger::Single {
            distance_m,
            scaled: true,
        },
        priority,
    }
}

const fn staged(primary_m: f64, secondary_m: f64, min_speed: Option<f64>, priority: u8) -> AdvisoryRule {
    AdvisoryRule {
        trigger: Trigger::Staged {
            primary_m,
            secondary_m,
            min_secondary_speed_mph: min_speed,
        },
        priority,
    }
}

pub const SECONDARY_MIN_SPEED_MPH: f64 = 15.0;

const RULES: [(HazardType, AdvisoryRule); 10] = [
    (
        HazardType::NoEntry,
        AdvisoryRule {
            trigger: Trigger::Single {
                distance_m: 60.0,
                scaled: false,
            },
            priority: 7,
        },
    ),
    (HazardType::Roundabout, single(250.0, 6)),
    (
        HazardType::MiniRoundabout,
        staged(120.0, 50.0, Some(SECONDARY_MIN_SPEED_MPH), 5),
    ),
    (HazardType::SpeedCamera, staged(250.0, 80.0, None, 5)),
    (HazardType::SchoolZone, single(250.0, 4)),
    (HazardType::ZebraCrossing, single(120.0, 3)),
    (HazardType::GiveWay, single(110.0, 3)),
    (
        HazardType::TrafficSignal,
        staged(120.0, 50.0, Some(SECONDARY_MIN_SPEED_MPH), 2),
    ),
    (
        HazardType::BusStop,
        staged(120.0, 50.0, Some(SECONDARY_MIN_SPEED_MPH), 2),
    ),
    (HazardType::BusLane, single(250.0, 1)),
];

/// Trigger and priority parameters for every hazard type.
#[derive(Debug, Clone)]
pub struct AdvisoryRules {
    table: TypeTable<AdvisoryRule>,
}

impl AdvisoryRules {
    pub fn new() -> Result<Self, TableError> {
        Ok(Self {
            table: TypeTable::from_entries("advisory rules", &RULES)?,
        })
    }

    pub fn get(&self, hazard_type: HazardType) -> &AdvisoryRule {
        self.table.get(hazard_type)
    }

    pub fn self_gated(&self, hazard_type: HazardType) -> bool {
        self.get(hazard_type).self_gated()
    }
}

/// Canonical spoken and displayed name of a type.
pub fn keyword(hazard_type: HazardType) -> &'static str {
    match hazard_type {
        HazardType::Roundabout => "Roundabout",
        HazardType::MiniRoundabout => "Mini roundabout",
        HazardType::SchoolZone => "School zone",
        HazardType::ZebraCrossing => "Zebra crossing",
        HazardType::GiveWay => "Give way",
        HazardType::TrafficSignal => "Traffic lights",
        HazardType::SpeedCamera => "Speed camera",
        HazardType::BusLane => "Bus lane",
        HazardType::BusStop => "Bus stop",
        HazardType::NoEntry => "No entry",
    }
}

pub fn action_hint(hazard_type: HazardType) -> &'static str {
    match hazard_type {
        HazardType::Roundabout => "Prepare early.",
        HazardType::MiniRoundabout => "Slow now.",
        HazardType::SchoolZone => "Slow down.",
        HazardType::ZebraCrossing => "Watch for pedestrians.",
        HazardType::GiveWay => "Yield.",
        HazardType::TrafficSignal => "Prepare to stop.",
        HazardType::SpeedCamera => "Check speed.",
        HazardType::BusLane => "Follow lane signs.",
        HazardType::BusStop => "Watch for buses.",
        HazardType::NoEntry => "Rerouting now.",
    }
}

/// Visual banner text.
pub fn message(hazard_type: HazardType) -> String {
    match hazard_type {
        HazardType::NoEntry => "No entry ahead. Rerouting.".to_string(),
        other => format!("Advisory: {} ahead", keyword(other).to_lowercase()),
    }
}
