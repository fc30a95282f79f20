use crate::hazards::HazardType;

pub const NEAR_M: f64 = 80.0;
pub const MINI_ROUNDABOUT_NEAR_M: f64 = 50.0;
pub const FAST_KPH: f64 = 45.0;

/// Default spoken text for an advisory, before budgeting.
pub fn speech_text(hazard_type: HazardType, distance_m: f64, speed_mps: f64) -> &'static str {
    let near = distance_m <= NEAR_M;
    let fast = (speed_mps * 3.6).max(0.0) >= FAST_KPH;
    match hazard_type {
        HazardType::Roundabout if near => "Roundabout now. Check your lane.",
        HazardType::Roundabout if fast => "Roundabout ahead. Ease off early.",
        HazardType::Roundabout => "Roundabout ahead. Prepare early.",
        HazardType::MiniRoundabout if distance_m <= MINI_ROUNDABOUT_NEAR_M => {
            "Mini roundabout now. Give way to the right."
        }
        HazardType::MiniRoundabout => "Mini roundabout ahead. Slow now.",
        HazardType::SchoolZone if near => "School zone now. Watch for children.",
        HazardType::SchoolZone if fast => "School zone ahead. Slow down now.",
        HazardType::SchoolZone => "School zone ahead. Slow down.",
        HazardType::ZebraCrossing if near => "Zebra crossing now. Check for pedestrians.",
        HazardType::ZebraCrossing if fast => "Zebra crossing ahead. Ease off.",
        HazardType::ZebraCrossing => "Zebra crossing ahead. Watch for pedestrians.",
        HazardType::GiveWay if near => "Give way now. Look both ways.",
        HazardType::GiveWay if fast => "Give way ahead. Slow down early.",
        HazardType::GiveWay => "Give way ahead. Yield.",
        HazardType::TrafficSignal if near => "Traffic lights now. Be ready to stop.",
        HazardType::TrafficSignal if fast => "Traffic lights ahead. Ease off.",
        HazardType::TrafficSignal => "Traffic lights ahead. Prepare to stop.",
        HazardType::SpeedCamera => "Speed camera ahead. Check speed.",
        HazardType::BusLane => "Bus lane ahead. Follow lane signs.",
        HazardType::BusStop => "Bus stop ahead. Watch for buses.",
        HazardType::NoEntry => "No entry ahead. Avoid this direction.",
    }
}
