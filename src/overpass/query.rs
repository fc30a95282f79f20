use std::collections::BTreeSet;

use crate::geo::BoundingBox;
use crate::hazards::HazardType;

/// How Overpass should report way/relation positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Full member geometry; the centroid is computed locally.
    Geometry,
    /// Server-computed centre point only.
    Center,
}

impl OutputMode {
    fn statement(self) -> &'static str {
        match self {
            OutputMode::Geometry => "out body geom;",
            OutputMode::Center => "out body center;",
        }
    }
}

// Each filter is emitted for both nodes and ways.
fn filters(hazard_type: HazardType) -> &'static [&'static str] {
    match hazard_type {
        HazardType::TrafficSignal => &[r#"["highway"="traffic_signals"]"#],
        HazardType::ZebraCrossing => &[
            r#"["crossing"="zebra"]"#,
            r#"["crossing_ref"="zebra"]"#,
            r#"["highway"="crossing"]["crossing"="zebra"]"#,
            r#"["highway"="crossing"]["crossing_ref"="zebra"]"#,
        ],
        HazardType::GiveWay => &[
            r#"["highway"="give_way"]"#,
            r#"["give_way"="yes"]"#,
            r#"["traffic_sign"~"give[_ ]?way", i]"#,
        ],
        HazardType::SpeedCamera => &[
            r#"["highway"="speed_camera"]"#,
            r#"["enforcement"="speed_camera"]"#,
            r#"["speed_camera"="yes"]"#,
            r#"["camera:speed"="yes"]"#,
        ],
        HazardType::Roundabout => &[r#"["junction"="roundabout"]"#],
        HazardType::MiniRoundabout => &[
            r#"["highway"="mini_roundabout"]"#,
            r#"["junction"="mini_roundabout"]"#,
            r#"["mini_roundabout"="yes"]"#,
        ],
        HazardType::SchoolZone => &[r#"["amenity"="school"]"#, r#"["landuse"="school"]"#],
        HazardType::BusLane => &[
            r#"["bus:lanes"]"#,
            r#"["lanes:bus"]"#,
            r#"["busway"]"#,
            r#"["busway:left"]"#,
            r#"["busway:right"]"#,
        ],
        HazardType::BusStop => &[
            r#"["highway"="bus_stop"]"#,
            r#"["public_transport"="stop_position"]["bus"="yes"]"#,
            r#"["public_transport"="platform"]["bus"="yes"]"#,
        ],
        HazardType::NoEntry => &[
            r#"["highway"]["access"="no"]"#,
            r#"["highway"]["vehicle"="no"]"#,
            r#"["highway"]["motor_vehicle"="no"]"#,
            r#"["oneway"="-1"]"#,
            r#"["traffic_sign"~"no[_ ]?entry", i]"#,
            r#"["traffic_sign:forward"~"no[_ ]?entry", i]"#,
            r#"["traffic_sign:backward"~"no[_ ]?entry", i]"#,
        ],
    }
}

fn clauses(hazard_type: HazardType, bbox: &str, out: &mut String) {
    for filter in filters(hazard_type) {
        for kind in ["node", "way"] {
            out.push_str(&format!("  {kind}{filter}({bbox});\n"));
        }
    }
    if hazard_type == HazardType::NoEntry {
        out.push_str(&format!(
            "  relation[\"type\"=\"restriction\"][\"restriction\"~\"^no_\", i]({bbox});\n"
        ));
    }
}

/// One unioned query covering every requested type inside `bbox`.
pub fn union_query(types: &BTreeSet<HazardType>, bbox: &BoundingBox, mode: OutputMode) -> String {
    let area = format!("{},{},{},{}", bbox.south, bbox.west, bbox.north, bbox.east);
    let mut body = String::new();
    for hazard_type in types {
        clauses(*hazard_type, &area, &mut body);
    }
    format!("[out:json][timeout:25];\n(\n{body});\n{}", mode.statement())
}
