use std::fmt;

use chrono::Duration;

use crate::geo::{GeoPoint, haversine_m};

pub const MOVEMENT_REFRESH_M: f64 = 5_000.0;
pub const REFRESH_INTERVAL: Duration = Duration::minutes(10);

/// Where and for what the last fetch was made.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchAnchor {
    pub centre_id: Option<String>,
    pub route_signature: String,
    pub point: Option<GeoPoint>,
    pub at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchReason {
    SessionStart,
    CentreChanged,
    RouteChanged,
    Moved,
    Periodic,
}

impl FetchReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchReason::SessionStart => "session_start",
            FetchReason::CentreChanged => "centre_changed",
            FetchReason::RouteChanged => "route_changed",
            FetchReason::Moved => "moved",
            FetchReason::Periodic => "periodic",
        }
    }
}

impl fmt::Display for FetchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn normalize_centre(centre_id: Option<&str>) -> Option<String> {
    centre_id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Why a fetch is due now, or `None` when the current feature set still
/// covers the session.
pub fn fetch_reason(
    anchor: Option<&FetchAnchor>,
    centre_id: Option<&str>,
    route_signature: &str,
    location: Option<GeoPoint>,
    now_ms: i64,
) -> Option<FetchReason> {
    let Some(anchor) = anchor else {
        return Some(FetchReason::SessionStart);
    };
    if anchor.centre_id != normalize_centre(centre_id) {
        return Some(FetchReason::CentreChanged);
    }
    if anchor.route_signature != route_signature {
        return Some(FetchReason::RouteChanged);
    }
    if let (Some(from), Some(to)) = (anchor.point, location) {
        if haversine_m(from, to) > MOVEMENT_REFRESH_M {
            return Some(FetchReason::Moved);
        }
    }
    if now_ms - anchor.at_ms >= REFRESH_INTERVAL.num_milliseconds() {
        return Some(FetchReason::Periodic);
    }
    None
}
