use crate::geo::{GeoPoint, min_distance_to_polyline_m};
use crate::hazards::HazardFeature;

pub const MIN_CORRIDOR_M: f64 = 100.0;
pub const MAX_CORRIDOR_M: f64 = 300.0;

/// Keeps features within the route corridor. The radius is clamped to
/// [`MIN_CORRIDOR_M`, `MAX_CORRIDOR_M`]; routes with fewer than two points
/// leave the input untouched.
pub fn filter_to_corridor(
    features: Vec<HazardFeature>,
    route: &[GeoPoint],
    radius_m: f64,
) -> Vec<HazardFeature> {
    if features.is_empty() || route.len() < 2 {
        return features;
    }
    let radius = radius_m.clamp(MIN_CORRIDOR_M, MAX_CORRIDOR_M);
    features
        .into_iter()
        .filter(|f| min_distance_to_polyline_m(f.point(), route) <= radius)
        .collect()
}
