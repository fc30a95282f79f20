//! Geometry helpers for route-relative hazard distances.
//!
//! Route math uses a local equirectangular projection around the query point,
//! which is accurate enough at the few-kilometre scale of a practice route.

mod bbox;

pub use bbox::BoundingBox;

use serde::{Deserialize, Serialize};

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite()
    }
}

/// Great-circle distance in meters.
pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let d_lat = lat2 - lat1;
    let d_lon = (b.lon - a.lon).to_radians();
    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.clamp(0.0, 1.0).sqrt().asin()
}

struct LocalPlane {
    cos_ref: f64,
}

impl LocalPlane {
    fn around(reference: GeoPoint) -> Self {
        Self {
            cos_ref: reference.lat.to_radians().cos(),
        }
    }

    fn xy(&self, p: GeoPoint) -> (f64, f64) {
        (
            p.lon.to_radians() * EARTH_RADIUS_M * self.cos_ref,
            p.lat.to_radians() * EARTH_RADIUS_M,
        )
    }
}

/// Minimum distance from `point` to any segment of `polyline`, in meters.
///
/// A single-point polyline falls back to haversine; an empty one is infinitely
/// far away.
pub fn min_distance_to_polyline_m(point: GeoPoint, polyline: &[GeoPoint]) -> f64 {
    match polyline {
        [] => f64::INFINITY,
        [only] => haversine_m(point, *only),
        _ => {
            let plane = LocalPlane::around(point);
            let (px, py) = plane.xy(point);
            polyline
                .windows(2)
                .map(|seg| {
                    let (ax, ay) = plane.xy(seg[0]);
                    let (bx, by) = plane.xy(seg[1]);
                    let (cx, cy, _) = closest_on_segment(px, py, ax, ay, bx, by);
                    (px - cx).hypot(py - cy)
                })
                .fold(f64::INFINITY, f64::min)
        }
    }
}

fn closest_on_segment(px: f64, py: f64, ax: f64, ay: f64, bx: f64, by: f64) -> (f64, f64, f64) {
    let dx = bx - ax;
    let dy = by - ay;
    let len_sq = dx * dx + dy * dy;
    if len_sq <= 0.0 {
        return (ax, ay, 0.0);
    }
    let t = (((px - ax) * dx + (py - ay) * dy) / len_sq).clamp(0.0, 1.0);
    (ax + dx * t, ay + dy * t, t)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteProjection {
    pub segment_index: usize,
    pub segment_progress: f64,
    pub distance_along_m: f64,
    pub lateral_distance_m: f64,
}

/// Projects `target` onto the nearest segment of `route`.
///
/// Returns `None` when the route has fewer than two points or only
/// degenerate segments.
pub fn project_onto_route(route: &[GeoPoint], target: GeoPoint) -> Option<RouteProjection> {
    if route.len() < 2 {
        return None;
    }
    let plane = LocalPlane::around(target);
    let (tx, ty) = plane.xy(target);

    let mut cumulative = 0.0;
    let mut best: Option<RouteProjection> = None;
    let mut best_dist_sq = f64::MAX;

    for (index, seg) in route.windows(2).enumerate() {
        let (ax, ay) = plane.xy(seg[0]);
        let (bx, by) = plane.xy(seg[1]);
        let seg_len = (bx - ax).hypot(by - ay);
        if seg_len * seg_len <= 1e-6 {
            continue;
        }
        let (cx, cy, t) = closest_on_segment(tx, ty, ax, ay, bx, by);
        let dist_sq = (tx - cx).powi(2) + (ty - cy).powi(2);
        if dist_sq < best_dist_sq {
            best_dist_sq = dist_sq;
            best = Some(RouteProjection {
                segment_index: index,
                segment_progress: t,
                distance_along_m: cumulative + seg_len * t,
                lateral_distance_m: dist_sq.sqrt(),
            });
        }
        cumulative += seg_len;
    }
    best
}

/// Signed along-route distance from `user` to `feature`; negative once the
/// feature is behind.
pub fn along_distance_ahead_m(route: &[GeoPoint], user: GeoPoint, feature: GeoPoint) -> Option<f64> {
    let user_proj = project_onto_route(route, user)?;
    let feature_proj = project_onto_route(route, feature)?;
    Some(feature_proj.distance_along_m - user_proj.distance_along_m)
}

/// Fingerprint of a route: point count, first, middle and last coordinates.
pub fn route_signature(route: &[GeoPoint]) -> String {
    let (Some(first), Some(last)) = (route.first(), route.last()) else {
        return "empty".to_string();
    };
    let mid = route[route.len() / 2];
    format!(
        "{}|{:.5},{:.5}|{:.5},{:.5}|{:.5},{:.5}",
        route.len(),
        first.lat,
        first.lon,
        mid.lat,
        mid.lon,
        last.lat,
        last.lon
    )
}

/// Lowercases and replaces anything outside `[a-z0-9._-]` with `_`.
pub fn sanitize_id(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
