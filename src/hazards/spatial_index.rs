use std::collections::HashMap;
use std::f64::consts::FRAC_PI_4;
use std::sync::Arc;

use parking_lot::RwLock;

use super::HazardFeature;

const WEB_MERCATOR_RADIUS_M: f64 = 6_378_137.0;
const MAX_MERCATOR_LAT: f64 = 85.051_128_78;
pub const DEFAULT_BUCKET_SIZE_M: f64 = 200.0;

type Buckets = HashMap<(i64, i64), Vec<HazardFeature>>;

/// Grid of square Web-Mercator cells for coarse proximity lookups.
///
/// `rebuild` assembles a fresh grid and swaps it in under the write lock, so a
/// concurrent `query_nearby` sees either the old set or the new one in full.
#[derive(Debug)]
pub struct SpatialIndex {
    bucket_size_m: f64,
    buckets: RwLock<Arc<Buckets>>,
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new(DEFAULT_BUCKET_SIZE_M)
    }
}

impl SpatialIndex {
    pub fn new(bucket_size_m: f64) -> Self {
        Self {
            bucket_size_m,
            buckets: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    pub fn rebuild(&self, features: &[HazardFeature]) {
        let mut next: Buckets = HashMap::new();
        for feature in features {
            next.entry(self.cell(feature.lat, feature.lon))
                .or_default()
                .push(feature.clone());
        }
        *self.buckets.write() = Arc::new(next);
    }

    /// Everything in the cells within `radius_m` of the point. No exact
    /// distance check happens here.
    pub fn query_nearby(&self, lat: f64, lon: f64, radius_m: f64) -> Vec<HazardFeature> {
        let snapshot = Arc::clone(&self.buckets.read());
        if snapshot.is_empty() {
            return Vec::new();
        }
        let (cx, cy) = self.cell(lat, lon);
        let r = ((radius_m / self.bucket_size_m).ceil() as i64).max(1);

        let mut out = Vec::new();
        for x in (cx - r)..=(cx + r) {
            for y in (cy - r)..=(cy + r) {
                if let Some(bucket) = snapshot.get(&(x, y)) {
                    out.extend(bucket.iter().cloned());
                }
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.buckets.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.read().is_empty()
    }

    fn cell(&self, lat: f64, lon: f64) -> (i64, i64) {
        let x = WEB_MERCATOR_RADIUS_M * lon.to_radians();
        let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
        let y = WEB_MERCATOR_RADIUS_M * (FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
        (
            (x / self.bucket_size_m).floor() as i64,
            (y / self.bucket_size_m).floor() as i64,
        )
    }
}
