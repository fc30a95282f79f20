use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::SyncResult;
use crate::geo::{GeoPoint, route_signature, sanitize_id};
use crate::hazards::{HazardFeature, HazardType};

pub const CAMERA_CACHE_TTL: Duration = Duration::hours(24);

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CameraCacheFile {
    cached_at_ms: i64,
    centre_id: String,
    route_signature: String,
    cameras: Vec<HazardFeature>,
}

/// Rolling per-route cache of speed cameras, one file per
/// (centre, route signature).
pub struct CameraCache {
    dir: PathBuf,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl CameraCache {
    pub fn new(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            dir: dir.into(),
            ttl: CAMERA_CACHE_TTL,
            clock,
        }
    }

    fn centre_part(centre_id: Option<&str>) -> String {
        centre_id
            .map(sanitize_id)
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| "default".to_string())
    }

    fn path(&self, centre_id: Option<&str>, route: &[GeoPoint]) -> PathBuf {
        let digest = Sha256::digest(route_signature(route).as_bytes());
        let hex: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
        self.dir
            .join(format!("{}_{hex}.json", Self::centre_part(centre_id)))
    }

    /// Cached cameras for this route, or empty when missing or expired.
    /// Unreadable and expired files are deleted.
    pub fn read(&self, centre_id: Option<&str>, route: &[GeoPoint]) -> Vec<HazardFeature> {
        let path = self.path(centre_id, route);
        let Ok(text) = fs::read_to_string(&path) else {
            return Vec::new();
        };
        let now = self.clock.now_ms();
        let entry = serde_json::from_str::<CameraCacheFile>(&text)
            .ok()
            .filter(|c| c.cached_at_ms > 0 && now - c.cached_at_ms <= self.ttl.num_milliseconds());
        match entry {
            Some(entry) => entry
                .cameras
                .into_iter()
                .filter(|f| f.hazard_type == HazardType::SpeedCamera)
                .collect(),
            None => {
                debug!(path = %path.display(), "Dropping expired camera cache");
                let _ = fs::remove_file(&path);
                Vec::new()
            }
        }
    }

    /// Replaces the cache for this route with the speed cameras in
    /// `features`. Does nothing when there are none.
    pub fn write(
        &self,
        centre_id: Option<&str>,
        route: &[GeoPoint],
        features: &[HazardFeature],
    ) -> SyncResult<()> {
        let mut seen = std::collections::HashSet::new();
        let cameras: Vec<HazardFeature> = features
            .iter()
            .filter(|f| f.hazard_type == HazardType::SpeedCamera && f.point().is_finite())
            .filter(|f| seen.insert(format!("{}:{:.5}:{:.5}", f.id, f.lat, f.lon)))
            .cloned()
            .collect();
        if cameras.is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.dir)?;
        let entry = CameraCacheFile {
            cached_at_ms: self.clock.now_ms(),
            centre_id: Self::centre_part(centre_id),
            route_signature: route_signature(route),
            cameras,
        };
        fs::write(self.path(centre_id, route), serde_json::to_vec(&entry)?)?;
        Ok(())
    }

    /// [`CameraCache::write`] that logs instead of failing.
    pub fn store(&self, centre_id: Option<&str>, route: &[GeoPoint], features: &[HazardFeature]) {
        if let Err(e) = self.write(centre_id, route, features) {
            warn!(error = %e, "Failed to write camera cache");
        }
    }
}
