use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::clock::Clock;
use crate::error::SyncResult;
use crate::geo::BoundingBox;
use crate::hazards::{HazardFeature, HazardType};

pub const FEATURE_CACHE_TTL: Duration = Duration::days(7);

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedFeatures {
    created_at_epoch_ms: i64,
    features: Vec<HazardFeature>,
}

/// Classified fallback-service results keyed by (bbox, types).
pub struct OsmFeatureCache {
    dir: PathBuf,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl OsmFeatureCache {
    pub fn new(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            dir: dir.into(),
            ttl: FEATURE_CACHE_TTL,
            clock,
        }
    }

    pub fn key(bbox: &BoundingBox, types: &BTreeSet<HazardType>) -> String {
        let mut names: Vec<&str> = types.iter().map(HazardType::as_str).collect();
        names.sort_unstable();
        format!("bbox={};types={}", bbox.cache_fragment(), names.join(","))
    }

    fn path(&self, key: &str) -> PathBuf {
        let hex: String = Sha256::digest(key.as_bytes())
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        self.dir.join(format!("{hex}.json"))
    }

    /// Cached features, or `None` when missing, unreadable or expired.
    /// Expired and unreadable files are deleted.
    pub fn get(&self, key: &str) -> Option<Vec<HazardFeature>> {
        let path = self.path(key);
        let text = fs::read_to_string(&path).ok()?;
        let fresh = serde_json::from_str::<CachedFeatures>(&text)
            .ok()
            .filter(|c| self.clock.now_ms() - c.created_at_epoch_ms <= self.ttl.num_milliseconds());
        if fresh.is_none() {
            debug!(key, "Dropping expired feature cache entry");
            let _ = fs::remove_file(&path);
        }
        fresh.map(|c| c.features)
    }

    pub fn put(&self, key: &str, features: &[HazardFeature]) -> SyncResult<()> {
        fs::create_dir_all(&self.dir)?;
        let entry = CachedFeatures {
            created_at_epoch_ms: self.clock.now_ms(),
            features: features.to_vec(),
        };
        fs::write(self.path(key), serde_json::to_vec(&entry)?)?;
        Ok(())
    }
}
