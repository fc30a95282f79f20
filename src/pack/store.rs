use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{PackMetadata, PackType};
use crate::clock::Clock;
use crate::error::SyncResult;
use crate::geo::sanitize_id;

pub const PACK_TTL: Duration = Duration::days(30);

/// On-disk wrapper around a cached pack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEnvelope {
    #[serde(default)]
    pub centre_id: String,
    pub created_at_epoch_ms: i64,
    pub metadata: PackMetadata,
    pub pack_json: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default)]
    pub offline_available: bool,
}

/// File-backed pack cache keyed by (pack type, centre id).
///
/// One file per version lives under `<root>/<type>/<id>/<version>.json`.
/// Expired or unreadable files are removed when a read stumbles over them.
/// Envelopes written for a different centre id that sanitises to the same
/// directory are skipped.
pub struct PackStore {
    root: PathBuf,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl PackStore {
    pub fn new(root: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            root: root.into(),
            ttl: PACK_TTL,
            clock,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn type_dir(&self, pack_type: PackType) -> PathBuf {
        self.root.join(pack_type.as_str())
    }

    fn key_dir(&self, pack_type: PackType, centre_id: &str) -> PathBuf {
        let key = sanitize_id(centre_id);
        let key = if key.is_empty() { "default".to_string() } else { key };
        self.type_dir(pack_type).join(key)
    }

    fn candidates(&self, pack_type: PackType, centre_id: &str) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(self.key_dir(pack_type, centre_id)) else {
            return Vec::new();
        };
        entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
            .collect()
    }

    /// Valid envelopes for exactly this key, paired with their paths.
    fn envelopes(&self, pack_type: PackType, centre_id: &str) -> Vec<(PathBuf, CacheEnvelope)> {
        self.candidates(pack_type, centre_id)
            .into_iter()
            .filter_map(|path| self.load_valid(&path).map(|env| (path, env)))
            .filter(|(_, env)| env.centre_id == centre_id)
            .collect()
    }

    fn load_valid(&self, path: &Path) -> Option<CacheEnvelope> {
        let parsed = fs::read_to_string(path)
            .ok()
            .and_then(|text| serde_json::from_str::<CacheEnvelope>(&text).ok());
        let now_ms = self.clock.now_ms();
        let keep = parsed.filter(|env| {
            env.created_at_epoch_ms > 0
                && now_ms - env.created_at_epoch_ms <= self.ttl.num_milliseconds()
                && !env.pack_json.trim().is_empty()
        });
        if keep.is_none() {
            debug!(path = %path.display(), "Removing expired or unreadable pack envelope");
            if let Err(e) = fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "Failed to remove pack envelope");
            }
        }
        keep
    }

    /// Newest valid envelope for the key, pruning dead ones on the way.
    pub fn read_envelope(&self, pack_type: PackType, centre_id: &str) -> Option<CacheEnvelope> {
        self.envelopes(pack_type, centre_id)
            .into_iter()
            .map(|(_, env)| env)
            .max_by_key(|env| env.created_at_epoch_ms)
    }

    pub fn read(&self, pack_type: PackType, centre_id: &str) -> Option<String> {
        self.read_envelope(pack_type, centre_id).map(|e| e.pack_json)
    }

    pub fn read_etag(&self, pack_type: PackType, centre_id: &str) -> Option<String> {
        self.read_envelope(pack_type, centre_id)
            .and_then(|e| e.etag)
            .filter(|t| !t.trim().is_empty())
    }

    pub fn read_version(&self, pack_type: PackType, centre_id: &str) -> Option<String> {
        self.read_envelope(pack_type, centre_id)
            .map(|e| e.metadata.version)
            .filter(|v| !v.trim().is_empty())
    }

    /// Stores a new envelope. The offline pin carries over from the current
    /// envelope unless `offline_available` overrides it.
    pub fn write(
        &self,
        pack_type: PackType,
        centre_id: &str,
        pack_json: &str,
        metadata: &PackMetadata,
        etag: Option<&str>,
        offline_available: Option<bool>,
    ) -> SyncResult<()> {
        let dir = self.key_dir(pack_type, centre_id);
        fs::create_dir_all(&dir)?;
        let offline_available =
            offline_available.unwrap_or_else(|| self.is_offline_available(pack_type, centre_id));

        let envelope = CacheEnvelope {
            centre_id: centre_id.to_string(),
            created_at_epoch_ms: self.clock.now_ms(),
            metadata: metadata.clone(),
            pack_json: pack_json.to_string(),
            etag: etag.map(str::trim).filter(|t| !t.is_empty()).map(str::to_string),
            offline_available,
        };
        let path = dir.join(format!("{}.json", sanitize_id(&metadata.version)));
        write_atomically(&path, &serde_json::to_vec(&envelope)?)?;
        debug!(
            pack_type = %pack_type,
            centre_id,
            version = %metadata.version,
            offline_available,
            "Pack cached"
        );
        Ok(())
    }

    /// Flips the offline pin on the newest envelope for the key. No-op when
    /// nothing is cached.
    pub fn mark_offline_available(
        &self,
        pack_type: PackType,
        centre_id: &str,
        offline_available: bool,
    ) -> SyncResult<()> {
        let newest = self
            .envelopes(pack_type, centre_id)
            .into_iter()
            .max_by_key(|(_, env)| env.created_at_epoch_ms);
        let Some((path, mut envelope)) = newest else {
            return Ok(());
        };
        envelope.offline_available = offline_available;
        write_atomically(&path, &serde_json::to_vec(&envelope)?)?;
        Ok(())
    }

    pub fn is_offline_available(&self, pack_type: PackType, centre_id: &str) -> bool {
        self.read_envelope(pack_type, centre_id)
            .is_some_and(|e| e.offline_available)
    }

    /// Age is measured from the pack's `generatedAt` when it parses, else from
    /// when the envelope was written. A missing pack is never "older".
    pub fn is_older_than_days(&self, pack_type: PackType, centre_id: &str, days: i64) -> bool {
        let Some(envelope) = self.read_envelope(pack_type, centre_id) else {
            return false;
        };
        let source_ms = DateTime::parse_from_rfc3339(&envelope.metadata.generated_at)
            .map(|t| t.timestamp_millis())
            .unwrap_or(envelope.created_at_epoch_ms);
        let age_ms = (self.clock.now_ms() - source_ms).max(0);
        age_ms > Duration::days(days).num_milliseconds()
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::geo::BoundingBox;
    use tempfile::TempDir;

    fn metadata(version: &str, generated_at: &str) -> PackMetadata {
        PackMetadata {
            version: version.into(),
            generated_at: generated_at.into(),
            bbox: BoundingBox {
                south: 51.0,
                west: 0.0,
                north: 51.1,
                east: 0.1,
            },
        }
    }

    fn store() -> (TempDir, Arc<ManualClock>, PackStore) {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::at_ms(1_700_000_000_000));
        let store = PackStore::new(dir.path(), clock.clone());
        (dir, clock, store)
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let (_dir, _clock, store) = store();
        let meta = metadata("hazards-1", "2024-05-01T10:00:00Z");
        store
            .write(PackType::Hazards, "centreA", "{\"x\":1}", &meta, Some("v1"), None)
            .unwrap();
        assert_eq!(store.read(PackType::Hazards, "centreA").as_deref(), Some("{\"x\":1}"));
        assert_eq!(store.read_etag(PackType::Hazards, "centreA").as_deref(), Some("v1"));
        assert_eq!(
            store.read_version(PackType::Hazards, "centreA").as_deref(),
            Some("hazards-1")
        );
    }

    #[test]
    fn test_read_within_ttl_and_expiry_removes_file() {
        let (dir, clock, store) = store();
        let meta = metadata("hazards-1", "2024-05-01T10:00:00Z");
        store
            .write(PackType::Hazards, "centreA", "{}", &meta, Some("v1"), None)
            .unwrap();

        clock.advance(Duration::days(29));
        assert_eq!(store.read_etag(PackType::Hazards, "centreA").as_deref(), Some("v1"));

        clock.advance(Duration::days(2));
        assert!(store.read(PackType::Hazards, "centreA").is_none());
        let remaining = fs::read_dir(dir.path().join("hazards").join("centrea"))
            .unwrap()
            .count();
        assert_eq!(remaining, 0);
        assert!(store.read(PackType::Hazards, "centreA").is_none());
    }

    #[test]
    fn test_unparsable_envelope_is_deleted() {
        let (dir, _clock, store) = store();
        let hazards_dir = dir.path().join("hazards").join("centrea");
        fs::create_dir_all(&hazards_dir).unwrap();
        let junk = hazards_dir.join("hazards-0.json");
        fs::write(&junk, "{not json").unwrap();
        assert!(store.read(PackType::Hazards, "centreA").is_none());
        assert!(!junk.exists());
    }

    #[test]
    fn test_newest_envelope_wins() {
        let (_dir, clock, store) = store();
        store
            .write(PackType::Hazards, "c", "old", &metadata("hazards-1", ""), None, None)
            .unwrap();
        clock.advance(Duration::minutes(1));
        store
            .write(PackType::Hazards, "c", "new", &metadata("hazards-2", ""), None, None)
            .unwrap();
        assert_eq!(store.read(PackType::Hazards, "c").as_deref(), Some("new"));
    }

    #[test]
    fn test_offline_pin_survives_new_write() {
        let (_dir, clock, store) = store();
        store
            .write(PackType::Hazards, "c", "a", &metadata("hazards-1", ""), None, None)
            .unwrap();
        assert!(!store.is_offline_available(PackType::Hazards, "c"));
        store.mark_offline_available(PackType::Hazards, "c", true).unwrap();
        assert!(store.is_offline_available(PackType::Hazards, "c"));

        clock.advance(Duration::minutes(1));
        store
            .write(PackType::Hazards, "c", "b", &metadata("hazards-2", ""), None, None)
            .unwrap();
        assert!(store.is_offline_available(PackType::Hazards, "c"));

        clock.advance(Duration::minutes(1));
        store
            .write(PackType::Hazards, "c", "c", &metadata("hazards-3", ""), None, Some(false))
            .unwrap();
        assert!(!store.is_offline_available(PackType::Hazards, "c"));
    }

    #[test]
    fn test_is_older_than_days_prefers_generated_at() {
        let (_dir, clock, store) = store();
        clock.set(DateTime::parse_from_rfc3339("2024-05-20T10:00:00Z").unwrap().to_utc());
        store
            .write(
                PackType::Hazards,
                "c",
                "{}",
                &metadata("hazards-1", "2024-05-01T10:00:00Z"),
                None,
                None,
            )
            .unwrap();
        assert!(store.is_older_than_days(PackType::Hazards, "c", 14));
        assert!(!store.is_older_than_days(PackType::Hazards, "c", 30));

        store
            .write(PackType::Routes, "c", "{}", &metadata("routes-1", "garbage"), None, None)
            .unwrap();
        assert!(!store.is_older_than_days(PackType::Routes, "c", 1));
        assert!(!store.is_older_than_days(PackType::Centres, "c", 1));
    }

    #[test]
    fn test_centre_ids_sharing_a_prefix_stay_separate() {
        let (_dir, _clock, store) = store();
        store
            .write(
                PackType::Hazards,
                "colchester_north",
                "NORTH",
                &metadata("hazards-1", ""),
                Some("n1"),
                None,
            )
            .unwrap();
        assert!(store.read(PackType::Hazards, "colchester").is_none());
        assert!(store.read_etag(PackType::Hazards, "colchester").is_none());

        store
            .write(PackType::Hazards, "colchester", "MAIN", &metadata("hazards-2", ""), None, None)
            .unwrap();
        store
            .mark_offline_available(PackType::Hazards, "colchester", true)
            .unwrap();
        assert!(store.is_offline_available(PackType::Hazards, "colchester"));
        assert!(!store.is_offline_available(PackType::Hazards, "colchester_north"));
        assert_eq!(
            store.read(PackType::Hazards, "colchester_north").as_deref(),
            Some("NORTH")
        );
    }

    #[test]
    fn test_ids_that_sanitise_alike_do_not_share_envelopes() {
        let (_dir, _clock, store) = store();
        store
            .write(PackType::Hazards, "Centre A", "spaced", &metadata("hazards-1", ""), None, None)
            .unwrap();
        assert!(store.read(PackType::Hazards, "centre_a").is_none());
        assert_eq!(store.read(PackType::Hazards, "Centre A").as_deref(), Some("spaced"));
    }
}
