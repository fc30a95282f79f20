//! Offline pack building: query the public map-data service around a centre,
//! classify, version, register and prune.

pub mod upstream;
mod worker;

pub use upstream::{FetchOutcome, RetryPolicy, RetryStep, UpstreamFetcher};
pub use worker::{BuildReport, Collected, IngestionWorker};

use std::path::{Path, PathBuf};

use crate::geo::sanitize_id;
use crate::pack::PackType;

/// Half-width in degrees of the box queried around a centre for hazards.
pub const HAZARDS_BBOX_DELTA: f64 = 0.05;
pub const ROUTES_BBOX_DELTA: f64 = 0.08;
/// Versions kept per (pack type, centre) after a build.
pub const KEEP_VERSIONS: usize = 3;

/// Where the worker reads and writes under its data directory.
///
/// ```text
/// <root>/centres.json
/// <root>/hazards/<centre>.json          current hazards pack
/// <root>/routes/<centre>.json           current routes pack
/// <root>/versions/<type>/<centre>/<version>.json
/// <root>/cache/overpass/<sha256>.json   raw upstream cache
/// <root>/registry.csv
/// ```
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn centres_file(&self) -> PathBuf {
        self.root.join("centres.json")
    }

    pub fn current_pack(&self, pack_type: PackType, centre_id: &str) -> PathBuf {
        self.root
            .join(pack_type.as_str())
            .join(format!("{}.json", sanitize_id(centre_id)))
    }

    pub fn versions_dir(&self, pack_type: PackType, centre_id: &str) -> PathBuf {
        self.root
            .join("versions")
            .join(pack_type.as_str())
            .join(sanitize_id(centre_id))
    }

    pub fn version_file(&self, pack_type: PackType, centre_id: &str, version: &str) -> PathBuf {
        self.versions_dir(pack_type, centre_id)
            .join(format!("{}.json", sanitize_id(version)))
    }

    pub fn raw_cache_dir(&self) -> PathBuf {
        self.root.join("cache").join("overpass")
    }

    pub fn registry_file(&self) -> PathBuf {
        self.root.join("registry.csv")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths_are_sanitized() {
        let layout = DataLayout::new("/data");
        assert_eq!(
            layout.current_pack(PackType::Hazards, "Colchester/../x"),
            PathBuf::from("/data/hazards/colchester_.._x.json")
        );
        assert_eq!(
            layout.version_file(PackType::Routes, "c1", "routes-5"),
            PathBuf::from("/data/versions/routes/c1/routes-5.json")
        );
    }
}
