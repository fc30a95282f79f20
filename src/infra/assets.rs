use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::geo::sanitize_id;
use crate::hazards::HazardFeature;
use crate::pack::{HazardsPack, parse_hazards_pack, validate_hazards_pack};

/// Read-only hazards packs shipped alongside the binary.
///
/// A centre's pack is looked up at `hazards/<id>/hazards.json`, then
/// `hazards/<id>.json`. Unparsable or invalid files count as a miss and are
/// left in place.
#[derive(Debug, Clone)]
pub struct AssetBundle {
    root: PathBuf,
}

impl AssetBundle {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn candidate_paths(&self, centre_id: &str) -> [PathBuf; 2] {
        let id = sanitize_id(centre_id);
        let dir = self.root.join("hazards");
        [dir.join(&id).join("hazards.json"), dir.join(format!("{id}.json"))]
    }

    pub fn hazards_pack(&self, centre_id: &str) -> Option<HazardsPack> {
        for path in self.candidate_paths(centre_id) {
            let Ok(text) = fs::read_to_string(&path) else {
                continue;
            };
            let pack = match parse_hazards_pack(&text) {
                Ok(pack) => pack,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unparsable bundled pack");
                    continue;
                }
            };
            let problems = validate_hazards_pack(&pack);
            if !problems.is_empty() {
                warn!(path = %path.display(), problems = problems.len(), "Skipping invalid bundled pack");
                continue;
            }
            debug!(path = %path.display(), hazards = pack.hazards.len(), "Bundled pack loaded");
            return Some(pack);
        }
        None
    }

    pub fn hazards(&self, centre_id: &str) -> Vec<HazardFeature> {
        self.hazards_pack(centre_id)
            .map(|pack| pack.hazards)
            .unwrap_or_default()
    }
}
