use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::PackType;
use crate::error::SyncResult;

/// One published (or rolled back) pack version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryRecord {
    pub centre_id: String,
    pub pack_type: PackType,
    pub version: String,
    /// Inline pack JSON.
    pub url_or_inline: String,
    pub generated_at: String,
}

/// Append-only CSV log of every registered pack version.
#[derive(Debug, Clone)]
pub struct PackRegistry {
    path: PathBuf,
}

impl PackRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends a row, writing the header only when the file is new.
    pub fn register(&self, record: &RegistryRecord) -> SyncResult<()> {
        let file_exists = self.path.exists();
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        debug!(
            path = %self.path.display(),
            centre_id = %record.centre_id,
            pack_type = %record.pack_type,
            version = %record.version,
            "Registering pack version"
        );

        let file = OpenOptions::new().append(true).create(true).open(&self.path)?;
        let mut writer = WriterBuilder::new()
            .has_headers(!file_exists)
            .from_writer(file);
        writer.serialize(record)?;
        writer.flush()?;
        Ok(())
    }

    /// Every record in registration order. A missing registry is empty.
    pub fn records(&self) -> SyncResult<Vec<RegistryRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = ReaderBuilder::new().from_path(&self.path)?;
        let mut out = Vec::new();
        for row in reader.deserialize() {
            out.push(row?);
        }
        Ok(out)
    }

    /// Records for one centre and pack type, newest registration last.
    pub fn history(&self, centre_id: &str, pack_type: PackType) -> SyncResult<Vec<RegistryRecord>> {
        Ok(self
            .records()?
            .into_iter()
            .filter(|r| r.centre_id == centre_id && r.pack_type == pack_type)
            .collect())
    }

    pub fn latest(&self, centre_id: &str, pack_type: PackType) -> SyncResult<Option<RegistryRecord>> {
        Ok(self.history(centre_id, pack_type)?.pop())
    }
}
