//! Output formatting and persistence for build summaries.
//!
//! Supports pretty-printing, JSON serialization, and CSV append.

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info};

use crate::stats::HazardStats;
use csv::WriterBuilder;
use std::fs::OpenOptions;
use std::path::Path;

/// Logs a value using Rust's debug pretty-print format.
pub fn print_pretty(value: &impl std::fmt::Debug) {
    debug!("{:#?}", value);
}

/// Logs a value as pretty-printed JSON.
pub fn print_json(value: &impl Serialize) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Appends a [`HazardStats`] record as a row to a CSV file.
///
/// Creates the file (and its directory) with headers if it does not already
/// exist.
pub fn append_record(path: impl AsRef<Path>, stats: &HazardStats) -> Result<()> {
    let path = path.as_ref();
    let file_exists = path.exists();
    debug!(path = %path.display(), file_exists, "Appending CSV record");

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists)
        .from_writer(file);

    writer.serialize(stats)?;
    writer.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hazards::{HazardFeature, HazardType, Tags};
    use std::fs;
    use tempfile::TempDir;

    fn stats() -> HazardStats {
        HazardStats::from_hazards(&[HazardFeature {
            id: "node/1".into(),
            hazard_type: HazardType::SpeedCamera,
            lat: 51.5,
            lon: -0.1,
            tags: Tags::new(),
            source: "overpass".into(),
            confidence_hint: 0.9,
        }])
        .with_centre_info("centreA", "hazards-1700000000000")
    }

    #[test]
    fn test_print_pretty_does_not_panic() {
        print_pretty(&HazardStats::default());
    }

    #[test]
    fn test_print_json_does_not_panic() {
        print_json(&stats()).unwrap();
    }

    #[test]
    fn test_append_record_creates_file_and_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats").join("builds.csv");

        append_record(&path, &stats()).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("speed_cameras"));
        assert!(content.contains("centreA"));
    }

    #[test]
    fn test_append_record_writes_header_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("builds.csv");

        append_record(&path, &stats()).unwrap();
        append_record(&path, &HazardStats::from_error("network", "timeout")).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines.iter().filter(|l| l.contains("timestamp")).count(), 1);
        assert!(lines[2].contains("timeout"));
    }
}
