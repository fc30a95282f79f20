use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::SecondsFormat;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use super::upstream::{FetchOutcome, UpstreamFetcher};
use super::{DataLayout, HAZARDS_BBOX_DELTA, KEEP_VERSIONS, ROUTES_BBOX_DELTA};
use crate::clock::Clock;
use crate::error::{SyncError, SyncResult};
use crate::fetch::HttpClient;
use crate::geo::BoundingBox;
use crate::hazards::classify::Classifier;
use crate::hazards::{HazardFeature, HazardType};
use crate::overpass::{OutputMode, union_query};
use crate::pack::{
    Centre, HazardsPack, PackMetadata, PackRegistry, PackType, RegistryRecord, parse_centres_pack,
    parse_routes_pack, validate_routes_pack,
};
use crate::stats::HazardStats;

/// Hazards gathered for one bbox, plus how healthy the upstream was.
#[derive(Debug, Clone, Default)]
pub struct Collected {
    pub hazards: Vec<HazardFeature>,
    pub stale_queries: usize,
    pub empty_queries: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub centre_id: String,
    pub pack_type: PackType,
    pub version: String,
    pub path: PathBuf,
    pub items: usize,
    #[serde(skip)]
    pub stats: Option<HazardStats>,
}

/// Sequential, one-centre-at-a-time pack builder.
pub struct IngestionWorker<C> {
    layout: DataLayout,
    fetcher: UpstreamFetcher<C>,
    classifier: Classifier,
    registry: PackRegistry,
    clock: Arc<dyn Clock>,
}

impl<C: HttpClient> IngestionWorker<C> {
    pub fn new(
        layout: DataLayout,
        fetcher: UpstreamFetcher<C>,
        classifier: Classifier,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let registry = PackRegistry::new(layout.registry_file());
        Self {
            layout,
            fetcher,
            classifier,
            registry,
            clock,
        }
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    pub fn registry(&self) -> &PackRegistry {
        &self.registry
    }

    pub fn find_centre(&self, centre_id: &str) -> SyncResult<Centre> {
        let path = self.layout.centres_file();
        let text = fs::read_to_string(&path)
            .map_err(|e| SyncError::MissingData(format!("{}: {e}", path.display())))?;
        parse_centres_pack(&text)?
            .centres
            .into_iter()
            .find(|c| c.id == centre_id)
            .ok_or_else(|| SyncError::UnknownCentre(centre_id.to_string()))
    }

    /// Queries each type separately inside `bbox`. The bbox is validated
    /// before any request goes out; upstream trouble only thins the result.
    #[instrument(skip(self, types), fields(types = types.len()))]
    pub async fn collect_hazards(
        &self,
        scope: &str,
        bbox: &BoundingBox,
        types: &BTreeSet<HazardType>,
    ) -> SyncResult<Collected> {
        bbox.validate()?;

        let mut elements = Vec::new();
        let mut collected = Collected::default();
        for hazard_type in types {
            let query = union_query(&BTreeSet::from([*hazard_type]), bbox, OutputMode::Geometry);
            let cache_key = format!("hazards:{scope}:{hazard_type}:{}", bbox.cache_fragment());
            let outcome = self.fetcher.fetch(&cache_key, &query).await;
            debug!(hazard_type = %hazard_type, outcome = outcome.label(), "Type queried");
            match outcome {
                FetchOutcome::Stale(_) => collected.stale_queries += 1,
                FetchOutcome::Empty => collected.empty_queries += 1,
                _ => {}
            }
            elements.extend(outcome.into_payload().elements);
        }

        collected.hazards = self.classifier.features_from_elements(&elements, Some(types));
        Ok(collected)
    }

    fn new_metadata(&self, prefix: &str, bbox: BoundingBox) -> PackMetadata {
        let now = self.clock.now();
        PackMetadata {
            version: format!("{prefix}-{}", now.timestamp_millis()),
            generated_at: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            bbox,
        }
    }

    fn publish_version<T: Serialize>(
        &self,
        pack_type: PackType,
        centre_id: &str,
        metadata: &PackMetadata,
        pack: &T,
    ) -> SyncResult<PathBuf> {
        let pretty = serde_json::to_string_pretty(pack)?;
        let current = self.layout.current_pack(pack_type, centre_id);
        write_file(&current, &pretty)?;
        write_file(
            &self.layout.version_file(pack_type, centre_id, &metadata.version),
            &pretty,
        )?;
        self.prune_versions(pack_type, centre_id, KEEP_VERSIONS)?;

        self.registry.register(&RegistryRecord {
            centre_id: centre_id.to_string(),
            pack_type,
            version: metadata.version.clone(),
            url_or_inline: serde_json::to_string(pack)?,
            generated_at: metadata.generated_at.clone(),
        })?;
        Ok(current)
    }

    #[instrument(skip(self))]
    pub async fn build_hazards(&self, centre_id: &str) -> SyncResult<BuildReport> {
        let centre = self.find_centre(centre_id)?;
        let bbox = BoundingBox::around(centre.point(), HAZARDS_BBOX_DELTA);
        let types = BTreeSet::from(HazardType::ALL);
        let collected = self.collect_hazards(centre_id, &bbox, &types).await?;

        let metadata = self.new_metadata("hazards", bbox);
        let pack = HazardsPack {
            metadata: metadata.clone(),
            centre_id: centre_id.to_string(),
            hazards: collected.hazards,
        };
        let path = self.publish_version(PackType::Hazards, centre_id, &metadata, &pack)?;

        let mut stats = HazardStats::from_pack(&pack);
        stats.stale_queries = collected.stale_queries;
        stats.empty_queries = collected.empty_queries;
        info!(
            centre_id,
            version = %metadata.version,
            hazards = stats.total_hazards,
            voice_eligible = stats.voice_eligible,
            stale_queries = stats.stale_queries,
            empty_queries = stats.empty_queries,
            path = %path.display(),
            "Hazards pack built"
        );

        Ok(BuildReport {
            centre_id: centre_id.to_string(),
            pack_type: PackType::Hazards,
            version: metadata.version,
            path,
            items: pack.hazards.len(),
            stats: Some(stats),
        })
    }

    /// Re-stamps the existing routes file for `centre_id` as a new version.
    #[instrument(skip(self))]
    pub async fn build_routes(&self, centre_id: &str) -> SyncResult<BuildReport> {
        let centre = self.find_centre(centre_id)?;
        let routes_path = self.layout.current_pack(PackType::Routes, centre_id);
        let text = fs::read_to_string(&routes_path).map_err(|_| {
            SyncError::MissingData(format!("routes data missing: {}", routes_path.display()))
        })?;
        let existing: Value = serde_json::from_str(&text)?;
        let routes = existing
            .get("routes")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let metadata = self.new_metadata("routes", BoundingBox::around(centre.point(), ROUTES_BBOX_DELTA));
        let pack = json!({
            "metadata": metadata,
            "centreId": centre_id,
            "routes": routes,
        });

        if let Ok(parsed) = parse_routes_pack(&pack.to_string()) {
            for problem in validate_routes_pack(&parsed, &centre) {
                warn!(centre_id, problem = %problem, "Route failed validation");
            }
        }

        let path = self.publish_version(PackType::Routes, centre_id, &metadata, &pack)?;
        info!(
            centre_id,
            version = %metadata.version,
            routes = routes.len(),
            path = %path.display(),
            "Routes pack built"
        );

        Ok(BuildReport {
            centre_id: centre_id.to_string(),
            pack_type: PackType::Routes,
            version: metadata.version,
            path,
            items: routes.len(),
            stats: None,
        })
    }

    /// Copies a stored version back over the current pack and records the
    /// rollback as a new registry entry.
    #[instrument(skip(self))]
    pub fn rollback(
        &self,
        centre_id: &str,
        pack_type: PackType,
        to_version: &str,
    ) -> SyncResult<PathBuf> {
        if pack_type == PackType::Centres {
            return Err(SyncError::VersionNotFound(format!(
                "{pack_type} packs are not versioned"
            )));
        }
        let source = self.layout.version_file(pack_type, centre_id, to_version);
        let text = fs::read_to_string(&source)
            .map_err(|_| SyncError::VersionNotFound(source.display().to_string()))?;
        let payload: Value = serde_json::from_str(&text)?;

        let target = self.layout.current_pack(pack_type, centre_id);
        write_file(&target, &serde_json::to_string_pretty(&payload)?)?;
        self.registry.register(&RegistryRecord {
            centre_id: centre_id.to_string(),
            pack_type,
            version: to_version.to_string(),
            url_or_inline: payload.to_string(),
            generated_at: self.clock.now().to_rfc3339_opts(SecondsFormat::Millis, true),
        })?;

        info!(
            centre_id,
            pack_type = %pack_type,
            to_version,
            path = %target.display(),
            "Rollback complete"
        );
        Ok(target)
    }

    /// Stored versions, newest first.
    pub fn list_versions(&self, pack_type: PackType, centre_id: &str) -> SyncResult<Vec<String>> {
        Ok(sorted_versions(&self.layout.versions_dir(pack_type, centre_id))?
            .into_iter()
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect())
    }

    /// Deletes all but the `keep` newest version files.
    pub fn prune_versions(&self, pack_type: PackType, centre_id: &str, keep: usize) -> SyncResult<usize> {
        let files = sorted_versions(&self.layout.versions_dir(pack_type, centre_id))?;
        let mut removed = 0;
        for path in files.iter().skip(keep) {
            fs::remove_file(path)?;
            removed += 1;
        }
        if removed > 0 {
            debug!(centre_id, pack_type = %pack_type, removed, "Pruned old versions");
        }
        Ok(removed)
    }
}

fn write_file(path: &Path, contents: &str) -> SyncResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    Ok(())
}

/// Epoch-ms stamp at the end of a version name such as `hazards-1700000000000`.
fn version_stamp(path: &Path) -> Option<i64> {
    path.file_stem()?.to_str()?.rsplit('-').next()?.parse().ok()
}

fn modified_ms(path: &Path) -> i64 {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn sorted_versions(dir: &Path) -> SyncResult<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files: Vec<(i64, PathBuf)> = fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .map(|p| (version_stamp(&p).unwrap_or_else(|| modified_ms(&p)), p))
        .collect();
    files.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
    Ok(files.into_iter().map(|(_, p)| p).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::fetch::fake::FakeClient;
    use crate::ingest::RetryPolicy;
    use crate::pack::parse_hazards_pack;
    use chrono::Duration;
    use std::time::Duration as StdDuration;
    use tempfile::TempDir;

    const CENTRES: &str = r#"[{"id":"colchester","name":"Colchester","lat":51.8896,"lon":0.9035}]"#;

    struct Fixture {
        dir: TempDir,
        clock: Arc<ManualClock>,
        client: Arc<FakeClient>,
        worker: IngestionWorker<Arc<FakeClient>>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("centres.json"), CENTRES).unwrap();
        let clock = Arc::new(ManualClock::at_ms(1_700_000_000_000));
        let client = Arc::new(FakeClient::new());
        let layout = DataLayout::new(dir.path());
        let policy = RetryPolicy {
            max_attempts: 1,
            backoff_step: StdDuration::ZERO,
            min_interval: StdDuration::ZERO,
            cache_ttl: Duration::hours(24),
        };
        let fetcher = UpstreamFetcher::new(
            client.clone(),
            "https://overpass.test/api/interpreter",
            layout.raw_cache_dir(),
            policy,
            clock.clone(),
        );
        let worker = IngestionWorker::new(layout, fetcher, Classifier::new().unwrap(), clock.clone());
        Fixture {
            dir,
            clock,
            client,
            worker,
        }
    }

    #[test]
    fn test_unknown_centre() {
        let f = fixture();
        assert!(matches!(
            f.worker.find_centre("nowhere"),
            Err(SyncError::UnknownCentre(_))
        ));
        assert_eq!(f.worker.find_centre("colchester").unwrap().name, "Colchester");
    }

    #[tokio::test]
    async fn test_oversized_bbox_rejected_before_any_query() {
        let f = fixture();
        let bbox = BoundingBox {
            south: 50.0,
            west: 0.0,
            north: 53.0,
            east: 0.5,
        };
        let result = f
            .worker
            .collect_hazards("x", &bbox, &BTreeSet::from(HazardType::ALL))
            .await;
        assert!(matches!(result, Err(SyncError::BboxRejected(_))));
        assert_eq!(f.client.request_count(), 0);
    }

    #[tokio::test]
    async fn test_build_hazards_writes_registers_and_survives_failures() {
        let f = fixture();
        f.client.push(
            200,
            &[],
            r#"{"elements":[{"type":"node","id":7,"lat":51.89,"lon":0.90,"tags":{"highway":"traffic_signals"}}]}"#,
        );
        // The remaining types get 503s and fall back to empty.
        let report = f.worker.build_hazards("colchester").await.unwrap();

        assert_eq!(report.version, "hazards-1700000000000");
        assert_eq!(report.items, 1);
        let stats = report.stats.unwrap();
        assert_eq!(stats.traffic_signals, 1);
        assert_eq!(stats.empty_queries, HazardType::ALL.len() - 1);
        assert_eq!(f.client.request_count(), HazardType::ALL.len());

        let pack = parse_hazards_pack(&fs::read_to_string(&report.path).unwrap()).unwrap();
        assert_eq!(pack.centre_id, "colchester");
        assert_eq!(pack.hazards[0].id, "traffic_signal:node:7");
        assert!((pack.metadata.bbox.north - 51.9396).abs() < 1e-9);

        let records = f.worker.registry().records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].version, report.version);
        assert_eq!(
            f.worker.list_versions(PackType::Hazards, "colchester").unwrap(),
            vec![report.version]
        );
    }

    #[tokio::test]
    async fn test_versions_pruned_to_three() {
        let f = fixture();
        for _ in 0..5 {
            f.worker.build_hazards("colchester").await.unwrap();
            f.clock.advance(Duration::seconds(1));
        }
        let versions = f.worker.list_versions(PackType::Hazards, "colchester").unwrap();
        assert_eq!(
            versions,
            vec![
                "hazards-1700000004000",
                "hazards-1700000003000",
                "hazards-1700000002000"
            ]
        );
    }

    #[tokio::test]
    async fn test_build_routes_requires_existing_file() {
        let f = fixture();
        assert!(matches!(
            f.worker.build_routes("colchester").await,
            Err(SyncError::MissingData(_))
        ));

        fs::create_dir_all(f.dir.path().join("routes")).unwrap();
        fs::write(
            f.dir.path().join("routes/colchester.json"),
            r#"{"routes":[{"id":"r1","name":"Loop","geometry":[{"lat":51.8896,"lon":0.9035},{"lat":51.8896,"lon":0.9035}]}]}"#,
        )
        .unwrap();
        let report = f.worker.build_routes("colchester").await.unwrap();
        assert_eq!(report.items, 1);
        let pack = parse_routes_pack(&fs::read_to_string(&report.path).unwrap()).unwrap();
        assert_eq!(pack.metadata.version, "routes-1700000000000");
        assert!((pack.metadata.bbox.south - 51.8096).abs() < 1e-9);
        assert_eq!(pack.routes[0].name, "Loop");
    }

    #[tokio::test]
    async fn test_rollback_restores_and_registers() {
        let f = fixture();
        let first = f.worker.build_hazards("colchester").await.unwrap();
        f.clock.advance(Duration::seconds(1));
        f.worker.build_hazards("colchester").await.unwrap();

        let target = f
            .worker
            .rollback("colchester", PackType::Hazards, &first.version)
            .unwrap();
        let current = parse_hazards_pack(&fs::read_to_string(target).unwrap()).unwrap();
        assert_eq!(current.metadata.version, first.version);

        let latest = f
            .worker
            .registry()
            .latest("colchester", PackType::Hazards)
            .unwrap()
            .unwrap();
        assert_eq!(latest.version, first.version);

        assert!(matches!(
            f.worker.rollback("colchester", PackType::Hazards, "hazards-1"),
            Err(SyncError::VersionNotFound(_))
        ));
    }
}
