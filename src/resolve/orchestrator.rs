use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::camera_cache::CameraCache;
use super::corridor::{MAX_CORRIDOR_M, filter_to_corridor};
use crate::config::DataSourceMode;
use crate::error::{SyncError, SyncResult};
use crate::geo::GeoPoint;
use crate::hazards::{HazardFeature, HazardType, dedupe_by_location};
use crate::infra::assets::AssetBundle;
use crate::infra::backend::{ROUTE_RADIUS_MAX_M, ROUTE_RADIUS_MIN_M};
use crate::pack::{PackStore, PackType, parse_hazards_pack, validate_hazards_pack};
use crate::services::{FallbackQueryService, HazardApi, SettingsSurface};

/// Resolves the hazards relevant to a route by walking the data-source
/// tiers allowed by the current [`DataSourceMode`].
pub struct FallbackOrchestrator {
    backend: Arc<dyn HazardApi>,
    fallback: Arc<dyn FallbackQueryService>,
    store: Arc<PackStore>,
    assets: AssetBundle,
    cameras: CameraCache,
    settings: Arc<dyn SettingsSurface>,
}

fn of_types(features: Vec<HazardFeature>, types: &BTreeSet<HazardType>) -> Vec<HazardFeature> {
    features
        .into_iter()
        .filter(|f| types.contains(&f.hazard_type))
        .collect()
}

impl FallbackOrchestrator {
    pub fn new(
        backend: Arc<dyn HazardApi>,
        fallback: Arc<dyn FallbackQueryService>,
        store: Arc<PackStore>,
        assets: AssetBundle,
        cameras: CameraCache,
        settings: Arc<dyn SettingsSurface>,
    ) -> Self {
        Self {
            backend,
            fallback,
            store,
            assets,
            cameras,
            settings,
        }
    }

    /// Best-effort hazards for a route and/or centre. Never fails; errors are
    /// recorded on the settings surface and yield an empty list.
    pub async fn resolve(
        &self,
        route: &[GeoPoint],
        radius_m: f64,
        types: &BTreeSet<HazardType>,
        centre_id: Option<&str>,
    ) -> Vec<HazardFeature> {
        match self.resolve_strict(route, radius_m, types, centre_id).await {
            Ok(features) => features,
            Err(e) => {
                warn!(error = %e, "Backend-only resolution failed");
                Vec::new()
            }
        }
    }

    /// Like [`FallbackOrchestrator::resolve`], but surfaces the backend
    /// failure when running in [`DataSourceMode::BackendOnly`].
    #[instrument(skip(self, route, types), fields(points = route.len(), types = types.len()))]
    pub async fn resolve_strict(
        &self,
        route: &[GeoPoint],
        radius_m: f64,
        types: &BTreeSet<HazardType>,
        centre_id: Option<&str>,
    ) -> SyncResult<Vec<HazardFeature>> {
        let route: Vec<GeoPoint> = route.iter().copied().filter(|p| p.is_finite()).collect();
        let centre = centre_id.map(str::trim).filter(|id| !id.is_empty());
        if centre.is_none() && route.is_empty() {
            return Ok(Vec::new());
        }
        let radius = radius_m.clamp(ROUTE_RADIUS_MIN_M, ROUTE_RADIUS_MAX_M);

        let cached_cameras = if types.contains(&HazardType::SpeedCamera) {
            self.cameras.read(centre, &route)
        } else {
            Vec::new()
        };

        if let Some(pinned) = centre.and_then(|c| self.pinned_hazards(c, types, &route, radius)) {
            info!(tier = "pinned", hazards = pinned.len(), "Using offline-pinned pack");
            return Ok(self
                .merge_cameras(pinned, cached_cameras, &route, centre, types, false)
                .await);
        }

        self.settings.record_fallback_used(false);
        let mode = self.settings.data_source_mode();
        let fetched = match mode {
            DataSourceMode::BackendOnly => self.backend_only(&route, radius, types, centre).await?,
            DataSourceMode::BackendThenCacheThenAssets => {
                self.backend_then_cache_then_assets(&route, radius, types, centre)
                    .await
            }
            DataSourceMode::AssetsOnly => centre
                .map(|c| of_types(self.assets.hazards(c), types))
                .unwrap_or_default(),
        };
        debug!(mode = %mode, hazards = fetched.len(), "Tiers resolved");
        Ok(self
            .merge_cameras(fetched, cached_cameras, &route, centre, types, true)
            .await)
    }

    fn record(&self, error: &SyncError) {
        self.settings.record_error(&error.to_string());
    }

    /// Valid cached hazards of `types` for the centre, ignoring the pin.
    fn pack_cache_hazards(&self, centre_id: &str, types: &BTreeSet<HazardType>) -> Vec<HazardFeature> {
        let Some(json) = self.store.read(PackType::Hazards, centre_id) else {
            return Vec::new();
        };
        match parse_hazards_pack(&json) {
            Ok(pack) if validate_hazards_pack(&pack).is_empty() => of_types(pack.hazards, types),
            Ok(_) => {
                warn!(centre_id, "Cached hazards pack failed validation");
                Vec::new()
            }
            Err(e) => {
                warn!(centre_id, error = %e, "Cached hazards pack is malformed");
                Vec::new()
            }
        }
    }

    fn pinned_hazards(
        &self,
        centre_id: &str,
        types: &BTreeSet<HazardType>,
        route: &[GeoPoint],
        radius: f64,
    ) -> Option<Vec<HazardFeature>> {
        if !self.store.is_offline_available(PackType::Hazards, centre_id) {
            return None;
        }
        let hazards = self.pack_cache_hazards(centre_id, types);
        if hazards.is_empty() {
            return None;
        }
        Some(filter_to_corridor(hazards, route, radius))
    }

    async fn backend_only(
        &self,
        route: &[GeoPoint],
        radius: f64,
        types: &BTreeSet<HazardType>,
        centre: Option<&str>,
    ) -> SyncResult<Vec<HazardFeature>> {
        if !route.is_empty() {
            self.settings.clear_error();
            match self.backend.route_hazards(route, radius, types, centre).await {
                Ok(hazards) if !hazards.is_empty() || centre.is_none() => return Ok(hazards),
                Ok(_) => debug!("Route-scoped backend returned nothing; trying centre"),
                Err(e) => {
                    self.record(&e);
                    if centre.is_none() {
                        return Err(e);
                    }
                }
            }
        }
        let Some(centre) = centre else {
            return Ok(Vec::new());
        };
        self.settings.clear_error();
        match self.backend.centre_hazards(centre).await {
            Ok(hazards) => Ok(of_types(hazards, types)),
            Err(e) => {
                self.record(&e);
                Err(e)
            }
        }
    }

    async fn backend_then_cache_then_assets(
        &self,
        route: &[GeoPoint],
        radius: f64,
        types: &BTreeSet<HazardType>,
        centre: Option<&str>,
    ) -> Vec<HazardFeature> {
        if !route.is_empty() {
            match self.backend.route_hazards(route, radius, types, centre).await {
                Ok(hazards) => {
                    self.settings.clear_error();
                    if !hazards.is_empty() {
                        return self.settle("route", hazards, route, radius, types).await;
                    }
                }
                Err(e) => self.record(&e),
            }
        }

        if let Some(centre) = centre {
            match self.backend.centre_hazards(centre).await {
                Ok(hazards) => {
                    self.settings.clear_error();
                    let hazards = of_types(hazards, types);
                    if !hazards.is_empty() {
                        return self.settle("centre", hazards, route, radius, types).await;
                    }
                }
                Err(e) => self.record(&e),
            }

            let cached = self.pack_cache_hazards(centre, types);
            if !cached.is_empty() {
                self.settings.record_fallback_used(true);
                return self.settle("pack_cache", cached, route, radius, types).await;
            }

            let bundled = of_types(self.assets.hazards(centre), types);
            if !bundled.is_empty() {
                self.settings.record_fallback_used(true);
                return self.settle("assets", bundled, route, radius, types).await;
            }
        }

        self.settings.record_fallback_used(true);
        let queried = self.query_fallback(route, radius, types).await;
        if !queried.is_empty() {
            info!(tier = "fallback_query", hazards = queried.len(), "Using public map data");
            self.settings.clear_error();
        } else {
            warn!("No hazard source produced data");
        }
        queried
    }

    /// Corridor-filters a tier's result, then fills any requested type it
    /// lacks from the fallback query service.
    async fn settle(
        &self,
        tier: &'static str,
        features: Vec<HazardFeature>,
        route: &[GeoPoint],
        radius: f64,
        types: &BTreeSet<HazardType>,
    ) -> Vec<HazardFeature> {
        let baseline = filter_to_corridor(features, route, radius);
        info!(tier, hazards = baseline.len(), "Hazard tier selected");
        if route.is_empty() || types.is_empty() {
            return baseline;
        }
        if baseline.is_empty() {
            return self.query_fallback(route, radius, types).await;
        }
        let present: BTreeSet<HazardType> = baseline.iter().map(|f| f.hazard_type).collect();
        let missing: BTreeSet<HazardType> = types.difference(&present).copied().collect();
        if missing.is_empty() {
            return baseline;
        }
        let extra = self.query_fallback(route, radius, &missing).await;
        if extra.is_empty() {
            return baseline;
        }
        debug!(missing = missing.len(), added = extra.len(), "Filled missing types");
        dedupe_by_location(baseline.into_iter().chain(extra))
    }

    async fn query_fallback(
        &self,
        route: &[GeoPoint],
        radius: f64,
        types: &BTreeSet<HazardType>,
    ) -> Vec<HazardFeature> {
        match self.fallback.features_for_route(route, radius, types).await {
            Ok(features) => features,
            Err(e) => {
                warn!(error = %e, "Fallback query failed");
                Vec::new()
            }
        }
    }

    /// Keeps speed cameras available across backend gaps: fresh cameras
    /// refresh the per-route cache, otherwise cached or queried cameras are
    /// merged in.
    async fn merge_cameras(
        &self,
        fetched: Vec<HazardFeature>,
        cached: Vec<HazardFeature>,
        route: &[GeoPoint],
        centre: Option<&str>,
        types: &BTreeSet<HazardType>,
        allow_network: bool,
    ) -> Vec<HazardFeature> {
        if !types.contains(&HazardType::SpeedCamera) || route.len() < 2 {
            return fetched;
        }
        let fresh: Vec<HazardFeature> = fetched
            .iter()
            .filter(|f| f.hazard_type == HazardType::SpeedCamera)
            .cloned()
            .collect();
        if !fresh.is_empty() {
            self.cameras.store(centre, route, &fresh);
            return fetched;
        }

        let mut extra = filter_to_corridor(cached, route, MAX_CORRIDOR_M);
        if extra.is_empty() && allow_network {
            let cameras = BTreeSet::from([HazardType::SpeedCamera]);
            let queried = self.query_fallback(route, MAX_CORRIDOR_M, &cameras).await;
            if !queried.is_empty() {
                self.settings.record_fallback_used(true);
                self.cameras.store(centre, route, &queried);
                extra = queried;
            }
        }
        if extra.is_empty() {
            return fetched;
        }
        debug!(cameras = extra.len(), "Merged speed cameras");
        dedupe_by_location(fetched.into_iter().chain(extra))
    }
}
