use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::SyncResult;
use crate::geo::GeoPoint;
use crate::hazards::{HazardFeature, HazardType};
use crate::pack::{Centre, PracticeRoute};

/// The authoritative hazards backend.
#[async_trait]
pub trait HazardApi: Send + Sync {
    async fn centres(&self) -> SyncResult<Vec<Centre>>;

    async fn centre_hazards(&self, centre_id: &str) -> SyncResult<Vec<HazardFeature>>;

    async fn centre_routes(&self, centre_id: &str) -> SyncResult<Vec<PracticeRoute>>;

    /// Hazards of `types` inside the route's bbox grown by `radius_m`.
    async fn route_hazards(
        &self,
        route: &[GeoPoint],
        radius_m: f64,
        types: &BTreeSet<HazardType>,
        centre_id: Option<&str>,
    ) -> SyncResult<Vec<HazardFeature>>;
}
