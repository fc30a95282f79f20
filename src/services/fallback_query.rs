use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::SyncResult;
use crate::geo::GeoPoint;
use crate::hazards::{HazardFeature, HazardType};

/// Lowest-priority source: a public map-data query around a route.
#[async_trait]
pub trait FallbackQueryService: Send + Sync {
    async fn features_for_route(
        &self,
        route: &[GeoPoint],
        radius_m: f64,
        types: &BTreeSet<HazardType>,
    ) -> SyncResult<Vec<HazardFeature>>;
}
