use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use super::cache::OsmFeatureCache;
use crate::error::{SyncError, SyncResult};
use crate::fetch::HttpClient;
use crate::geo::{BoundingBox, GeoPoint};
use crate::hazards::classify::Classifier;
use crate::hazards::{HazardFeature, HazardType};
use crate::ingest::{FetchOutcome, UpstreamFetcher};
use crate::overpass::{OutputMode, union_query};
use crate::services::FallbackQueryService;

/// [`FallbackQueryService`] over the public Overpass API, with a classified
/// feature cache in front of the raw upstream cache.
pub struct OverpassFallbackService<C> {
    fetcher: UpstreamFetcher<C>,
    classifier: Classifier,
    cache: OsmFeatureCache,
}

impl<C: HttpClient> OverpassFallbackService<C> {
    pub fn new(fetcher: UpstreamFetcher<C>, classifier: Classifier, cache: OsmFeatureCache) -> Self {
        Self {
            fetcher,
            classifier,
            cache,
        }
    }
}

#[async_trait]
impl<C: HttpClient> FallbackQueryService for OverpassFallbackService<C> {
    #[instrument(skip(self, route, types), fields(points = route.len(), types = types.len()))]
    async fn features_for_route(
        &self,
        route: &[GeoPoint],
        radius_m: f64,
        types: &BTreeSet<HazardType>,
    ) -> SyncResult<Vec<HazardFeature>> {
        if types.is_empty() {
            return Ok(Vec::new());
        }
        let Some(bbox) = BoundingBox::enclosing(route, radius_m.max(0.0)) else {
            return Ok(Vec::new());
        };
        bbox.validate()?;

        let key = OsmFeatureCache::key(&bbox, types);
        if let Some(features) = self.cache.get(&key) {
            debug!(features = features.len(), "Feature cache hit");
            return Ok(features);
        }

        let query = union_query(types, &bbox, OutputMode::Center);
        let outcome = self.fetcher.fetch(&key, &query).await;
        let fresh = matches!(outcome, FetchOutcome::Fresh(_) | FetchOutcome::CacheHit(_));
        if outcome == FetchOutcome::Empty {
            return Err(SyncError::Network(
                "map-data service unavailable and nothing cached".to_string(),
            ));
        }

        let payload = outcome.into_payload();
        let features = self
            .classifier
            .features_from_elements(&payload.elements, Some(types));
        if fresh {
            if let Err(e) = self.cache.put(&key, &features) {
                warn!(error = %e, "Failed to write feature cache");
            }
        }
        Ok(features)
    }
}
