use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ETAG, HeaderValue, IF_NONE_MATCH};
use tracing::{debug, instrument, warn};

use super::backoff::RateLimitBackoff;
use crate::error::{SyncError, SyncResult};
use crate::fetch::{self, HttpClient};
use crate::geo::{BoundingBox, GeoPoint};
use crate::hazards::{HazardFeature, HazardType};
use crate::pack::{
    CENTRES_KEY, Centre, Pack, PackStore, PackType, PracticeRoute, parse_centres_pack,
    parse_hazards_pack, parse_routes_pack,
};
use crate::services::HazardApi;

pub const ROUTE_RADIUS_MIN_M: f64 = 80.0;
pub const ROUTE_RADIUS_MAX_M: f64 = 250.0;

/// HTTP client for the hazards backend with etag revalidation against the
/// [`PackStore`] and a shared 429 backoff.
pub struct BackendClient<C> {
    http: C,
    base_url: String,
    store: Arc<PackStore>,
    backoff: Arc<RateLimitBackoff>,
}

impl<C: HttpClient> BackendClient<C> {
    pub fn new(
        http: C,
        base_url: &str,
        store: Arc<PackStore>,
        backoff: Arc<RateLimitBackoff>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            store,
            backoff,
        }
    }

    pub fn backoff(&self) -> &RateLimitBackoff {
        &self.backoff
    }

    /// GET the path made of `segments` with `If-None-Match`, caching the body on 200 and reusing
    /// the cached body on 304.
    async fn conditional_get<T: Pack>(
        &self,
        pack_type: PackType,
        key: &str,
        segments: &[&str],
        parse: fn(&str) -> SyncResult<T>,
    ) -> SyncResult<T> {
        self.backoff.ensure_clear()?;

        let mut req = fetch::get_with_segments(&self.base_url, segments)?;
        if let Some(value) = self
            .store
            .read_etag(pack_type, key)
            .and_then(|etag| HeaderValue::from_str(&etag).ok())
        {
            req.headers_mut().insert(IF_NONE_MATCH, value);
        }

        let resp = self.http.execute(req).await?;
        match resp.status() {
            StatusCode::NOT_MODIFIED => {
                let cached = self
                    .store
                    .read(pack_type, key)
                    .ok_or_else(|| SyncError::NotModifiedWithoutCache(format!("{pack_type}/{key}")))?;
                let parsed = parse(&cached).map_err(|e| {
                    SyncError::MalformedPayload(format!("cached {pack_type}/{key}: {e}"))
                })?;
                debug!(pack_type = %pack_type, key, "Not modified; using cached payload");
                Ok(parsed)
            }
            StatusCode::TOO_MANY_REQUESTS => {
                self.backoff.record_429();
                warn!(pack_type = %pack_type, key, "Backend throttled; backing off");
                Err(SyncError::RateLimited {
                    retry_in_ms: self.backoff.remaining_ms(),
                })
            }
            status if !status.is_success() => Err(SyncError::Network(format!(
                "{pack_type} fetch for {key} failed with {status}"
            ))),
            _ => {
                let etag = resp
                    .headers()
                    .get(ETAG)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let body = resp.text().await?;
                let parsed = parse(&body)?;
                if let Err(e) =
                    self.store
                        .write(pack_type, key, &body, parsed.metadata(), etag.as_deref(), None)
                {
                    warn!(pack_type = %pack_type, key, error = %e, "Failed to cache pack");
                }
                Ok(parsed)
            }
        }
    }
}

#[async_trait]
impl<C: HttpClient> HazardApi for BackendClient<C> {
    #[instrument(skip(self))]
    async fn centres(&self) -> SyncResult<Vec<Centre>> {
        let pack = self
            .conditional_get(PackType::Centres, CENTRES_KEY, &["centres"], parse_centres_pack)
            .await?;
        debug!(centres = pack.centres.len(), "Centres loaded");
        Ok(pack.centres)
    }

    #[instrument(skip(self))]
    async fn centre_hazards(&self, centre_id: &str) -> SyncResult<Vec<HazardFeature>> {
        let pack = self
            .conditional_get(
                PackType::Hazards,
                centre_id,
                &["centres", centre_id, "hazards"],
                parse_hazards_pack,
            )
            .await?;
        debug!(centre_id, hazards = pack.hazards.len(), "Backend hazards loaded");
        Ok(pack.hazards)
    }

    #[instrument(skip(self))]
    async fn centre_routes(&self, centre_id: &str) -> SyncResult<Vec<PracticeRoute>> {
        let pack = self
            .conditional_get(
                PackType::Routes,
                centre_id,
                &["centres", centre_id, "routes"],
                parse_routes_pack,
            )
            .await?;
        Ok(pack.routes)
    }

    #[instrument(skip(self, route, types), fields(points = route.len(), types = types.len()))]
    async fn route_hazards(
        &self,
        route: &[GeoPoint],
        radius_m: f64,
        types: &BTreeSet<HazardType>,
        centre_id: Option<&str>,
    ) -> SyncResult<Vec<HazardFeature>> {
        let radius = radius_m.clamp(ROUTE_RADIUS_MIN_M, ROUTE_RADIUS_MAX_M);
        let Some(bbox) = BoundingBox::enclosing(route, radius) else {
            return Ok(Vec::new());
        };
        if types.is_empty() {
            return Ok(Vec::new());
        }
        self.backoff.ensure_clear()?;

        let mut type_names: Vec<&str> = types.iter().map(HazardType::as_str).collect();
        type_names.sort_unstable();
        let mut query = vec![
            ("south", format!("{:.6}", bbox.south)),
            ("west", format!("{:.6}", bbox.west)),
            ("north", format!("{:.6}", bbox.north)),
            ("east", format!("{:.6}", bbox.east)),
            ("types", type_names.join(",")),
        ];
        if let Some(id) = centre_id.map(str::trim).filter(|id| !id.is_empty()) {
            query.push(("centreId", id.to_string()));
        }
        let req = fetch::get_with_query(&format!("{}/hazards/route", self.base_url), &query)?;

        let resp = self.http.execute(req).await?;
        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            self.backoff.record_429();
            warn!("Route hazards throttled; backing off");
            return Err(SyncError::RateLimited {
                retry_in_ms: self.backoff.remaining_ms(),
            });
        }
        if !status.is_success() {
            return Err(SyncError::Network(format!(
                "route hazards fetch failed with {status}"
            )));
        }
        let pack = parse_hazards_pack(&resp.text().await?)?;
        let filtered: Vec<_> = pack
            .hazards
            .into_iter()
            .filter(|h| types.contains(&h.hazard_type))
            .collect();
        debug!(hazards = filtered.len(), "Route-scoped backend hazards loaded");
        Ok(filtered)
    }
}
