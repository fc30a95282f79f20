use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{info, instrument, warn};

use super::policy::{FetchAnchor, FetchReason, fetch_reason, normalize_centre};
use crate::clock::Clock;
use crate::error::SyncResult;
use crate::geo::{GeoPoint, route_signature};
use crate::hazards::{HazardFeature, HazardType, SpatialIndex};
use crate::resolve::FallbackOrchestrator;

pub const FETCH_RADIUS_M: f64 = 120.0;

/// Where a session gets its hazards from.
#[async_trait]
pub trait HazardSource: Send + Sync {
    async fn hazards_for_route(
        &self,
        route: &[GeoPoint],
        radius_m: f64,
        types: &BTreeSet<HazardType>,
        centre_id: Option<&str>,
    ) -> SyncResult<Vec<HazardFeature>>;
}

#[async_trait]
impl HazardSource for FallbackOrchestrator {
    async fn hazards_for_route(
        &self,
        route: &[GeoPoint],
        radius_m: f64,
        types: &BTreeSet<HazardType>,
        centre_id: Option<&str>,
    ) -> SyncResult<Vec<HazardFeature>> {
        self.resolve_strict(route, radius_m, types, centre_id).await
    }
}

/// Snapshot of what the session wants hazards for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchRequest {
    pub centre_id: Option<String>,
    pub route: Vec<GeoPoint>,
    pub location: Option<GeoPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    NothingToFetch,
    NotDue,
    AlreadyRunning,
    Updated {
        reason: FetchReason,
        features: usize,
        unavailable_notice: bool,
    },
    Failed {
        reason: FetchReason,
        unavailable_notice: bool,
    },
}

impl RefreshOutcome {
    /// Whether the "hazard data unavailable" notice should be shown now.
    pub fn unavailable_notice(&self) -> bool {
        matches!(
            self,
            RefreshOutcome::Updated {
                unavailable_notice: true,
                ..
            } | RefreshOutcome::Failed {
                unavailable_notice: true,
                ..
            }
        )
    }
}

#[derive(Debug, Default)]
struct FeedState {
    anchor: Option<FetchAnchor>,
    unavailable_notified: bool,
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The session's active hazard set behind a spatial index, refreshed by at
/// most one fetch at a time.
pub struct HazardFeed {
    source: Arc<dyn HazardSource>,
    clock: Arc<dyn Clock>,
    index: SpatialIndex,
    types: BTreeSet<HazardType>,
    in_flight: AtomicBool,
    state: Mutex<FeedState>,
}

impl HazardFeed {
    pub fn new(source: Arc<dyn HazardSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            clock,
            index: SpatialIndex::default(),
            types: HazardType::ALL.into_iter().collect(),
            in_flight: AtomicBool::new(false),
            state: Mutex::new(FeedState::default()),
        }
    }

    pub fn nearby(&self, point: GeoPoint, radius_m: f64) -> Vec<HazardFeature> {
        self.index.query_nearby(point.lat, point.lon, radius_m)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Drops the feature set and fetch anchor; the next refresh counts as a
    /// session start.
    pub fn reset(&self) {
        self.index.rebuild(&[]);
        *self.state.lock() = FeedState::default();
    }

    #[instrument(skip(self, request), fields(centre_id = ?request.centre_id, points = request.route.len()))]
    pub async fn refresh(&self, request: &FetchRequest) -> RefreshOutcome {
        let centre = normalize_centre(request.centre_id.as_deref());
        if request.route.is_empty() && centre.is_none() {
            return RefreshOutcome::NothingToFetch;
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return RefreshOutcome::AlreadyRunning;
        }
        let _guard = InFlight(&self.in_flight);

        let signature = route_signature(&request.route);
        let now = self.clock.now_ms();
        let reason = {
            let mut state = self.state.lock();
            let reason = fetch_reason(
                state.anchor.as_ref(),
                centre.as_deref(),
                &signature,
                request.location,
                now,
            );
            let Some(reason) = reason else {
                return RefreshOutcome::NotDue;
            };
            state.anchor = Some(FetchAnchor {
                centre_id: centre.clone(),
                route_signature: signature,
                point: request.location,
                at_ms: now,
            });
            reason
        };

        let result = self
            .source
            .hazards_for_route(&request.route, FETCH_RADIUS_M, &self.types, centre.as_deref())
            .await;

        let mut state = self.state.lock();
        match result {
            Ok(features) => {
                self.index.rebuild(&features);
                let notice = features.is_empty() && !state.unavailable_notified;
                state.unavailable_notified = features.is_empty();
                info!(reason = %reason, hazards = features.len(), "Hazard set refreshed");
                RefreshOutcome::Updated {
                    reason,
                    features: features.len(),
                    unavailable_notice: notice,
                }
            }
            Err(e) => {
                warn!(reason = %reason, error = %e, "Hazard fetch failed; keeping previous set");
                let notice = !state.unavailable_notified;
                state.unavailable_notified = true;
                RefreshOutcome::Failed {
                    reason,
                    unavailable_notice: notice,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::SyncError;
    use crate::hazards::Tags;
    use chrono::Duration;
    use std::collections::VecDeque;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct ScriptedSource {
        replies: Mutex<VecDeque<Option<Vec<HazardFeature>>>>,
        gate: Option<Notify>,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl HazardSource for ScriptedSource {
        async fn hazards_for_route(
            &self,
            _route: &[GeoPoint],
            radius_m: f64,
            types: &BTreeSet<HazardType>,
            _centre_id: Option<&str>,
        ) -> SyncResult<Vec<HazardFeature>> {
            assert_eq!(radius_m, FETCH_RADIUS_M);
            assert_eq!(types.len(), HazardType::ALL.len());
            *self.calls.lock() += 1;
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            match self.replies.lock().pop_front().flatten() {
                Some(features) => Ok(features),
                None => Err(SyncError::Network("offline".into())),
            }
        }
    }

    fn feature(id: &str) -> HazardFeature {
        HazardFeature {
            id: id.into(),
            hazard_type: HazardType::Roundabout,
            lat: 51.505,
            lon: 0.1,
            tags: Tags::new(),
            source: "test".into(),
            confidence_hint: 0.8,
        }
    }

    fn request() -> FetchRequest {
        FetchRequest {
            centre_id: Some("centreA".into()),
            route: vec![GeoPoint::new(51.50, 0.10), GeoPoint::new(51.51, 0.10)],
            location: Some(GeoPoint::new(51.50, 0.10)),
        }
    }

    fn feed(source: Arc<ScriptedSource>) -> (Arc<ManualClock>, HazardFeed) {
        let clock = Arc::new(ManualClock::at_ms(1_700_000_000_000));
        (clock.clone(), HazardFeed::new(source, clock))
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_set() {
        let source = Arc::new(ScriptedSource::default());
        source.replies.lock().push_back(Some(vec![feature("rb")]));
        let (clock, feed) = feed(source.clone());

        let first = feed.refresh(&request()).await;
        assert!(matches!(
            first,
            RefreshOutcome::Updated {
                reason: FetchReason::SessionStart,
                features: 1,
                unavailable_notice: false
            }
        ));
        assert_eq!(feed.refresh(&request()).await, RefreshOutcome::NotDue);

        clock.advance(Duration::minutes(10));
        let failed = feed.refresh(&request()).await;
        assert!(matches!(failed, RefreshOutcome::Failed { reason: FetchReason::Periodic, .. }));
        assert_eq!(feed.len(), 1);
        assert_eq!(*source.calls.lock(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_notice_once_per_empty_transition() {
        let source = Arc::new(ScriptedSource::default());
        {
            let mut replies = source.replies.lock();
            replies.push_back(Some(vec![]));
            replies.push_back(Some(vec![]));
            replies.push_back(Some(vec![feature("rb")]));
            replies.push_back(Some(vec![]));
        }
        let (clock, feed) = feed(source);
        let mut notices = Vec::new();
        for _ in 0..4 {
            notices.push(feed.refresh(&request()).await.unavailable_notice());
            clock.advance(Duration::minutes(10));
        }
        assert_eq!(notices, [true, false, false, true]);
        assert!(feed.is_empty());
    }

    #[tokio::test]
    async fn test_single_flight() {
        let source = Arc::new(ScriptedSource {
            gate: Some(Notify::new()),
            ..ScriptedSource::default()
        });
        source.replies.lock().push_back(Some(vec![feature("rb")]));
        let (_, feed) = feed(source.clone());
        let req = request();

        let (first, second) = tokio::join!(feed.refresh(&req), async {
            let outcome = feed.refresh(&req).await;
            if let Some(gate) = &source.gate {
                gate.notify_one();
            }
            outcome
        });
        assert!(matches!(first, RefreshOutcome::Updated { features: 1, .. }));
        assert_eq!(second, RefreshOutcome::AlreadyRunning);
        assert_eq!(*source.calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_nothing_to_fetch_without_route_or_centre() {
        let (_, feed) = feed(Arc::new(ScriptedSource::default()));
        assert_eq!(
            feed.refresh(&FetchRequest::default()).await,
            RefreshOutcome::NothingToFetch
        );
    }
}
