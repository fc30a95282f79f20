//! On-device hazard session: keeps a route's hazard set fresh in the
//! background and evaluates advisories on a fixed tick.
//!
//! Fetching goes through [`HazardFeed`], which allows one fetch in flight at
//! a time and decides when a refetch is due ([`fetch_reason`]). Evaluation is
//! synchronous and only reads the spatial index, so a host may drive
//! [`HazardSession::tick`] from its location callback while a refresh runs on
//! another task.

mod feed;
mod policy;

pub use feed::{FETCH_RADIUS_M, FetchRequest, HazardFeed, HazardSource, RefreshOutcome};
pub use policy::{
    FetchAnchor, FetchReason, MOVEMENT_REFRESH_M, REFRESH_INTERVAL, fetch_reason, normalize_centre,
};

use std::sync::Arc;

use tracing::{debug, info};

use crate::advisory::{AdvisoryEngine, AdvisoryInput, PromptEvent, VoiceContext, VoiceOutput, VoiceQueue};
use crate::clock::Clock;
use crate::geo::GeoPoint;
use crate::hazards::HazardType;
use crate::services::SettingsSurface;

pub const TICK_INTERVAL_MS: i64 = 1_000;
/// About 2 km/h.
pub const MIN_EVALUATION_SPEED_MPS: f64 = 0.556;
pub const NEARBY_RADIUS_M: f64 = 300.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationSample {
    pub point: GeoPoint,
    pub accuracy_m: f64,
    pub speed_mps: f64,
}

/// Distance and time to the next navigation maneuver, when known.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ManeuverProgress {
    pub distance_m: Option<f64>,
    pub time_s: Option<f64>,
}

pub struct HazardSession<O> {
    feed: Arc<HazardFeed>,
    settings: Arc<dyn SettingsSurface>,
    clock: Arc<dyn Clock>,
    engine: AdvisoryEngine,
    voice: VoiceQueue<O>,
    centre_id: Option<String>,
    route: Vec<GeoPoint>,
    last_location: Option<GeoPoint>,
    last_tick_ms: Option<i64>,
    active: bool,
}

impl<O: VoiceOutput> HazardSession<O> {
    pub fn new(
        feed: Arc<HazardFeed>,
        settings: Arc<dyn SettingsSurface>,
        clock: Arc<dyn Clock>,
        engine: AdvisoryEngine,
        voice: VoiceQueue<O>,
    ) -> Self {
        Self {
            feed,
            settings,
            clock,
            engine,
            voice,
            centre_id: None,
            route: Vec::new(),
            last_location: None,
            last_tick_ms: None,
            active: false,
        }
    }

    pub fn feed(&self) -> Arc<HazardFeed> {
        Arc::clone(&self.feed)
    }

    pub fn voice(&self) -> &VoiceQueue<O> {
        &self.voice
    }

    /// Host callbacks for speech completion and maneuver instructions go
    /// through here.
    pub fn voice_mut(&mut self) -> &mut VoiceQueue<O> {
        &mut self.voice
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_route(&mut self, route: Vec<GeoPoint>) {
        self.route = route.into_iter().filter(GeoPoint::is_finite).collect();
    }

    pub fn set_centre(&mut self, centre_id: Option<&str>) {
        self.centre_id = normalize_centre(centre_id);
    }

    /// What a refresh would fetch for right now.
    pub fn fetch_request(&self) -> FetchRequest {
        FetchRequest {
            centre_id: self.centre_id.clone(),
            route: self.route.clone(),
            location: self.last_location,
        }
    }

    /// Starts a fresh session and performs the initial fetch.
    pub async fn start(&mut self) -> RefreshOutcome {
        self.feed.reset();
        self.engine.reset();
        self.voice.clear();
        self.last_tick_ms = None;
        self.active = true;
        info!(centre_id = ?self.centre_id, points = self.route.len(), "Hazard session started");
        self.refresh().await
    }

    pub fn stop(&mut self) {
        self.active = false;
        self.voice.clear();
        self.voice.stop_speaking();
        info!("Hazard session stopped");
    }

    pub async fn refresh(&self) -> RefreshOutcome {
        if !self.active {
            return RefreshOutcome::NothingToFetch;
        }
        self.feed.refresh(&self.fetch_request()).await
    }

    /// Evaluates one location update. At most one advisory is produced per
    /// tick interval.
    pub fn tick(&mut self, sample: LocationSample, maneuver: ManeuverProgress) -> Option<PromptEvent> {
        if !self.active || !sample.point.is_finite() {
            return None;
        }
        let now = self.clock.now_ms();
        if self
            .last_tick_ms
            .is_some_and(|last| now - last < TICK_INTERVAL_MS)
        {
            return None;
        }
        self.last_tick_ms = Some(now);
        self.last_location = Some(sample.point);
        if sample.speed_mps < MIN_EVALUATION_SPEED_MPS {
            return None;
        }

        let mut features = self.feed.nearby(sample.point, NEARBY_RADIUS_M);
        if !self.settings.visual_advisories_enabled() {
            // hard restrictions are still announced
            features.retain(|f| f.hazard_type == HazardType::NoEntry);
        }
        let input = AdvisoryInput {
            now_ms: now,
            location: sample.point,
            gps_accuracy_m: sample.accuracy_m,
            speed_mps: sample.speed_mps,
            maneuver_distance_m: maneuver.distance_m,
            maneuver_time_s: maneuver.time_s,
            features: &features,
            visual_enabled: true,
            sensitivity: self.settings.prompt_sensitivity(),
            route: &self.route,
        };
        let event = self.engine.evaluate(&input)?;

        let spoken = self.voice.enqueue(
            &event,
            VoiceContext {
                mode: self.settings.voice_mode(),
                maneuver_time_s: maneuver.time_s,
                speed_mps: sample.speed_mps,
            },
        );
        debug!(event_id = %event.id, spoken, "Advisory emitted");
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisory::AdvisoryRules;
    use crate::clock::ManualClock;
    use crate::config::VoiceMode;
    use crate::error::SyncResult;
    use crate::hazards::{HazardFeature, Tags};
    use crate::services::InMemorySettings;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::collections::BTreeSet;

    struct StaticSource(Vec<HazardFeature>);

    #[async_trait]
    impl HazardSource for StaticSource {
        async fn hazards_for_route(
            &self,
            _route: &[GeoPoint],
            _radius_m: f64,
            _types: &BTreeSet<HazardType>,
            _centre_id: Option<&str>,
        ) -> SyncResult<Vec<HazardFeature>> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct RecordingVoice {
        spoken: Vec<String>,
    }

    impl VoiceOutput for RecordingVoice {
        fn speak(&mut self, text: &str) {
            self.spoken.push(text.to_string());
        }

        fn stop(&mut self) {}
    }

    // ~111 m per 0.001 deg of latitude
    fn feature(id: &str, hazard_type: HazardType, lat: f64) -> HazardFeature {
        HazardFeature {
            id: id.into(),
            hazard_type,
            lat,
            lon: 0.1,
            tags: Tags::new(),
            source: "test".into(),
            confidence_hint: 0.9,
        }
    }

    fn session(
        features: Vec<HazardFeature>,
    ) -> (Arc<ManualClock>, Arc<InMemorySettings>, HazardSession<RecordingVoice>) {
        let clock = Arc::new(ManualClock::at_ms(1_700_000_000_000));
        let settings = Arc::new(InMemorySettings::default());
        let feed = Arc::new(HazardFeed::new(Arc::new(StaticSource(features)), clock.clone()));
        let voice = VoiceQueue::new(
            RecordingVoice::default(),
            AdvisoryRules::new().unwrap(),
            clock.clone(),
        );
        let mut session = HazardSession::new(
            feed,
            settings.clone(),
            clock.clone(),
            AdvisoryEngine::with_default_rules().unwrap(),
            voice,
        );
        session.set_centre(Some("centreA"));
        session.set_route(vec![GeoPoint::new(51.500, 0.1), GeoPoint::new(51.510, 0.1)]);
        (clock, settings, session)
    }

    fn sample(lat: f64, speed_mps: f64) -> LocationSample {
        LocationSample {
            point: GeoPoint::new(lat, 0.1),
            accuracy_m: 5.0,
            speed_mps,
        }
    }

    #[tokio::test]
    async fn test_tick_emits_and_speaks() {
        let (_, _, mut session) = session(vec![feature("rb", HazardType::Roundabout, 51.502)]);
        assert!(matches!(
            session.start().await,
            RefreshOutcome::Updated { features: 1, .. }
        ));

        let event = session
            .tick(sample(51.500, 10.0), ManeuverProgress::default())
            .unwrap();
        assert_eq!(event.hazard_type, HazardType::Roundabout);
        assert_eq!(session.voice().output().spoken.len(), 1);
    }

    #[tokio::test]
    async fn test_tick_interval_and_speed_gates() {
        let (clock, _, mut session) = session(vec![
            feature("rb", HazardType::Roundabout, 51.502),
            feature("school", HazardType::SchoolZone, 51.5021),
        ]);
        session.start().await;

        assert!(session.tick(sample(51.500, 0.3), ManeuverProgress::default()).is_none());
        clock.advance(Duration::milliseconds(500));
        assert!(session.tick(sample(51.500, 10.0), ManeuverProgress::default()).is_none());
        clock.advance(Duration::milliseconds(500));
        assert!(session.tick(sample(51.500, 10.0), ManeuverProgress::default()).is_some());
    }

    #[tokio::test]
    async fn test_visual_off_keeps_no_entry_only() {
        let (clock, settings, mut session) = session(vec![
            feature("rb", HazardType::Roundabout, 51.502),
            feature("ne", HazardType::NoEntry, 51.5004),
        ]);
        settings.set_visual_advisories_enabled(false);
        settings.set_voice_mode(VoiceMode::Mute);
        session.start().await;

        let event = session
            .tick(sample(51.500, 10.0), ManeuverProgress::default())
            .unwrap();
        assert_eq!(event.hazard_type, HazardType::NoEntry);
        clock.advance(Duration::seconds(1));
        assert!(session.tick(sample(51.500, 10.0), ManeuverProgress::default()).is_none());
        assert!(session.voice().output().spoken.is_empty());
    }

    #[tokio::test]
    async fn test_inactive_session_is_silent() {
        let (_, _, mut session) = session(vec![feature("rb", HazardType::Roundabout, 51.502)]);
        assert!(session.tick(sample(51.500, 10.0), ManeuverProgress::default()).is_none());
        assert_eq!(session.refresh().await, RefreshOutcome::NothingToFetch);

        session.start().await;
        session.stop();
        assert!(!session.is_active());
        assert!(session.tick(sample(51.500, 10.0), ManeuverProgress::default()).is_none());
    }
}
