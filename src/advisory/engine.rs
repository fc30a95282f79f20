use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, trace};

use super::rules::{AdvisoryRule, AdvisoryRules, Trigger, message};
use crate::config::PromptSensitivity;
use crate::geo::{GeoPoint, along_distance_ahead_m, haversine_m};
use crate::hazards::{HazardFeature, HazardType, TableError};

pub const MAX_GPS_ACCURACY_M: f64 = 25.0;
pub const MANEUVER_SUPPRESSION_S: f64 = 6.0;
pub const MANEUVER_SUPPRESSION_M: f64 = 80.0;
pub const MIN_CONFIDENCE: f64 = 0.60;
pub const PASS_RESET_M: f64 = 80.0;
pub const TYPE_COOLDOWN_MS: i64 = 60_000;
pub const EVENT_TTL_MS: i64 = 6_000;

const MPS_TO_MPH: f64 = 2.236_936_3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerStage {
    Primary,
    Secondary,
}

/// One advisory to surface. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptEvent {
    pub id: String,
    pub hazard_type: HazardType,
    pub message: String,
    pub feature_id: String,
    pub priority: u8,
    pub stage: TriggerStage,
    pub distance_m: f64,
    pub expires_at_ms: i64,
    pub confidence: f64,
}

/// Everything the engine looks at on one tick.
#[derive(Debug, Clone, Copy)]
pub struct AdvisoryInput<'a> {
    pub now_ms: i64,
    pub location: GeoPoint,
    pub gps_accuracy_m: f64,
    pub speed_mps: f64,
    pub maneuver_distance_m: Option<f64>,
    pub maneuver_time_s: Option<f64>,
    pub features: &'a [HazardFeature],
    pub visual_enabled: bool,
    pub sensitivity: PromptSensitivity,
    pub route: &'a [GeoPoint],
}

impl AdvisoryInput<'_> {
    fn maneuver_imminent(&self) -> bool {
        self.maneuver_time_s.is_some_and(|t| t < MANEUVER_SUPPRESSION_S)
            || self
                .maneuver_distance_m
                .is_some_and(|d| d < MANEUVER_SUPPRESSION_M)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct FeatureState {
    primary_fired: bool,
    secondary_fired: bool,
    primary_fired_at_m: Option<f64>,
}

#[derive(Debug)]
struct Candidate<'a> {
    feature: &'a HazardFeature,
    stage: TriggerStage,
    distance_m: f64,
    priority: u8,
}

/// Decides which stage, if any, a feature is due for at `distance_m`.
fn trigger_stage(
    rule: &AdvisoryRule,
    state: &FeatureState,
    distance_m: f64,
    speed_mph: f64,
    multiplier: f64,
) -> Option<TriggerStage> {
    match rule.trigger {
        Trigger::Single { distance_m: base, scaled } => {
            let limit = if scaled { base * multiplier } else { base };
            (!state.primary_fired && distance_m <= limit).then_some(TriggerStage::Primary)
        }
        Trigger::Staged {
            primary_m,
            secondary_m,
            min_secondary_speed_mph,
        } => {
            let primary = primary_m * multiplier;
            let secondary = secondary_m * multiplier;
            // a primary fired inside the secondary radius already covered it
            let eligible = state.primary_fired_at_m.is_none_or(|d| d > secondary);
            let fast_enough = min_secondary_speed_mph.is_none_or(|min| speed_mph > min);
            if !state.primary_fired && distance_m <= primary {
                Some(TriggerStage::Primary)
            } else if state.primary_fired
                && !state.secondary_fired
                && eligible
                && distance_m <= secondary
                && fast_enough
            {
                Some(TriggerStage::Secondary)
            } else {
                None
            }
        }
    }
}

/// Per-feature staged trigger state machine with per-type cooldowns and
/// priority arbitration. Emits at most one event per call.
#[derive(Debug)]
pub struct AdvisoryEngine {
    rules: AdvisoryRules,
    states: HashMap<String, FeatureState>,
    last_fired_by_type: HashMap<HazardType, i64>,
}

impl AdvisoryEngine {
    pub fn new(rules: AdvisoryRules) -> Self {
        Self {
            rules,
            states: HashMap::new(),
            last_fired_by_type: HashMap::new(),
        }
    }

    pub fn with_default_rules() -> Result<Self, TableError> {
        Ok(Self::new(AdvisoryRules::new()?))
    }

    /// Forgets all per-feature and per-type history.
    pub fn reset(&mut self) {
        self.states.clear();
        self.last_fired_by_type.clear();
    }

    pub fn tracked_features(&self) -> usize {
        self.states.len()
    }

    pub fn evaluate(&mut self, input: &AdvisoryInput<'_>) -> Option<PromptEvent> {
        if !input.visual_enabled
            || input.gps_accuracy_m > MAX_GPS_ACCURACY_M
            || input.maneuver_imminent()
            || input.features.is_empty()
        {
            return None;
        }

        let speed_mph = input.speed_mps * MPS_TO_MPH;
        let multiplier = input.sensitivity.multiplier();
        let use_route = input.route.len() >= 2;
        let default_state = FeatureState::default();
        let mut candidates = Vec::new();

        for feature in input.features {
            if feature.confidence_hint < MIN_CONFIDENCE {
                continue;
            }
            let along = if use_route {
                along_distance_ahead_m(input.route, input.location, feature.point())
            } else {
                None
            };
            if along.is_some_and(|d| d <= -PASS_RESET_M) {
                if self.states.remove(&feature.id).is_some() {
                    trace!(feature_id = %feature.id, "Feature passed; state reset");
                }
                continue;
            }
            let distance = along.unwrap_or_else(|| haversine_m(input.location, feature.point()));
            if distance < 0.0 {
                continue;
            }

            let rule = self.rules.get(feature.hazard_type);
            let state = self.states.get(&feature.id).unwrap_or(&default_state);
            let Some(stage) = trigger_stage(rule, state, distance, speed_mph, multiplier) else {
                continue;
            };
            if !rule.self_gated() {
                let cooling = self
                    .last_fired_by_type
                    .get(&feature.hazard_type)
                    .is_some_and(|last| input.now_ms - last < TYPE_COOLDOWN_MS);
                if cooling {
                    continue;
                }
            }
            let bonus = u8::from(stage == TriggerStage::Secondary);
            candidates.push(Candidate {
                feature,
                stage,
                distance_m: distance.round(),
                priority: rule.priority + bonus,
            });
        }

        candidates.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.distance_m.total_cmp(&b.distance_m))
        });
        let selected = candidates.into_iter().next()?;

        let state = self.states.entry(selected.feature.id.clone()).or_default();
        state.primary_fired = true;
        if selected.stage == TriggerStage::Secondary {
            state.secondary_fired = true;
        }
        if state.primary_fired_at_m.is_none() {
            state.primary_fired_at_m = Some(selected.distance_m);
        }
        let hazard_type = selected.feature.hazard_type;
        self.last_fired_by_type.insert(hazard_type, input.now_ms);

        debug!(
            feature_id = %selected.feature.id,
            hazard_type = %hazard_type,
            stage = ?selected.stage,
            distance_m = selected.distance_m,
            "Advisory fired"
        );
        Some(PromptEvent {
            id: format!("{}:{}", selected.feature.id, input.now_ms),
            hazard_type,
            message: message(hazard_type),
            feature_id: selected.feature.id.clone(),
            priority: selected.priority,
            stage: selected.stage,
            distance_m: selected.distance_m,
            expires_at_ms: input.now_ms + EVENT_TTL_MS,
            confidence: selected.feature.confidence_hint,
        })
    }
}
