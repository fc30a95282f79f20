use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tracing::{debug, trace};

use super::engine::PromptEvent;
use super::rules::AdvisoryRules;
use super::speech::SpeechBudget;
use super::templates::speech_text;
use crate::clock::Clock;
use crate::config::VoiceMode;
use crate::hazards::HazardType;

pub const MANEUVER_SUPPRESSION_S: f64 = 6.0;
pub const TYPE_VOICE_COOLDOWN_MS: i64 = 90_000;
pub const OVERALL_VOICE_COOLDOWN_MS: i64 = 20_000;

/// Text-to-speech sink.
pub trait VoiceOutput: Send {
    fn speak(&mut self, text: &str);
    fn stop(&mut self);
}

/// Types spoken in [`VoiceMode::Alerts`].
pub const ALERT_TYPES: [HazardType; 5] = [
    HazardType::NoEntry,
    HazardType::Roundabout,
    HazardType::MiniRoundabout,
    HazardType::SchoolZone,
    HazardType::SpeedCamera,
];

pub fn speakable(mode: VoiceMode, hazard_type: HazardType) -> bool {
    match mode {
        VoiceMode::Mute => false,
        VoiceMode::Alerts => ALERT_TYPES.contains(&hazard_type),
        VoiceMode::All => hazard_type != HazardType::BusLane,
    }
}

/// What the navigation layer reports alongside an advisory.
#[derive(Debug, Clone, Copy, Default)]
pub struct VoiceContext {
    pub mode: VoiceMode,
    pub maneuver_time_s: Option<f64>,
    pub speed_mps: f64,
}

#[derive(Debug, Clone)]
struct Utterance {
    hazard_type: HazardType,
    text: String,
}

/// Speech queue for hazard advisories. Maneuver instructions always win:
/// they stop hazard speech and flush the queue.
pub struct VoiceQueue<O> {
    output: O,
    rules: AdvisoryRules,
    budget: SpeechBudget,
    clock: Arc<dyn Clock>,
    queue: VecDeque<Utterance>,
    hazard_speaking: bool,
    maneuver_speaking: bool,
    last_by_type: HashMap<HazardType, i64>,
    last_spoken_ms: Option<i64>,
}

impl<O: VoiceOutput> VoiceQueue<O> {
    pub fn new(output: O, rules: AdvisoryRules, clock: Arc<dyn Clock>) -> Self {
        Self {
            output,
            rules,
            budget: SpeechBudget::default(),
            clock,
            queue: VecDeque::new(),
            hazard_speaking: false,
            maneuver_speaking: false,
            last_by_type: HashMap::new(),
            last_spoken_ms: None,
        }
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn is_speaking(&self) -> bool {
        self.hazard_speaking
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Queues `event` unless a gate rejects it. Returns whether it was
    /// accepted.
    pub fn enqueue(&mut self, event: &PromptEvent, ctx: VoiceContext) -> bool {
        let hazard_type = event.hazard_type;
        if !speakable(ctx.mode, hazard_type) {
            return false;
        }
        if ctx
            .maneuver_time_s
            .is_some_and(|t| t < MANEUVER_SUPPRESSION_S)
            || self.maneuver_speaking
        {
            trace!(hazard_type = %hazard_type, "Voice suppressed by maneuver");
            return false;
        }
        if !self.rules.self_gated(hazard_type) {
            let now = self.clock.now_ms();
            let recent_type = self
                .last_by_type
                .get(&hazard_type)
                .is_some_and(|last| now - last < TYPE_VOICE_COOLDOWN_MS);
            let recent_any = self
                .last_spoken_ms
                .is_some_and(|last| now - last < OVERALL_VOICE_COOLDOWN_MS);
            if recent_type || recent_any {
                trace!(hazard_type = %hazard_type, "Voice cooling down");
                return false;
            }
        }

        let raw = speech_text(hazard_type, event.distance_m, ctx.speed_mps);
        let text = self.budget.enforce(raw, hazard_type, Some(event.distance_m));
        self.queue.push_back(Utterance { hazard_type, text });
        self.speak_next();
        true
    }

    fn speak_next(&mut self) {
        if self.hazard_speaking || self.maneuver_speaking {
            return;
        }
        let Some(next) = self.queue.pop_front() else {
            return;
        };
        let now = self.clock.now_ms();
        self.hazard_speaking = true;
        self.last_by_type.insert(next.hazard_type, now);
        self.last_spoken_ms = Some(now);
        debug!(hazard_type = %next.hazard_type, text = %next.text, "Speaking advisory");
        self.output.speak(&next.text);
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn stop_speaking(&mut self) {
        self.hazard_speaking = false;
        self.output.stop();
    }

    /// A maneuver instruction is about to play.
    pub fn on_maneuver_instruction(&mut self) {
        self.maneuver_speaking = true;
        if self.hazard_speaking {
            self.stop_speaking();
        }
        self.clear();
    }

    pub fn on_maneuver_speech_finished(&mut self) {
        self.maneuver_speaking = false;
        self.speak_next();
    }

    pub fn on_hazard_speech_completed(&mut self) {
        self.hazard_speaking = false;
        self.speak_next();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisory::engine::TriggerStage;
    use crate::clock::ManualClock;
    use chrono::Duration;

    #[derive(Default)]
    struct RecordingVoice {
        spoken: Vec<String>,
        stops: usize,
    }

    impl VoiceOutput for RecordingVoice {
        fn speak(&mut self, text: &str) {
            self.spoken.push(text.to_string());
        }

        fn stop(&mut self) {
            self.stops += 1;
        }
    }

    fn event(hazard_type: HazardType, distance_m: f64) -> PromptEvent {
        PromptEvent {
            id: "f:0".into(),
            hazard_type,
            message: String::new(),
            feature_id: "f".into(),
            priority: 1,
            stage: TriggerStage::Primary,
            distance_m,
            expires_at_ms: 6_000,
            confidence: 0.9,
        }
    }

    fn queue() -> (Arc<ManualClock>, VoiceQueue<RecordingVoice>) {
        let clock = Arc::new(ManualClock::at_ms(1_000_000));
        let queue = VoiceQueue::new(
            RecordingVoice::default(),
            AdvisoryRules::new().unwrap(),
            clock.clone(),
        );
        (clock, queue)
    }

    fn ctx(mode: VoiceMode) -> VoiceContext {
        VoiceContext {
            mode,
            maneuver_time_s: None,
            speed_mps: 8.0,
        }
    }

    #[test]
    fn test_mode_gating() {
        assert!(!speakable(VoiceMode::Mute, HazardType::NoEntry));
        assert!(speakable(VoiceMode::Alerts, HazardType::SpeedCamera));
        assert!(!speakable(VoiceMode::Alerts, HazardType::ZebraCrossing));
        assert!(speakable(VoiceMode::All, HazardType::ZebraCrossing));
        assert!(!speakable(VoiceMode::All, HazardType::BusLane));
    }

    #[test]
    fn test_speaks_budgeted_template() {
        let (_, mut q) = queue();
        assert!(q.enqueue(&event(HazardType::Roundabout, 200.0), ctx(VoiceMode::All)));
        assert_eq!(q.output().spoken, ["Roundabout ahead. Prepare early."]);
        assert!(q.is_speaking());
    }

    #[test]
    fn test_blanket_cooldowns_skip_staged_types() {
        let (clock, mut q) = queue();
        assert!(q.enqueue(&event(HazardType::ZebraCrossing, 100.0), ctx(VoiceMode::All)));
        q.on_hazard_speech_completed();

        clock.advance(Duration::seconds(10));
        assert!(!q.enqueue(&event(HazardType::GiveWay, 100.0), ctx(VoiceMode::All)));
        assert!(q.enqueue(&event(HazardType::TrafficSignal, 100.0), ctx(VoiceMode::All)));
        q.on_hazard_speech_completed();

        clock.advance(Duration::seconds(21));
        assert!(!q.enqueue(&event(HazardType::ZebraCrossing, 100.0), ctx(VoiceMode::All)));
        assert!(q.enqueue(&event(HazardType::GiveWay, 100.0), ctx(VoiceMode::All)));
        q.on_hazard_speech_completed();

        clock.advance(Duration::seconds(70));
        assert!(q.enqueue(&event(HazardType::ZebraCrossing, 100.0), ctx(VoiceMode::All)));
    }

    #[test]
    fn test_queue_waits_for_current_speech() {
        let (_, mut q) = queue();
        q.enqueue(&event(HazardType::NoEntry, 50.0), ctx(VoiceMode::Alerts));
        q.enqueue(&event(HazardType::SpeedCamera, 200.0), ctx(VoiceMode::Alerts));
        assert_eq!(q.output().spoken.len(), 1);
        assert_eq!(q.pending(), 1);

        q.on_hazard_speech_completed();
        assert_eq!(q.output().spoken.len(), 2);
        assert_eq!(q.pending(), 0);
    }

    #[test]
    fn test_maneuver_instruction_stops_and_clears() {
        let (_, mut q) = queue();
        q.enqueue(&event(HazardType::NoEntry, 50.0), ctx(VoiceMode::All));
        q.enqueue(&event(HazardType::SpeedCamera, 200.0), ctx(VoiceMode::All));

        q.on_maneuver_instruction();
        assert!(!q.is_speaking());
        assert_eq!(q.pending(), 0);
        assert_eq!(q.output().stops, 1);
        assert!(!q.enqueue(&event(HazardType::BusStop, 100.0), ctx(VoiceMode::All)));

        q.on_maneuver_speech_finished();
        assert!(q.enqueue(&event(HazardType::BusStop, 100.0), ctx(VoiceMode::All)));
        assert_eq!(q.output().spoken.len(), 2);
    }

    #[test]
    fn test_imminent_maneuver_suppresses() {
        let (_, mut q) = queue();
        let mut c = ctx(VoiceMode::All);
        c.maneuver_time_s = Some(4.0);
        assert!(!q.enqueue(&event(HazardType::Roundabout, 200.0), c));
        assert!(q.output().spoken.is_empty());
    }
}
