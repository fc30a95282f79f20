//! Deciding when to surface a hazard, and how to say it.
//!
//! [`AdvisoryEngine`] picks at most one [`PromptEvent`] per tick from the
//! nearby features. [`VoiceQueue`] gates and speaks those events through a
//! [`VoiceOutput`], with text fitted by [`SpeechBudget`].

mod engine;
mod rules;
mod speech;
mod templates;
mod voice;

pub use engine::{AdvisoryEngine, AdvisoryInput, PromptEvent, TriggerStage};
pub use rules::{AdvisoryRule, AdvisoryRules, Trigger, action_hint, keyword, message};
pub use speech::{MAX_CHARS, MAX_WORDS, SpeechBudget, distance_phrase};
pub use templates::speech_text;
pub use voice::{VoiceContext, VoiceOutput, VoiceQueue, speakable};
