use parking_lot::RwLock;

use crate::config::{AppConfig, DataSourceMode, PromptSensitivity, VoiceMode};

/// Feature flags read by the resolver and advisory engine, plus the
/// telemetry sinks they report into.
pub trait SettingsSurface: Send + Sync {
    fn data_source_mode(&self) -> DataSourceMode;
    fn prompt_sensitivity(&self) -> PromptSensitivity;
    fn voice_mode(&self) -> VoiceMode;
    fn visual_advisories_enabled(&self) -> bool;

    fn record_error(&self, summary: &str);
    fn clear_error(&self);
    fn record_fallback_used(&self, used: bool);
}

#[derive(Debug, Clone)]
struct State {
    data_source_mode: DataSourceMode,
    prompt_sensitivity: PromptSensitivity,
    voice_mode: VoiceMode,
    visual_advisories_enabled: bool,
    last_error: Option<String>,
    fallback_used: bool,
}

/// Process-local settings seeded from [`AppConfig`].
#[derive(Debug)]
pub struct InMemorySettings {
    state: RwLock<State>,
}

impl Default for InMemorySettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl InMemorySettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            state: RwLock::new(State {
                data_source_mode: config.data_source_mode,
                prompt_sensitivity: config.prompt_sensitivity,
                voice_mode: config.voice_mode,
                visual_advisories_enabled: config.visual_advisories_enabled,
                last_error: None,
                fallback_used: false,
            }),
        }
    }

    pub fn set_data_source_mode(&self, mode: DataSourceMode) {
        self.state.write().data_source_mode = mode;
    }

    pub fn set_prompt_sensitivity(&self, sensitivity: PromptSensitivity) {
        self.state.write().prompt_sensitivity = sensitivity;
    }

    pub fn set_voice_mode(&self, mode: VoiceMode) {
        self.state.write().voice_mode = mode;
    }

    pub fn set_visual_advisories_enabled(&self, enabled: bool) {
        self.state.write().visual_advisories_enabled = enabled;
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.read().last_error.clone()
    }

    pub fn fallback_used(&self) -> bool {
        self.state.read().fallback_used
    }
}

impl SettingsSurface for InMemorySettings {
    fn data_source_mode(&self) -> DataSourceMode {
        self.state.read().data_source_mode
    }

    fn prompt_sensitivity(&self) -> PromptSensitivity {
        self.state.read().prompt_sensitivity
    }

    fn voice_mode(&self) -> VoiceMode {
        self.state.read().voice_mode
    }

    fn visual_advisories_enabled(&self) -> bool {
        self.state.read().visual_advisories_enabled
    }

    fn record_error(&self, summary: &str) {
        self.state.write().last_error = Some(summary.to_string());
    }

    fn clear_error(&self) {
        self.state.write().last_error = None;
    }

    fn record_fallback_used(&self, used: bool) {
        self.state.write().fallback_used = used;
    }
}
