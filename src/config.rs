//! Runtime configuration: an optional JSON file overlaid with environment
//! variables.
//!
//! ```json
//! {
//!   "api_base_url": "https://api.example.org",
//!   "data_source_mode": "backend_then_cache_then_assets",
//!   "prompt_sensitivity": "extra_help",
//!   "voice_mode": "alerts"
//! }
//! ```
//!
//! Unknown enum values fall back to their defaults instead of failing the load.

use anyhow::Result;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::overpass::DEFAULT_OVERPASS_URL;

/// Which tiers the fallback orchestrator may consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSourceMode {
    AssetsOnly,
    BackendOnly,
    #[default]
    BackendThenCacheThenAssets,
}

impl FromStr for DataSourceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "assets_only" => Ok(DataSourceMode::AssetsOnly),
            "backend_only" => Ok(DataSourceMode::BackendOnly),
            "backend_then_cache_then_assets" => Ok(DataSourceMode::BackendThenCacheThenAssets),
            other => Err(format!("unknown data source mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptSensitivity {
    Minimal,
    #[default]
    Standard,
    ExtraHelp,
}

impl PromptSensitivity {
    /// Multiplier applied to scaled trigger distances.
    pub fn multiplier(self) -> f64 {
        match self {
            PromptSensitivity::Minimal => 0.8,
            PromptSensitivity::Standard => 1.0,
            PromptSensitivity::ExtraHelp => 1.25,
        }
    }
}

impl FromStr for PromptSensitivity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "minimal" => Ok(PromptSensitivity::Minimal),
            "standard" => Ok(PromptSensitivity::Standard),
            "extra_help" => Ok(PromptSensitivity::ExtraHelp),
            other => Err(format!("unknown prompt sensitivity: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceMode {
    #[default]
    All,
    Alerts,
    Mute,
}

impl FromStr for VoiceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "all" => Ok(VoiceMode::All),
            "alerts" => Ok(VoiceMode::Alerts),
            "mute" => Ok(VoiceMode::Mute),
            other => Err(format!("unknown voice mode: {other}")),
        }
    }
}

fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + Default,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| s.parse().ok()).unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api_base_url: String,
    pub overpass_url: String,
    /// Worker data root: centres, current packs, versions, raw cache, registry.
    pub data_dir: PathBuf,
    pub pack_store_dir: PathBuf,
    /// Bundled offline packs.
    pub assets_dir: PathBuf,
    #[serde(deserialize_with = "lenient")]
    pub data_source_mode: DataSourceMode,
    #[serde(deserialize_with = "lenient")]
    pub prompt_sensitivity: PromptSensitivity,
    #[serde(deserialize_with = "lenient")]
    pub voice_mode: VoiceMode,
    pub visual_advisories_enabled: bool,
    pub api_key: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000".to_string(),
            overpass_url: DEFAULT_OVERPASS_URL.to_string(),
            data_dir: PathBuf::from("data"),
            pack_store_dir: PathBuf::from("data/pack_store"),
            assets_dir: PathBuf::from("data/assets"),
            data_source_mode: DataSourceMode::default(),
            prompt_sensitivity: PromptSensitivity::default(),
            voice_mode: VoiceMode::default(),
            visual_advisories_enabled: true,
            api_key: None,
        }
    }
}

impl AppConfig {
    /// Loads `path` when given, then applies the process environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                serde_json::from_str(&content)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Overlays values read through `lookup`; blank values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("HAZARD_API_BASE_URL") {
            self.api_base_url = v;
        }
        if let Some(v) = get("HAZARD_API_KEY") {
            self.api_key = Some(v);
        }
        if let Some(v) = get("OVERPASS_URL") {
            self.overpass_url = v;
        }
        if let Some(v) = get("HAZARD_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("HAZARD_DATA_SOURCE_MODE") {
            self.data_source_mode = v.parse().unwrap_or_default();
        }
    }
}

impl fmt::Display for DataSourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataSourceMode::AssetsOnly => "assets_only",
            DataSourceMode::BackendOnly => "backend_only",
            DataSourceMode::BackendThenCacheThenAssets => "backend_then_cache_then_assets",
        };
        f.write_str(s)
    }
}
