//! Traits for the collaborators the resolver talks to.
//!
//! [`HazardApi`] is the authoritative backend, [`FallbackQueryService`] the
//! public map-data service of last resort, and [`SettingsSurface`] the
//! settings/telemetry sink the session reads flags from.

mod fallback_query;
mod hazard_api;
mod settings;

pub use fallback_query::FallbackQueryService;
pub use hazard_api::HazardApi;
pub use settings::{InMemorySettings, SettingsSurface};
