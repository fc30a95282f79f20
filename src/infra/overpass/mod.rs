//! Public Overpass API as the fallback query service.

mod cache;
mod client;

pub use cache::{FEATURE_CACHE_TTL, OsmFeatureCache};
pub use client::OverpassFallbackService;
