//! On-device hazard resolution across the backend, the pack cache, bundled
//! assets and the public fallback service.

mod camera_cache;
mod corridor;
mod orchestrator;

pub use camera_cache::{CAMERA_CACHE_TTL, CameraCache};
pub use corridor::{MAX_CORRIDOR_M, MIN_CORRIDOR_M, filter_to_corridor};
pub use orchestrator::FallbackOrchestrator;
