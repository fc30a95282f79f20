//! reqwest-backed client for the authoritative hazards backend.

mod backoff;
mod client;

pub use backoff::{RATE_LIMIT_BACKOFF, RateLimitBackoff};
pub use client::{BackendClient, ROUTE_RADIUS_MAX_M, ROUTE_RADIUS_MIN_M};
