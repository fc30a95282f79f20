pub mod advisory;
pub mod clock;
pub mod config;
pub mod error;
pub mod fetch;
pub mod geo;
pub mod hazards;
pub mod infra;
pub mod ingest;
pub mod output;
pub mod overpass;
pub mod pack;
pub mod publish;
pub mod resolve;
pub mod services;
pub mod session;
pub mod stats;
