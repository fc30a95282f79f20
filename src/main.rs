//! CLI entry point for the hazard advisor tooling.
//!
//! Provides subcommands for building and versioning hazard/route packs,
//! resolving hazards for a route the way a device would, inspecting packs,
//! and uploading pack versions to S3.

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use hazard_advisor::{
    clock::{Clock, SystemClock},
    config::{AppConfig, DataSourceMode},
    fetch::{BasicClient, HttpClient, auth::ApiKey},
    geo::GeoPoint,
    hazards::{HazardType, classify::Classifier},
    infra::{
        assets::AssetBundle,
        backend::{BackendClient, RateLimitBackoff},
        overpass::{OsmFeatureCache, OverpassFallbackService},
    },
    ingest::{DataLayout, IngestionWorker, KEEP_VERSIONS, RetryPolicy, UpstreamFetcher},
    output::{append_record, print_json, print_pretty},
    pack::{PackStore, PackType, parse_hazards_pack, validate_hazards_pack},
    publish,
    resolve::{CameraCache, FallbackOrchestrator},
    services::InMemorySettings,
    stats::HazardStats,
};
use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "hazard_advisor")]
#[command(about = "Build, resolve and publish driving hazard packs", long_about = None)]
struct Cli {
    /// Optional JSON config file; environment variables override it
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Query the map-data service around a centre and publish a hazards pack
    BuildHazards {
        #[arg(long)]
        centre: String,

        /// CSV file to append build statistics to
        #[arg(long)]
        stats_csv: Option<String>,
    },
    /// Re-stamp a centre's routes file as a new routes pack version
    BuildRoutes {
        #[arg(long)]
        centre: String,
    },
    /// Restore a stored pack version as the current pack
    Rollback {
        #[arg(long)]
        centre: String,

        #[arg(long, default_value = "hazards")]
        pack_type: PackType,

        #[arg(long)]
        to_version: String,
    },
    /// List stored versions, newest first
    ListVersions {
        #[arg(long)]
        centre: String,

        #[arg(long, default_value = "hazards")]
        pack_type: PackType,
    },
    /// Resolve hazards for a route through the fallback tiers
    Resolve {
        /// Route as `lat,lon;lat,lon;...`
        #[arg(long, default_value = "")]
        route: String,

        #[arg(long)]
        centre: Option<String>,

        /// Corridor radius in metres
        #[arg(long, default_value_t = 120.0)]
        radius: f64,

        /// Comma-separated hazard types (default: all)
        #[arg(long)]
        types: Option<String>,

        /// Overrides the configured data source mode
        #[arg(long)]
        mode: Option<String>,
    },
    /// Validate a hazards pack file and print its statistics
    Inspect {
        #[arg(value_name = "FILE")]
        path: String,

        /// Print as JSON instead of debug output
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Upload a pack version to S3
    Publish {
        #[arg(long)]
        centre: String,

        #[arg(long, default_value = "hazards")]
        pack_type: PackType,

        /// Version to upload (default: newest stored version)
        #[arg(long)]
        version: Option<String>,

        #[arg(long)]
        s3_bucket: String,

        /// Gzip compress the pack before uploading
        #[arg(long, default_value_t = false)]
        gzip: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/hazard_advisor.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("hazard_advisor.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match cli.command {
        Commands::BuildHazards { centre, stats_csv } => {
            let worker = ingestion_worker(&config, clock)?;
            let report = match worker.build_hazards(&centre).await {
                Ok(report) => report,
                Err(e) => {
                    if let Some(path) = &stats_csv {
                        let error_stats = HazardStats::from_error(e.kind(), &e.to_string());
                        append_record(path, &error_stats)?;
                    }
                    return Err(e.into());
                }
            };
            if let (Some(path), Some(stats)) = (&stats_csv, &report.stats) {
                append_record(path, stats)?;
            }
            print_json(&report)?;
        }
        Commands::BuildRoutes { centre } => {
            let worker = ingestion_worker(&config, clock)?;
            let report = worker.build_routes(&centre).await?;
            print_json(&report)?;
        }
        Commands::Rollback {
            centre,
            pack_type,
            to_version,
        } => {
            let worker = ingestion_worker(&config, clock)?;
            let target = worker.rollback(&centre, pack_type, &to_version)?;
            info!(path = %target.display(), "Current pack replaced");
        }
        Commands::ListVersions { centre, pack_type } => {
            let worker = ingestion_worker(&config, clock)?;
            let versions = worker.list_versions(pack_type, &centre)?;
            info!(centre_id = %centre, pack_type = %pack_type, count = versions.len(), "Stored versions");
            for version in &versions {
                info!(version = %version, "Version");
            }
        }
        Commands::Resolve {
            route,
            centre,
            radius,
            types,
            mode,
        } => {
            let route = parse_route(&route)?;
            let types = parse_types(types.as_deref())?;
            let settings = Arc::new(InMemorySettings::from_config(&config));
            if let Some(mode) = mode {
                let mode: DataSourceMode = mode.parse().map_err(|e: String| anyhow!(e))?;
                settings.set_data_source_mode(mode);
            }

            let orchestrator = orchestrator(&config, clock, settings.clone())?;
            let features = orchestrator
                .resolve(&route, radius, &types, centre.as_deref())
                .await;

            info!(
                hazards = features.len(),
                fallback_used = settings.fallback_used(),
                last_error = ?settings.last_error(),
                "Resolved"
            );
            print_json(&features)?;
        }
        Commands::Inspect { path, json } => {
            let text = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            let pack = parse_hazards_pack(&text)?;
            let problems = validate_hazards_pack(&pack);
            for problem in &problems {
                warn!(problem = %problem, "Pack failed validation");
            }
            let stats = HazardStats::from_pack(&pack);
            info!(
                centre_id = %pack.centre_id,
                version = %pack.metadata.version,
                valid = problems.is_empty(),
                voice_eligible_pct = stats.voice_eligible_pct(),
                "Pack inspected"
            );
            if json {
                print_json(&stats)?;
            } else {
                print_pretty(&stats);
            }
        }
        Commands::Publish {
            centre,
            pack_type,
            version,
            s3_bucket,
            gzip,
        } => {
            let layout = DataLayout::new(&config.data_dir);
            let version = match version {
                Some(version) => version,
                None => ingestion_worker(&config, clock)?
                    .list_versions(pack_type, &centre)?
                    .into_iter()
                    .next()
                    .ok_or_else(|| anyhow!("no stored {pack_type} versions for {centre}"))?,
            };
            let object = publish::prepare_version(&layout, pack_type, &centre, &version, gzip)?;

            let aws = aws_config::load_from_env().await;
            let s3 = aws_sdk_s3::Client::new(&aws);
            info!(bucket = %s3_bucket, gzip, "S3 upload enabled");
            publish::upload(&s3, &s3_bucket, object).await?;
        }
    }

    Ok(())
}

fn ingestion_worker(config: &AppConfig, clock: Arc<dyn Clock>) -> Result<IngestionWorker<BasicClient>> {
    let layout = DataLayout::new(&config.data_dir);
    let fetcher = UpstreamFetcher::new(
        BasicClient::new(),
        config.overpass_url.as_str(),
        layout.raw_cache_dir(),
        RetryPolicy::centre_build(),
        clock.clone(),
    );
    info!(data_dir = %config.data_dir.display(), keep_versions = KEEP_VERSIONS, "Ingestion worker ready");
    Ok(IngestionWorker::new(layout, fetcher, Classifier::new()?, clock))
}

fn orchestrator(
    config: &AppConfig,
    clock: Arc<dyn Clock>,
    settings: Arc<InMemorySettings>,
) -> Result<FallbackOrchestrator> {
    let http: Arc<dyn HttpClient> = match &config.api_key {
        Some(key) => Arc::new(ApiKey::bearer(BasicClient::new(), key)?),
        None => Arc::new(BasicClient::new()),
    };
    let store = Arc::new(PackStore::new(&config.pack_store_dir, clock.clone()));
    let backend = BackendClient::new(
        http,
        &config.api_base_url,
        store.clone(),
        Arc::new(RateLimitBackoff::new(clock.clone())),
    );

    let cache_root = config.data_dir.join("cache");
    let fetcher = UpstreamFetcher::new(
        BasicClient::new(),
        config.overpass_url.as_str(),
        cache_root.join("overpass"),
        RetryPolicy::route_query(),
        clock.clone(),
    );
    let fallback = OverpassFallbackService::new(
        fetcher,
        Classifier::new()?,
        OsmFeatureCache::new(cache_root.join("osm_features"), clock.clone()),
    );

    Ok(FallbackOrchestrator::new(
        Arc::new(backend),
        Arc::new(fallback),
        store,
        AssetBundle::new(&config.assets_dir),
        CameraCache::new(cache_root.join("cameras"), clock),
        settings,
    ))
}

/// Parses `lat,lon;lat,lon;...`. Blank input is an empty route.
fn parse_route(raw: &str) -> Result<Vec<GeoPoint>> {
    raw.split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|pair| -> Result<GeoPoint> {
            let (lat, lon) = pair
                .split_once(',')
                .ok_or_else(|| anyhow!("expected lat,lon but got {pair:?}"))?;
            Ok(GeoPoint::new(lat.trim().parse()?, lon.trim().parse()?))
        })
        .collect()
}

fn parse_types(raw: Option<&str>) -> Result<BTreeSet<HazardType>> {
    match raw {
        None => Ok(HazardType::ALL.into_iter().collect()),
        Some(raw) => raw
            .split(',')
            .filter(|t| !t.trim().is_empty())
            .map(|t| t.parse::<HazardType>().map_err(|e| anyhow!(e)))
            .collect(),
    }
}
