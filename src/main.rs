//! CLI entry point for the granularity fusion engine.
//!
//! Loads the configured sources into an in-memory store, builds the
//! granularity maps and either runs the periodic sweep or a single conversion.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use granularity_fuse::config::FusionConfig;
use granularity_fuse::fetch::BasicClient;
use granularity_fuse::fuse::{Clock, FixedClock, FuseEngine, Scheduler, SystemClock};
use granularity_fuse::geometry::GeometryKernel;
use granularity_fuse::publish::{
    CsvPublisher, FanoutPublisher, LogPublisher, Publisher, S3Publisher,
};
use granularity_fuse::store::{InMemoryStore, loader::load_sources, parse_timestamp};
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "granularity_fuse")]
#[command(about = "Converts observations between spatial and temporal granularities", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the periodic aggregation sweep
    Run {
        /// Path to the JSON configuration
        #[arg(short, long, default_value = "fuse.json")]
        config: String,

        /// Override the configured sweep period, in seconds
        #[arg(short, long)]
        period_secs: Option<u64>,

        /// Directory to append per-feature-type CSVs to
        #[arg(short, long)]
        output_dir: Option<String>,

        /// Optional: S3 bucket to upload each collection to as JSON
        #[arg(long)]
        s3_bucket: Option<String>,

        /// Key prefix for S3 uploads
        #[arg(long, default_value = "aggregates")]
        s3_prefix: String,

        /// Optional: Gzip compress JSON before uploading to S3
        #[arg(long, default_value_t = false)]
        gzip: bool,

        /// Number of sweeps to run (0 = until Ctrl+C)
        #[arg(short = 'n', long, default_value_t = 0)]
        sweeps: u64,
    },
    /// Convert one feature type once and print or append the result
    Convert {
        #[arg(short, long, default_value = "fuse.json")]
        config: String,

        /// Feature type to convert
        #[arg(short, long)]
        feature_type: String,

        /// Reference time ending the window (defaults to now)
        #[arg(long)]
        at: Option<String>,

        /// CSV file to append results to instead of logging JSON
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Build and log the spatial relation maps
    Maps {
        #[arg(short, long, default_value = "fuse.json")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/granularity_fuse.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("granularity_fuse.log"));

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

    match cli.command {
        Commands::Run {
            config,
            period_secs,
            output_dir,
            s3_bucket,
            s3_prefix,
            gzip,
            sweeps,
        } => {
            let config = FusionConfig::load(&config)?;
            let publisher = build_publisher(output_dir, s3_bucket, &s3_prefix, gzip).await;
            let engine = build_engine(&config, Arc::new(SystemClock), publisher).await?;

            let period = period_secs.unwrap_or(config.schedule.period_secs);
            if period == 0 {
                bail!("sweep period must be at least one second");
            }
            run(engine, Duration::from_secs(period), config, sweeps).await?;
        }
        Commands::Convert {
            config,
            feature_type,
            at,
            output,
        } => {
            let config = FusionConfig::load(&config)?;
            let clock: Arc<dyn Clock> = match at {
                Some(raw) => {
                    let reference = parse_timestamp(&raw)
                        .with_context(|| format!("invalid --at timestamp '{raw}'"))?;
                    Arc::new(FixedClock(reference))
                }
                None => Arc::new(SystemClock),
            };
            let engine = build_engine(&config, clock, Arc::new(LogPublisher)).await?;

            let collection = engine.convert(&feature_type).await?;
            match output {
                Some(path) => {
                    granularity_fuse::publish::append_collection(Path::new(&path), &collection)?;
                    info!(path, features = collection.features.len(), "Collection appended");
                }
                None => LogPublisher.publish(&collection).await?,
            }
        }
        Commands::Maps { config } => {
            let config = FusionConfig::load(&config)?;
            let engine = build_engine(&config, Arc::new(SystemClock), Arc::new(LogPublisher)).await?;

            for (feature_type, map) in &engine.snapshot().maps {
                info!(
                    feature_type = %feature_type,
                    base_granularity = %map.base_spatial_granularity,
                    target_granularity = %map.target_spatial_granularity,
                    window_hours = map.temporal.relation_value,
                    targets = map.spatial.len(),
                    "Granularity map"
                );
                info!("{}", serde_json::to_string_pretty(map.as_ref())?);
            }
        }
    }

    Ok(())
}

/// Loads every configured source into a fresh store and builds the map table.
#[tracing::instrument(skip_all)]
async fn build_engine(
    config: &FusionConfig,
    clock: Arc<dyn Clock>,
    publisher: Arc<dyn Publisher>,
) -> Result<Arc<FuseEngine>> {
    let client = BasicClient::new()?;
    let store = InMemoryStore::new();
    let loaded = load_sources(&client, &store, &config.sources).await?;
    info!(sources = loaded.len(), "Sources loaded");

    let engine = FuseEngine::new(
        Arc::new(store),
        Arc::new(GeometryKernel::new(config.distance_metric)),
        clock,
        publisher,
    );
    let maps = engine
        .reconfigure(config.relation_configs(), config.aggregation_configs())
        .await;
    if maps == 0 {
        warn!("No granularity relations configured");
    }
    Ok(Arc::new(engine))
}

async fn build_publisher(
    output_dir: Option<String>,
    s3_bucket: Option<String>,
    s3_prefix: &str,
    gzip: bool,
) -> Arc<dyn Publisher> {
    let mut publishers: Vec<Arc<dyn Publisher>> = Vec::new();

    if let Some(dir) = output_dir {
        info!(output_dir = %dir, "CSV output enabled");
        publishers.push(Arc::new(CsvPublisher::new(dir)));
    }
    if let Some(bucket) = s3_bucket {
        let config = aws_config::load_from_env().await;
        info!(bucket = %bucket, prefix = s3_prefix, gzip, "S3 upload enabled");
        publishers.push(Arc::new(
            S3Publisher::new(aws_sdk_s3::Client::new(&config), &bucket, gzip)
                .with_prefix(s3_prefix),
        ));
    }
    if publishers.is_empty() {
        info!("No output configured, logging collections");
        publishers.push(Arc::new(LogPublisher));
    }
    Arc::new(FanoutPublisher::new(publishers))
}

/// Drives the scheduler until `sweeps` complete or Ctrl+C.
#[tracing::instrument(skip(engine, config), fields(period_secs = period.as_secs()))]
async fn run(
    engine: Arc<FuseEngine>,
    period: Duration,
    config: FusionConfig,
    sweeps: u64,
) -> Result<()> {
    let scheduler = Scheduler::start(engine, period, config.schedule.overlap);

    if sweeps == 0 {
        info!("Sweeping until Ctrl+C");
        tokio::signal::ctrl_c().await?;
    } else {
        tokio::select! {
            _ = scheduler.wait_for_sweeps(sweeps) => {}
            result = tokio::signal::ctrl_c() => result?,
        }
    }

    let completed = scheduler.stop().await;
    info!(completed, "Finished");
    Ok(())
}
