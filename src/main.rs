//! # Fleet Track
//!
//! Vehicle GPS tracking service.
//!
//! Reads NMEA fixes from serial GPS receivers and JSON measurements from an
//! MQTT broker, keeps the most recent trajectory of every vehicle and pushes
//! each update to connected viewers.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use fleet_track::bus;
use fleet_track::config::{Config, LoggingConfig};
use fleet_track::context::TrackerContext;
use fleet_track::position::VehicleId;
use fleet_track::serial::port_trait::TokioSerialOpener;
use fleet_track::serial::snapshot::{DeviceInfo, FileSnapshotSink};
use fleet_track::serial::{forward_events, GpsLink};

/// Configuration file used when `--config` is not given
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// File name prefix of rolled log files
const LOG_FILE_PREFIX: &str = "fleet-track.log";

/// Period of the status log line
const STATUS_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Parser)]
#[command(name = "fleet-track", version, about = "Vehicle GPS tracking service")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

type TaskSet = JoinSet<fleet_track::error::Result<()>>;

/// Install the tracing subscriber
///
/// `RUST_LOG` takes precedence over `logging.level`. The returned guard must
/// live until exit so buffered file output gets flushed.
fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .with_context(|| format!("Invalid log level '{}'", config.level))?;

    match &config.log_dir {
        Some(dir) => {
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX));
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            Ok(None)
        }
    }
}

/// Spawn one link and its forwarder per configured receiver
fn spawn_serial_links(config: &Config, ctx: &TrackerContext, tasks: &mut TaskSet, cancel: &CancellationToken) -> Result<()> {
    for device in &config.serial.devices {
        let vehicle: VehicleId = device
            .vehicle_id
            .parse()
            .with_context(|| format!("Invalid vehicle id for {}", device.port))?;

        let (tx, rx) = mpsc::channel(config.serial.event_queue_capacity);
        let link = GpsLink::new(
            TokioSerialOpener::new(&device.port, device.baud_rate),
            FileSnapshotSink::new(&device.live_snapshot_path, device.nmea_log_path.as_ref().map(PathBuf::from)),
            DeviceInfo::from(device),
            tx,
            Duration::from_millis(config.serial.reconnect_interval_ms),
        );

        info!("GPS receiver {} at {} baud reports as {}", device.port, device.baud_rate, vehicle);
        tasks.spawn(link.run(cancel.clone()));
        tokio::spawn(forward_events(vehicle, rx, ctx.store.clone(), ctx.fanout.clone()));
    }
    Ok(())
}

/// Resolve with the first task that fails; pending forever otherwise
async fn first_failure(tasks: &mut TaskSet) -> Result<()> {
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => return Err(anyhow::Error::new(e).context("Ingestion task failed")),
            Err(e) => return Err(anyhow::Error::new(e).context("Ingestion task panicked")),
        }
    }
    std::future::pending().await
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;
    let _log_guard = init_logging(&config.logging)?;

    info!("Fleet Track v{} starting...", env!("CARGO_PKG_VERSION"));

    let ctx = TrackerContext::from_config(&config);
    let cancel = CancellationToken::new();
    let mut tasks = TaskSet::new();

    spawn_serial_links(&config, &ctx, &mut tasks, &cancel)?;

    if config.bus.enabled {
        let bus_config = config.bus.clone();
        let listener = ctx.ingest_listener();
        let token = cancel.clone();
        tasks.spawn(async move { bus::client::run(&bus_config, listener, token).await });
    }

    if tasks.is_empty() {
        warn!("No GPS receivers configured and the message bus is disabled");
    }

    info!("Press Ctrl+C to exit");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut status = interval(STATUS_INTERVAL);

    let outcome = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Received Ctrl+C, shutting down...");
                break Ok(());
            }
            failure = first_failure(&mut tasks) => break failure,
            _ = status.tick() => {
                info!(
                    "Tracking {} vehicle(s), {} viewer(s) connected",
                    ctx.store.list_vehicles().len(),
                    ctx.fanout.viewer_count()
                );
            }
        }
    };

    cancel.cancel();
    while let Some(joined) = tasks.join_next().await {
        if let Ok(Err(e)) = joined {
            warn!("Task ended with error during shutdown: {}", e);
        }
    }

    info!("Fleet Track stopped");
    outcome
}
