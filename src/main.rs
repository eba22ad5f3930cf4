//! # ELRS Link
//!
//! Drive an ExpressLRS transmitter module over serial from the command line.
//!
//! Opens the module, streams the current channel set at the cadence the baud
//! rate calls for, and reports link counters until Ctrl+C. On shutdown the
//! module is sent failsafe before the port closes.

use anyhow::{anyhow, Context, Result};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use elrs_link::config::{Config, TelemetryConfig};
use elrs_link::link::session::{InitStatus, LinkSession};
use elrs_link::serial::{SerialTransport, Transport};
use elrs_link::telemetry::logger::{TelemetryLogger, TelemetryRecord};
use elrs_link::telemetry::monitor::TelemetryCallbacks;

/// CRSF link supervisor for ExpressLRS transmitter modules
#[derive(Parser, Debug)]
#[command(name = "elrs-link", version, about)]
struct Cli {
    /// Serial device of the transmitter module, e.g. /dev/ttyUSB0
    #[arg(long)]
    tx_port: Option<String>,

    /// Baud rate of the module [default: 921600, or the config file value]
    #[arg(long)]
    tx_baud: Option<u32>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

/// Install the stdout subscriber, plus a non-blocking file writer if asked.
///
/// The returned guard flushes the file writer when dropped.
fn init_logging(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let file_name = path
                .file_name()
                .ok_or_else(|| anyhow!("--log-file needs a file name: {}", path.display()))?;
            let dir = match path.parent() {
                Some(dir) if !dir.as_os_str().is_empty() => dir,
                _ => Path::new("."),
            };
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Callbacks that log routed telemetry and, when enabled, record it
fn telemetry_callbacks(config: &TelemetryConfig) -> Result<TelemetryCallbacks> {
    let recorder = if config.enabled {
        let logger = TelemetryLogger::new(
            &config.log_dir,
            config.max_records_per_file,
            config.max_files_to_keep,
        )
        .with_context(|| {
            format!("Failed to open telemetry log dir {}", config.log_dir.display())
        })?;
        Some(Arc::new(Mutex::new(logger)))
    } else {
        None
    };

    let record = move |record: TelemetryRecord| {
        let Some(recorder) = &recorder else {
            return;
        };
        let mut logger = recorder.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = logger.log(record) {
            warn!("Failed to record telemetry: {}", e);
        }
    };

    let callbacks = TelemetryCallbacks::new()
        .on_link_stats({
            let record = record.clone();
            move |stats| {
                debug!(
                    rssi = stats.uplink_rssi_1,
                    lq = stats.uplink_lq,
                    snr = stats.uplink_snr,
                    "Link statistics"
                );
                record(TelemetryRecord::LinkStats(stats));
            }
        })
        .on_battery({
            let record = record.clone();
            move |battery| {
                debug!(voltage = battery.voltage, remaining = battery.remaining_percent, "Battery");
                record(TelemetryRecord::Battery(battery));
            }
        })
        .on_gps({
            let record = record.clone();
            move |gps| {
                debug!(lat = gps.latitude, lon = gps.longitude, sats = gps.satellites, "GPS");
                record(TelemetryRecord::Gps(gps));
            }
        })
        .on_attitude(move |attitude| {
            debug!(pitch = attitude.pitch, roll = attitude.roll, yaw = attitude.yaw, "Attitude");
            record(TelemetryRecord::Attitude(attitude));
        });

    Ok(callbacks)
}

/// Log counters on an interval until Ctrl+C
async fn report_until_ctrl_c<T: Transport>(session: &LinkSession<T>, every: Duration) {
    let mut status = interval_at(Instant::now() + every, every);

    loop {
        tokio::select! {
            _ = status.tick() => {
                let stats = session.link().counters();
                info!(
                    sent = stats.sent,
                    received = stats.received,
                    errors = stats.errors,
                    queued = session.link().telemetry().total_len(),
                    "Link status"
                );
            }

            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => info!("Received Ctrl+C, shutting down..."),
                    Err(e) => warn!("Could not listen for Ctrl+C ({}), shutting down...", e),
                }
                return;
            }
        }
    }
}

/// Main entry point for ELRS Link
///
/// Exits with status 2 when no port is given and 1 when the link cannot be
/// brought up.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.log_file.as_deref())?;

    info!("ELRS Link v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };

    let port = cli
        .tx_port
        .clone()
        .filter(|port| !port.is_empty())
        .or_else(|| Some(config.serial.port.clone()).filter(|port| !port.is_empty()));
    let Some(port) = port else {
        Cli::command()
            .error(
                ErrorKind::MissingRequiredArgument,
                "no transmitter port: pass --tx-port or set [serial] port in the config file",
            )
            .exit();
    };
    let baud_rate = cli.tx_baud.unwrap_or(config.serial.baud_rate);

    let callbacks = telemetry_callbacks(&config.telemetry)?;
    let session = match LinkSession::open(
        SerialTransport,
        &port,
        baud_rate,
        config.link.handshake_timeout(),
        callbacks,
    )
    .await
    {
        Ok(session) => session.with_shutdown_grace(config.link.shutdown_grace()),
        Err(e) => {
            let status = InitStatus::from(&e);
            return Err(anyhow!(e).context(format!(
                "Could not bring up link on {} (status {:?}, code {})",
                port,
                status,
                status.code()
            )));
        }
    };

    info!("Link up on {} @ {} baud. Press Ctrl+C to exit", port, baud_rate);
    report_until_ctrl_c(&session, config.link.status_log_interval()).await;

    session.close().await.context("Link stopped with an error")?;
    info!("Shutdown complete");
    Ok(())
}
