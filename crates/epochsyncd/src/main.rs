//! epochsyncd - synchronized epoch phase service
//!
//! Wires together:
//! - Configuration loading
//! - Clock synchronization against the configured time endpoint
//! - The epoch state machine and its tick loop
//! - NDJSON commands on stdin, responses and events on stdout
//!
//! Logs go to stderr so stdout stays machine-readable.

use anyhow::{Context, Result};
use clap::Parser;
use epochsync_config::load_config;
use epochsync_util::default_config_path;
use epochsyncd::{ControlSignal, Daemon};
use std::path::PathBuf;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// epochsyncd - Synchronized epoch phase service
#[derive(Parser, Debug)]
#[command(name = "epochsyncd")]
#[command(about = "Synchronized epoch phase transitions over NDJSON", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/epochsync/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Epoch boundary JSON file to load at startup and on SIGHUP
    #[arg(short, long, env = "EPOCHSYNC_EPOCH_FILE")]
    epoch: Option<PathBuf>,

    /// Time endpoint override (or set EPOCHSYNC_TIME_URL env var)
    #[arg(short, long, env = "EPOCHSYNC_TIME_URL")]
    time_url: Option<String>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "epochsyncd starting");

    if epochsync_util::is_mock_time_active() {
        warn!(
            local_time = %epochsync_util::format_timestamp(&epochsync_util::now()),
            "Mock time is active, local clock is shifted"
        );
    }

    let mut settings = load_config(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    if let Some(url) = &args.time_url {
        epochsync_config::parse_time_url(url)
            .map_err(anyhow::Error::msg)
            .context("Invalid --time-url")?;
        settings.clock.time_url = url.trim().to_string();
    }

    info!(
        config_path = %args.config.display(),
        time_url = %settings.clock.time_url,
        warning_count = settings.epoch.warnings.len(),
        "Configuration loaded"
    );

    let daemon = Daemon::from_settings(settings, args.epoch.clone())?;

    // Set up signal handlers
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("Failed to create SIGHUP handler")?;

    let (control_tx, control_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            let signal = tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    ControlSignal::Shutdown
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    ControlSignal::Shutdown
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP, reloading epoch file");
                    ControlSignal::Reload
                }
            };
            if control_tx.send(signal).is_err() {
                break;
            }
        }
    });

    daemon
        .run(tokio::io::stdin(), tokio::io::stdout(), control_rx)
        .await?;

    info!("Shutdown complete");
    Ok(())
}
