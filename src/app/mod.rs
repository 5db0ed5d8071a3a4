pub mod bridge;
pub mod config;
pub mod initialization;
pub mod logging_system;
pub mod telemetry;

pub use bridge::TelemetryLayer;
pub use config::{Config, ConfigError, ConnectionString, LogLevel, TelemetryLevel};
pub use initialization::InitializationError;
pub use logging_system::{LoggingSystem, setup_logging_safe};
pub use telemetry::{Activity, FlushResult, Logger, TelemetryClient};

use anyhow::{Context, bail};
use clap::Parser;
use std::time::Duration;
use tracing::{info, warn};

/// Command line of the `rask-telemetry` probe.
#[derive(Parser, Debug)]
#[command(
    name = "rask-telemetry",
    version,
    about = "Sends probe telemetry to an Application Insights ingestion endpoint"
)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub config: Config,

    /// Messages to send before the first flush
    #[arg(long, default_value = "1")]
    pub count: usize,

    /// Text of the probe messages
    #[arg(long, default_value = "rask-telemetry probe")]
    pub message: String,

    /// Keep sending a heartbeat metric at this interval until Ctrl+C
    #[arg(long)]
    pub interval_ms: Option<u64>,
}

pub async fn run() -> anyhow::Result<()> {
    run_with(ProbeArgs::parse()).await
}

pub async fn run_with(args: ProbeArgs) -> anyhow::Result<()> {
    let config = args.config.resolve().context("Invalid configuration")?;
    let client = TelemetryClient::new(&config).context("Failed to create telemetry client")?;

    let bridge = config.tracing_bridge.then(|| client.tracing_layer());
    setup_logging_safe(config.log_level, bridge).context("Failed to initialize logging")?;

    info!("Starting rask-telemetry v{}", crate::VERSION);
    info!(
        "Configuration: app={}, endpoint={}, batch_size={}",
        config.app_name,
        client.publisher().ingestion_url(),
        config.batch_max_size
    );

    let logger = client.logger("probe");
    for i in 1..=args.count {
        logger.info(format!("{} #{i}", args.message))?;
    }

    let Some(interval_ms) = args.interval_ms else {
        let result = client.close().await;
        return report(&result);
    };
    if interval_ms == 0 {
        bail!("--interval-ms must be greater than 0");
    }

    client.start_publishing(config.publish_interval)?;
    info!("Sending heartbeats every {}ms. Press Ctrl+C to stop.", interval_ms);

    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl+C")?;
                info!("Shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = client.track_metric("heartbeat", 1.0) {
                    warn!("Heartbeat not queued: {}", e);
                }
            }
        }
    }

    let result = client.close().await;
    info!("rask-telemetry stopped.");
    report(&result)
}

fn report(result: &FlushResult) -> anyhow::Result<()> {
    println!("{result}");
    for error in &result.errors {
        eprintln!("  {error}");
    }
    if !result.success {
        bail!("{} batch(es) failed", result.errors.len());
    }
    Ok(())
}
