mod aggregator;
mod config;
mod link;
mod sensors;
mod service;
mod shutdown;

use anyhow::{Context, Result};
use clap::Parser;
use config::{EdgeConfig, LinkMode};
use link::{PeerListener, RfcommListener, TcpSimListener};
use service::TelemetryService;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Multi-sensor telemetry aggregator streaming to one peer
#[derive(Parser, Debug)]
#[command(name = "pathpal-edge")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format); defaults are used without one
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Override the peer transport
    #[arg(long, value_enum)]
    link: Option<LinkMode>,

    /// Override the TCP simulation address
    #[arg(long)]
    tcp_address: Option<String>,
}

fn load_config(args: &Args) -> Result<EdgeConfig> {
    let mut config = match &args.config {
        Some(path) => EdgeConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => EdgeConfig::default(),
    };

    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }
    if let Some(mode) = args.link {
        config.link.mode = mode;
    }
    if let Some(address) = &args.tcp_address {
        config.link.tcp_address = address.clone();
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn init_tracing(level: &str) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

/// Open the configured listener. A transport that cannot be brought up is
/// logged and the device keeps sampling without a peer.
async fn open_listener(config: &EdgeConfig) -> Option<Box<dyn PeerListener>> {
    match config.link.mode {
        LinkMode::Rfcomm => match RfcommListener::register(&config.link.rfcomm()).await {
            Ok(listener) => Some(Box::new(listener)),
            Err(e) => {
                error!("[LINK] Bluetooth unavailable, running offline: {:#}", e);
                None
            }
        },
        LinkMode::Tcp => match TcpSimListener::bind(&config.link.tcp_address).await {
            Ok(listener) => {
                info!("[LINK] TCP simulation listening on {}", config.link.tcp_address);
                Some(Box::new(listener))
            }
            Err(e) => {
                error!(
                    "[LINK] Cannot listen on {}, running offline: {:#}",
                    config.link.tcp_address, e
                );
                None
            }
        },
        LinkMode::Off => {
            warn!("[LINK] Link disabled, readings will not be streamed");
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_tracing(&config.log_level);

    info!("PathPal edge starting");
    info!("  Tick: {:?}", config.tick_interval());
    info!("  Link: {:?}", config.link.mode);
    info!("  Camera: {}", if config.camera.enabled { "on" } else { "off" });

    let (trigger, shutdown) = shutdown::channel();
    let sensors = sensors::sim::sensor_bank(&config, shutdown.clone());
    let listener = open_listener(&config).await;

    let service = TelemetryService::start(sensors, listener, &config, trigger, shutdown);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("[MAIN] Shutting down");

    let aborted = service.stop().await;
    if aborted > 0 {
        warn!("[MAIN] {} task(s) aborted during shutdown", aborted);
    }
    info!("[MAIN] Stopped");
    Ok(())
}
