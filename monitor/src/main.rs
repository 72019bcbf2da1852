mod connect;

use anyhow::Result;
use clap::Parser;
use connect::{Inbound, Target};
use pathpal_shared::codec::FrameDecoder;
use pathpal_shared::{telemetry, Reading};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Connects to a PathPal edge and prints every reading it streams
#[derive(Parser, Debug)]
#[command(name = "pathpal-monitor")]
#[command(version)]
struct Args {
    /// TCP simulation address of the edge
    #[arg(long, default_value = "127.0.0.1:9000")]
    tcp: String,

    /// Connect over RFCOMM to this Bluetooth address instead of TCP
    #[arg(long)]
    rfcomm: Option<String>,

    /// RFCOMM channel
    #[arg(long, default_value_t = telemetry::DEFAULT_RFCOMM_CHANNEL)]
    channel: u8,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let target = match &args.rfcomm {
        Some(address) => Target::rfcomm(address, args.channel)?,
        None => Target::Tcp(args.tcp.clone()),
    };

    let mut delay = RECONNECT_DELAY;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            result = target.connect() => match result {
                Ok(stream) => {
                    info!("Connected to {}", target);
                    delay = RECONNECT_DELAY;
                    let received = tokio::select! {
                        _ = tokio::signal::ctrl_c() => break,
                        received = watch(stream) => received,
                    };
                    info!("Disconnected after {} readings", received);
                }
                Err(e) => {
                    warn!("{:#}, retrying in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(MAX_RECONNECT_DELAY);
                }
            }
        }
    }

    info!("Monitor stopped");
    Ok(())
}

/// Print readings until the stream ends; returns how many arrived
async fn watch(mut stream: Inbound) -> u64 {
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; 4096];
    let mut received = 0;

    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                decoder.extend(&buf[..n]);

                loop {
                    match decoder.decode_next() {
                        Ok(Some(reading)) => {
                            received += 1;
                            println!("{}", summarize(&reading));
                        }
                        Ok(None) => break,
                        Err(e) => debug!("Skipping bad frame: {}", e),
                    }
                }
            }
            Err(e) => {
                warn!("Read error: {}", e);
                break;
            }
        }
    }
    received
}

/// One-line human summary of a reading
fn summarize(reading: &Reading) -> String {
    let image = if reading.has_image() {
        format!("{} bytes", reading.image.len())
    } else {
        "-".to_string()
    };
    format!(
        "HR {:5.1} bpm | range {:4} cm | accel [{:6.2} {:6.2} {:6.2}] | gyro [{:6.2} {:6.2} {:6.2}] | image {}",
        reading.heart_rate,
        reading.distance_cm,
        reading.accel[0],
        reading.accel[1],
        reading.accel[2],
        reading.gyro[0],
        reading.gyro[1],
        reading.gyro[2],
        image
    )
}
