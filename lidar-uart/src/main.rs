mod frame;

use anyhow::{Context, Result};
use clap::Parser;
use frame::FrameParser;
use tokio::io::AsyncReadExt;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Prints distance and signal strength from a ranging sensor on a UART
#[derive(Parser, Debug)]
#[command(name = "lidar-uart")]
#[command(version)]
struct Args {
    /// Serial device
    #[arg(long, default_value = "/dev/serial0")]
    port: String,

    /// Baud rate
    #[arg(long, default_value_t = 115_200)]
    baud: u32,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let mut port = tokio_serial::new(&args.port, args.baud)
        .open_native_async()
        .with_context(|| format!("Failed to open {}", args.port))?;
    info!("Reading frames from {} at {} baud", args.port, args.baud);

    let mut parser = FrameParser::new();
    let mut buf = [0u8; 64];

    loop {
        let n = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            read = port.read(&mut buf) => read.context("Serial read failed")?,
        };
        if n == 0 {
            warn!("Serial port closed");
            break;
        }

        for &byte in &buf[..n] {
            match parser.push(byte) {
                Some(Ok(frame)) => {
                    println!(
                        "Distance: {} cm | Strength: {} | Temp: {:.1} C{}",
                        frame.distance_cm,
                        frame.strength,
                        frame.temperature_c,
                        if frame.is_reliable() { "" } else { " (weak)" }
                    );
                }
                Some(Err(e)) => debug!("Dropped frame: {}", e),
                None => {}
            }
        }
    }

    info!("Stopped");
    Ok(())
}
