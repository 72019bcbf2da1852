mod nmea;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Prints position fixes from an NMEA GPS module on a UART
#[derive(Parser, Debug)]
#[command(name = "gps-reader")]
#[command(version)]
struct Args {
    /// Serial device
    #[arg(long, default_value = "/dev/serial0")]
    port: String,

    /// Baud rate
    #[arg(long, default_value_t = 9600)]
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

    let port = tokio_serial::new(&args.port, args.baud)
        .open_native_async()
        .with_context(|| format!("Failed to open {}", args.port))?;
    info!("Serial port {} opened at {} baud", args.port, args.baud);

    let mut reader = BufReader::new(port);
    let mut raw = Vec::with_capacity(128);

    loop {
        raw.clear();
        let n = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            read = reader.read_until(b'\n', &mut raw) => read.context("Serial read failed")?,
        };
        if n == 0 {
            warn!("Serial port closed");
            break;
        }

        // Line noise is common at startup; drop what is not text
        let line = String::from_utf8_lossy(&raw);
        if !line.starts_with('$') {
            continue;
        }

        match nmea::parse_sentence(&line) {
            Ok(Some(gga)) if gga.has_fix() => print_fix(&gga),
            Ok(Some(_)) => println!("Waiting for a valid satellite fix..."),
            Ok(None) => {}
            Err(e) => debug!("Skipping sentence: {}", e),
        }
    }

    info!("Stopped");
    Ok(())
}

fn print_fix(gga: &nmea::Gga) {
    if let Some(time) = gga.time {
        println!("Timestamp: {} UTC", time);
    }
    if let (Some(lat), Some(lon)) = (gga.latitude, gga.longitude) {
        println!("Latitude: {:.6}", lat);
        println!("Longitude: {:.6}", lon);
    }
    println!("Satellites: {} (quality {})", gga.satellites, gga.quality);
    match gga.altitude_m {
        Some(altitude) => println!("Altitude: {:.1} M", altitude),
        None => println!("Altitude: unknown"),
    }
    println!("{}", "-".repeat(20));
}
