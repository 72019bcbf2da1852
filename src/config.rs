//! Runtime configuration
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working device. Files are JSON5 so they can carry comments.

use clap::ValueEnum;
use pathpal_shared::telemetry;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::link::{LinkSettings, RfcommConfig};
use crate::sensors::HeartRateSettings;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete edge device configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EdgeConfig {
    /// Aggregation cadence
    pub tick_ms: u64,
    /// Ticks between status lines
    pub status_every_ticks: u64,
    /// Upper bound on any single driver call
    pub read_timeout_ms: u64,
    /// Bounded wait when joining background tasks on stop
    pub shutdown_timeout_ms: u64,
    /// Default log filter when RUST_LOG is unset
    pub log_level: String,
    pub heart_rate: HeartRateConfig,
    pub ranging: RangingConfig,
    pub inertial: InertialConfig,
    pub camera: CameraConfig,
    pub link: LinkConfig,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            tick_ms: 200,
            status_every_ticks: 25, // every 5 s at the default cadence
            read_timeout_ms: 150,
            shutdown_timeout_ms: 2000,
            log_level: "info".into(),
            heart_rate: HeartRateConfig::default(),
            ranging: RangingConfig::default(),
            inertial: InertialConfig::default(),
            camera: CameraConfig::default(),
            link: LinkConfig::default(),
        }
    }
}

/// Biosignal (MAX30102-class) sensor settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeartRateConfig {
    pub retry_every_ticks: u32,
    /// FIFO drain period of the background sampler
    pub sample_interval_ms: u64,
    /// Rolling window length in sample pairs
    pub window: usize,
    /// Rate at which the device fills its FIFO
    pub sample_rate_hz: f32,
    /// Mean amplitude below which no contact is assumed
    pub noise_floor: f64,
}

impl Default for HeartRateConfig {
    fn default() -> Self {
        Self {
            retry_every_ticks: 5,
            sample_interval_ms: 10,
            window: telemetry::HR_WINDOW,
            sample_rate_hz: 25.0,
            noise_floor: telemetry::HR_NOISE_FLOOR,
        }
    }
}

/// Time-of-flight ranging sensor settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RangingConfig {
    pub retry_every_ticks: u32,
    /// Reads above this are saturation and reported as 0
    pub ceiling_cm: u16,
}

impl Default for RangingConfig {
    fn default() -> Self {
        Self {
            retry_every_ticks: 1,
            ceiling_cm: telemetry::RANGE_CEILING_CM,
        }
    }
}

/// Inertial measurement unit settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InertialConfig {
    /// Failed probes stall the shared I2C bus, so back off
    pub retry_every_ticks: u32,
}

impl Default for InertialConfig {
    fn default() -> Self {
        Self {
            retry_every_ticks: 10,
        }
    }
}

/// Camera settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub enabled: bool,
    pub retry_every_ticks: u32,
    /// Capture on every Kth tick only
    pub capture_every_ticks: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            retry_every_ticks: 25,
            capture_every_ticks: 10,
        }
    }
}

/// Transport used to reach the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LinkMode {
    /// Real RFCOMM Bluetooth (requires BlueZ)
    #[default]
    Rfcomm,
    /// TCP simulation (for development)
    Tcp,
    /// No transport; sensors are still sampled and logged
    Off,
}

/// Peer link settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub mode: LinkMode,
    pub service_name: String,
    pub channel: u8,
    /// TCP simulation bind address (when mode is tcp)
    pub tcp_address: String,
    /// Sender wakeup period while the queue is empty
    pub poll_timeout_ms: u64,
    pub write_timeout_ms: u64,
    /// Acceptor liveness check period while a peer is attached
    pub liveness_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            mode: LinkMode::Rfcomm,
            service_name: telemetry::SERVICE_NAME.into(),
            channel: telemetry::DEFAULT_RFCOMM_CHANNEL,
            tcp_address: "127.0.0.1:9000".into(),
            poll_timeout_ms: 100,
            write_timeout_ms: 2000,
            liveness_ms: 1000,
        }
    }
}

impl LinkConfig {
    pub fn rfcomm(&self) -> RfcommConfig {
        RfcommConfig {
            service_name: self.service_name.clone(),
            channel: self.channel,
        }
    }

    pub fn settings(&self) -> LinkSettings {
        LinkSettings {
            queue_capacity: telemetry::QUEUE_CAPACITY,
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            liveness: Duration::from_millis(self.liveness_ms),
        }
    }
}

impl EdgeConfig {
    /// Load configuration from a JSON5 file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json5(&text)
    }

    /// Parse and validate configuration text
    pub fn from_json5(text: &str) -> Result<Self, ConfigError> {
        let config: Self = json5::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the loops cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("tick_ms", self.tick_ms),
            ("status_every_ticks", self.status_every_ticks),
            ("read_timeout_ms", self.read_timeout_ms),
            ("heart_rate.sample_interval_ms", self.heart_rate.sample_interval_ms),
            ("camera.capture_every_ticks", self.camera.capture_every_ticks),
            ("link.poll_timeout_ms", self.link.poll_timeout_ms),
            ("link.write_timeout_ms", self.link.write_timeout_ms),
            ("link.liveness_ms", self.link.liveness_ms),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Validation(format!("{} must be greater than 0", name)));
        }

        if self.heart_rate.window < 8 {
            return Err(ConfigError::Validation(format!(
                "heart_rate.window must be at least 8 (got {})",
                self.heart_rate.window
            )));
        }

        if self.heart_rate.sample_rate_hz <= 0.0 {
            return Err(ConfigError::Validation(
                "heart_rate.sample_rate_hz must be positive".into(),
            ));
        }

        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn heart_rate_settings(&self) -> HeartRateSettings {
        HeartRateSettings {
            sample_interval: Duration::from_millis(self.heart_rate.sample_interval_ms),
            window: self.heart_rate.window,
            sample_rate_hz: self.heart_rate.sample_rate_hz,
            noise_floor: self.heart_rate.noise_floor,
            read_timeout: self.read_timeout(),
        }
    }
}
