//! PathPal Shared Telemetry Types
//!
//! This crate provides the reading schema, the newline-delimited wire codec
//! and the lifecycle state machines shared by the edge device and its peers.

pub mod codec;
pub mod state_machine;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Fixed parameters of the telemetry pipeline
pub mod telemetry {
    /// Outbound queue capacity (newest wins beyond this)
    pub const QUEUE_CAPACITY: usize = 2;

    /// Ranging reads above this are treated as saturation and reported as 0
    pub const RANGE_CEILING_CM: u16 = 1200;

    /// Serial Port Profile UUID advertised to peers
    pub const SPP_SERVICE_UUID: u128 = 0x0000_1101_0000_1000_8000_0080_5F9B_34FB;

    /// Human-readable service name advertised over SDP
    pub const SERVICE_NAME: &str = "PathPalPi";

    /// RFCOMM channel the service listens on
    pub const DEFAULT_RFCOMM_CHANNEL: u8 = 1;

    /// Raw sample pairs kept by the heart rate window
    pub const HR_WINDOW: usize = 100;

    /// Mean amplitude below which no finger is assumed on the biosignal sensor
    pub const HR_NOISE_FLOOR: f64 = 50_000.0;
}

/// One tick's aggregate of every sensor
///
/// Every field is always present. A sensor that is missing or failed
/// contributes its neutral value: zero, or an empty image.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Reading {
    /// Beats per minute, 0 when no contact or no confident estimate
    pub heart_rate: f32,
    /// Range to the nearest obstacle in centimetres
    pub distance_cm: u16,
    /// Acceleration in m/s^2 (x, y, z)
    pub accel: [f32; 3],
    /// Angular rate in rad/s (x, y, z)
    pub gyro: [f32; 3],
    /// Raw camera capture, transported as base64 text
    #[serde(with = "image_base64", default)]
    pub image: Bytes,
}

impl Reading {
    /// A reading with every field at its neutral value
    pub fn neutral() -> Self {
        Self::default()
    }

    /// Whether this tick carries a camera capture
    pub fn has_image(&self) -> bool {
        !self.image.is_empty()
    }
}

mod image_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(image: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(image))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD
            .decode(text.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
