//! Simulated drivers
//!
//! Stand-ins for the PPG, ranging, inertial and camera hardware so the
//! service can run on a host without any sensors attached. Each driver fails
//! now and then so the slot lifecycle gets exercised.

use super::{
    Clamped, HeartRateSensor, ImuSample, PpgDevice, PpgSample, SensorDriver, SensorError,
    SensorKind, SensorSlot,
};
use crate::aggregator::SensorBank;
use crate::config::EdgeConfig;
use crate::shutdown::Shutdown;
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use pathpal_shared::state_machine::RetryPolicy;
use rand::Rng;
use std::f64::consts::PI;
use std::time::Instant;

/// Probability that one acquisition fails
const ACQUIRE_FAILURE_RATE: f64 = 0.05;
/// Probability that one read fails
const READ_FAILURE_RATE: f64 = 0.01;

fn dropout(rate: f64) -> bool {
    rand::thread_rng().gen_bool(rate)
}

fn simulated_failure() -> SensorError {
    SensorError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        "simulated dropout",
    ))
}

fn acquire_or_fail() -> Result<(), SensorError> {
    if dropout(ACQUIRE_FAILURE_RATE) {
        Err(SensorError::NotPresent)
    } else {
        Ok(())
    }
}

fn read_or_fail() -> Result<(), SensorError> {
    if dropout(READ_FAILURE_RATE) {
        Err(simulated_failure())
    } else {
        Ok(())
    }
}

/// Build a full sensor bank from simulated drivers
pub fn sensor_bank(config: &EdgeConfig, shutdown: Shutdown) -> SensorBank {
    let timeout = config.read_timeout();

    let heart_rate = SensorSlot::new(
        HeartRateSensor::new(
            SimPpg::new(config.heart_rate.sample_rate_hz),
            config.heart_rate_settings(),
            shutdown,
        ),
        RetryPolicy::every(config.heart_rate.retry_every_ticks),
        timeout,
    );

    let ranging = SensorSlot::new(
        Clamped::new(SimRanging, config.ranging.ceiling_cm),
        RetryPolicy::every(config.ranging.retry_every_ticks),
        timeout,
    );

    let inertial = SensorSlot::new(
        SimImu,
        RetryPolicy::every(config.inertial.retry_every_ticks),
        timeout,
    );

    let mut bank = SensorBank::new(Box::new(heart_rate), Box::new(ranging), Box::new(inertial));
    if config.camera.enabled {
        bank = bank.with_camera(Box::new(SensorSlot::new(
            SimCamera,
            RetryPolicy::every(config.camera.retry_every_ticks),
            timeout,
        )));
    }
    bank
}

/// PPG trace generator: a pulse on top of a finger-contact baseline
pub struct SimPpg {
    sample_rate_hz: f32,
}

impl SimPpg {
    pub fn new(sample_rate_hz: f32) -> Self {
        Self { sample_rate_hz }
    }
}

/// Open simulated PPG device
pub struct SimPpgState {
    started: Instant,
    emitted: u64,
    bpm: f64,
}

impl SimPpgState {
    fn sample(&self, index: u64, sample_rate_hz: f64) -> PpgSample {
        let t = index as f64 / sample_rate_hz;
        let pulse = (2.0 * PI * self.bpm / 60.0 * t).sin();
        let noise: f64 = rand::thread_rng().gen_range(-15.0..15.0);
        PpgSample {
            red: (90_000.0 + 200.0 * pulse + noise) as u32,
            ir: (110_000.0 + 300.0 * pulse + noise) as u32,
        }
    }
}

#[async_trait]
impl PpgDevice for SimPpg {
    type Device = SimPpgState;

    async fn open(&self) -> Result<SimPpgState, SensorError> {
        acquire_or_fail()?;
        let bpm = rand::thread_rng().gen_range(60.0..100.0);
        Ok(SimPpgState {
            started: Instant::now(),
            emitted: 0,
            bpm,
        })
    }

    async fn read_fifo(&self, device: &mut SimPpgState) -> Result<Vec<PpgSample>, SensorError> {
        read_or_fail()?;
        let rate = f64::from(self.sample_rate_hz);
        let due = (device.started.elapsed().as_secs_f64() * rate) as u64;
        let batch = (device.emitted..due).map(|i| device.sample(i, rate)).collect();
        device.emitted = due.max(device.emitted);
        Ok(batch)
    }
}

/// Rangefinder returning uniform distances, some past the ceiling
pub struct SimRanging;

#[async_trait]
impl SensorDriver for SimRanging {
    type Handle = ();
    type Value = u16;

    fn kind(&self) -> SensorKind {
        SensorKind::Ranging
    }

    async fn acquire(&self) -> Result<(), SensorError> {
        acquire_or_fail()
    }

    async fn read(&self, _handle: &mut ()) -> Result<u16, SensorError> {
        read_or_fail()?;
        Ok(rand::thread_rng().gen_range(20..=1500))
    }
}

/// Inertial unit at rest with a little jitter
pub struct SimImu;

#[async_trait]
impl SensorDriver for SimImu {
    type Handle = ();
    type Value = ImuSample;

    fn kind(&self) -> SensorKind {
        SensorKind::Inertial
    }

    async fn acquire(&self) -> Result<(), SensorError> {
        acquire_or_fail()
    }

    async fn read(&self, _handle: &mut ()) -> Result<ImuSample, SensorError> {
        read_or_fail()?;
        let mut rng = rand::thread_rng();
        let mut jitter = |scale: f32| rng.gen_range(-scale..scale);
        Ok(ImuSample {
            accel: [jitter(0.2), jitter(0.2), 9.81 + jitter(0.2)],
            gyro: [jitter(0.05), jitter(0.05), jitter(0.05)],
        })
    }
}

/// Camera producing small JPEG-framed payloads
pub struct SimCamera;

#[async_trait]
impl SensorDriver for SimCamera {
    type Handle = ();
    type Value = Bytes;

    fn kind(&self) -> SensorKind {
        SensorKind::Camera
    }

    async fn acquire(&self) -> Result<(), SensorError> {
        acquire_or_fail()
    }

    async fn read(&self, _handle: &mut ()) -> Result<Bytes, SensorError> {
        read_or_fail()?;
        Ok(fake_jpeg(2048))
    }
}

/// SOI marker, random body, EOI marker
fn fake_jpeg(body_len: usize) -> Bytes {
    let mut rng = rand::thread_rng();
    let mut buf = BytesMut::with_capacity(body_len + 4);
    buf.put_slice(&[0xFF, 0xD8]);
    buf.extend((0..body_len).map(|_| rng.gen::<u8>()));
    buf.put_slice(&[0xFF, 0xD9]);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fake_jpeg_markers() {
        let image = fake_jpeg(16);
        assert_eq!(image.len(), 20);
        assert_eq!(&image[..2], &[0xFF, 0xD8]);
        assert_eq!(&image[18..], &[0xFF, 0xD9]);
    }

    #[tokio::test]
    async fn test_ppg_emits_at_sample_rate() {
        let ppg = SimPpg::new(100.0);
        let mut device = SimPpgState {
            started: Instant::now(),
            emitted: 0,
            bpm: 72.0,
        };

        tokio::time::sleep(Duration::from_millis(120)).await;
        // Reads can fail at random; retry until one lands
        let mut batch = Vec::new();
        for _ in 0..20 {
            if let Ok(b) = ppg.read_fifo(&mut device).await {
                batch = b;
                break;
            }
        }
        assert!(batch.len() >= 10, "got {} samples", batch.len());
        assert!(batch.iter().all(|s| s.ir > 100_000));
    }

    #[test]
    fn test_bank_omits_disabled_camera() {
        let (_trigger, shutdown) = crate::shutdown::channel();
        let config = EdgeConfig::default();
        let bank = sensor_bank(&config, shutdown);
        assert!(!bank.has_camera());
    }
}
