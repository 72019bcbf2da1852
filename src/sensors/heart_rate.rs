//! Heart Rate Sensor
//!
//! The PPG device fills its FIFO far faster than the aggregator ticks, so
//! acquisition spawns a background sampler that drains the FIFO into a
//! rolling window and republishes beats-per-minute after every batch. The
//! slot reads the last published value; dropping the slot's handle stops the
//! sampler and discards its window.

use super::{SensorDriver, SensorError, SensorKind};
use crate::shutdown::Shutdown;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Smoothing width applied before peak detection
const MOVING_AVERAGE: usize = 4;
/// Minimum spacing between two accepted peaks, in samples
const MIN_PEAK_DISTANCE: usize = 4;
/// At most this many peaks are used for the interval estimate
const MAX_PEAKS: usize = 15;
/// Peak height threshold bounds (after mean removal)
const MIN_THRESHOLD: f64 = 30.0;
const MAX_THRESHOLD: f64 = 60.0;
/// Physiologically plausible range
const MIN_BPM: f32 = 30.0;
const MAX_BPM: f32 = 240.0;

/// One red/infrared sample pair from the PPG FIFO
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PpgSample {
    pub red: u32,
    pub ir: u32,
}

/// Boundary to a PPG (MAX30102-class) device
#[async_trait]
pub trait PpgDevice: Send + Sync + 'static {
    /// Open device state, dropped to shut the device down
    type Device: Send + 'static;

    /// Open and configure the device
    async fn open(&self) -> Result<Self::Device, SensorError>;

    /// Drain every sample currently in the FIFO (possibly none)
    async fn read_fifo(&self, device: &mut Self::Device) -> Result<Vec<PpgSample>, SensorError>;
}

/// Sampler tuning
#[derive(Debug, Clone)]
pub struct HeartRateSettings {
    /// FIFO drain period
    pub sample_interval: Duration,
    /// Rolling window length in sample pairs
    pub window: usize,
    /// Rate at which the device produces samples
    pub sample_rate_hz: f32,
    /// Mean amplitude below which no contact is assumed
    pub noise_floor: f64,
    /// Upper bound on one FIFO read
    pub read_timeout: Duration,
}

/// Values published by the sampler, read by the slot
#[derive(Debug, Default)]
struct Published {
    bpm_bits: AtomicU32,
    stopped: AtomicBool,
}

impl Published {
    fn set_bpm(&self, bpm: f32) {
        self.bpm_bits.store(bpm.to_bits(), Ordering::Release);
    }

    fn bpm(&self) -> f32 {
        f32::from_bits(self.bpm_bits.load(Ordering::Acquire))
    }
}

/// Handle to a running sampler; dropping it stops the sampler
pub struct SamplerHandle {
    task: JoinHandle<()>,
    published: Arc<Published>,
}

impl Drop for SamplerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Heart rate slot driver backed by a PPG device
pub struct HeartRateSensor<P: PpgDevice> {
    device: Arc<P>,
    settings: HeartRateSettings,
    shutdown: Shutdown,
}

impl<P: PpgDevice> HeartRateSensor<P> {
    pub fn new(device: P, settings: HeartRateSettings, shutdown: Shutdown) -> Self {
        Self {
            device: Arc::new(device),
            settings,
            shutdown,
        }
    }
}

#[async_trait]
impl<P: PpgDevice> SensorDriver for HeartRateSensor<P> {
    type Handle = SamplerHandle;
    type Value = f32;

    fn kind(&self) -> SensorKind {
        SensorKind::HeartRate
    }

    async fn acquire(&self) -> Result<SamplerHandle, SensorError> {
        let device = self.device.open().await?;
        let published = Arc::new(Published::default());

        let task = tokio::spawn(run_sampler(
            self.device.clone(),
            device,
            published.clone(),
            self.settings.clone(),
            self.shutdown.clone(),
        ));

        Ok(SamplerHandle { task, published })
    }

    async fn read(&self, handle: &mut SamplerHandle) -> Result<f32, SensorError> {
        if handle.published.stopped.load(Ordering::Acquire) || handle.task.is_finished() {
            return Err(SensorError::SamplerStopped("FIFO no longer readable".into()));
        }
        Ok(handle.published.bpm())
    }
}

/// Background sampling loop; owns the device and the window
async fn run_sampler<P: PpgDevice>(
    ppg: Arc<P>,
    mut device: P::Device,
    published: Arc<Published>,
    settings: HeartRateSettings,
    shutdown: Shutdown,
) {
    let mut window = SampleWindow::new(settings.window);
    let mut ticker = interval(settings.sample_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("[HR] Sampler started ({} sample window)", settings.window);

    while shutdown.is_running() {
        ticker.tick().await;

        let batch = match timeout(settings.read_timeout, ppg.read_fifo(&mut device)).await {
            Ok(Ok(batch)) => batch,
            Ok(Err(e)) => {
                warn!("[HR] FIFO read failed: {}", e);
                break;
            }
            Err(_) => {
                warn!("[HR] FIFO read timed out after {:?}", settings.read_timeout);
                break;
            }
        };

        if batch.is_empty() {
            continue;
        }

        window.extend(batch);
        if window.is_full() {
            let bpm = window.bpm(settings.sample_rate_hz, settings.noise_floor);
            published.set_bpm(bpm);
        }
    }

    published.set_bpm(0.0);
    published.stopped.store(true, Ordering::Release);
    debug!("[HR] Sampler stopped");
}

/// Fixed-size rolling window of the most recent sample pairs
#[derive(Debug)]
struct SampleWindow {
    samples: VecDeque<PpgSample>,
    capacity: usize,
}

impl SampleWindow {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn extend(&mut self, batch: impl IntoIterator<Item = PpgSample>) {
        for sample in batch {
            if self.samples.len() == self.capacity {
                self.samples.pop_front();
            }
            self.samples.push_back(sample);
        }
    }

    fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    fn mean(&self, channel: impl Fn(&PpgSample) -> u32) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.samples.iter().map(|s| f64::from(channel(s))).sum();
        sum / self.samples.len() as f64
    }

    /// Current estimate; 0 when there is no contact or no confident estimate
    fn bpm(&self, sample_rate_hz: f32, noise_floor: f64) -> f32 {
        if self.mean(|s| s.ir) < noise_floor && self.mean(|s| s.red) < noise_floor {
            return 0.0;
        }

        let ir: Vec<u32> = self.samples.iter().map(|s| s.ir).collect();
        estimate_bpm(&ir, sample_rate_hz).unwrap_or(0.0)
    }
}

/// Estimate beats-per-minute from an infrared PPG trace
///
/// The trace is inverted around its mean (so each pulse becomes a peak),
/// smoothed with a short moving average and scanned for peaks above a
/// bounded threshold. The mean peak spacing gives the rate. Returns `None`
/// when fewer than two peaks are found or the rate is implausible.
pub fn estimate_bpm(ir: &[u32], sample_rate_hz: f32) -> Option<f32> {
    if ir.len() < MOVING_AVERAGE * 2 || sample_rate_hz <= 0.0 {
        return None;
    }

    let mean = ir.iter().map(|&v| f64::from(v)).sum::<f64>() / ir.len() as f64;
    let inverted: Vec<f64> = ir.iter().map(|&v| mean - f64::from(v)).collect();
    let smoothed: Vec<f64> = inverted
        .windows(MOVING_AVERAGE)
        .map(|w| w.iter().sum::<f64>() / MOVING_AVERAGE as f64)
        .collect();

    let threshold = (smoothed.iter().sum::<f64>() / smoothed.len() as f64)
        .clamp(MIN_THRESHOLD, MAX_THRESHOLD);

    let peaks = find_peaks(&smoothed, threshold, MIN_PEAK_DISTANCE, MAX_PEAKS);
    if peaks.len() < 2 {
        return None;
    }

    let span = (peaks[peaks.len() - 1] - peaks[0]) as f32;
    let mean_interval = span / (peaks.len() - 1) as f32;
    let bpm = sample_rate_hz * 60.0 / mean_interval;

    (MIN_BPM..=MAX_BPM).contains(&bpm).then_some(bpm)
}

/// Indices of the tallest peaks at least `min_distance` apart, ascending
fn find_peaks(x: &[f64], min_height: f64, min_distance: usize, max_count: usize) -> Vec<usize> {
    let mut candidates = local_maxima(x, min_height);
    candidates.sort_by(|&a, &b| x[b].total_cmp(&x[a]));

    let mut kept: Vec<usize> = Vec::with_capacity(max_count);
    for peak in candidates {
        if kept.iter().all(|&k| k.abs_diff(peak) > min_distance) {
            kept.push(peak);
            if kept.len() == max_count {
                break;
            }
        }
    }

    kept.sort_unstable();
    kept
}

/// Local maxima above `min_height`; a plateau counts once, at its left edge
fn local_maxima(x: &[f64], min_height: f64) -> Vec<usize> {
    let mut peaks = Vec::new();
    let mut i = 1;

    while i + 1 < x.len() {
        if x[i] > min_height && x[i] > x[i - 1] {
            let mut width = 1;
            while i + width < x.len() && x[i + width] == x[i] {
                width += 1;
            }
            if i + width < x.len() && x[i] > x[i + width] {
                peaks.push(i);
            }
            i += width;
        } else {
            i += 1;
        }
    }

    peaks
}
