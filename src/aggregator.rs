//! Fixed-cadence aggregation loop
//!
//! Each tick drives every slot once, in a fixed order, folds the results into
//! one fully populated [`Reading`] and hands it to the link without blocking.

use crate::config::EdgeConfig;
use crate::link::LinkHandle;
use crate::sensors::{ImuSample, PolledSlot, SensorKind};
use crate::shutdown::Shutdown;
use bytes::Bytes;
use pathpal_shared::state_machine::SlotState;
use pathpal_shared::Reading;
use std::fmt::Write;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// One slot per sensor kind; the camera is optional
pub struct SensorBank {
    heart_rate: Box<dyn PolledSlot<f32>>,
    ranging: Box<dyn PolledSlot<u16>>,
    inertial: Box<dyn PolledSlot<ImuSample>>,
    camera: Option<Box<dyn PolledSlot<Bytes>>>,
}

impl SensorBank {
    pub fn new(
        heart_rate: Box<dyn PolledSlot<f32>>,
        ranging: Box<dyn PolledSlot<u16>>,
        inertial: Box<dyn PolledSlot<ImuSample>>,
    ) -> Self {
        Self {
            heart_rate,
            ranging,
            inertial,
            camera: None,
        }
    }

    pub fn with_camera(mut self, camera: Box<dyn PolledSlot<Bytes>>) -> Self {
        self.camera = Some(camera);
        self
    }

    pub fn has_camera(&self) -> bool {
        self.camera.is_some()
    }

    /// Lifecycle state of every slot, in polling order
    pub fn states(&self) -> Vec<(SensorKind, SlotState)> {
        let mut states = vec![
            (self.heart_rate.kind(), self.heart_rate.state()),
            (self.ranging.kind(), self.ranging.state()),
            (self.inertial.kind(), self.inertial.state()),
        ];
        if let Some(camera) = &self.camera {
            states.push((camera.kind(), camera.state()));
        }
        states
    }
}

/// Loop timing
#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    pub tick_interval: Duration,
    /// Capture an image on every Kth tick
    pub capture_every_ticks: u64,
    /// Log a status line every N ticks
    pub status_every_ticks: u64,
}

impl From<&EdgeConfig> for AggregatorSettings {
    fn from(config: &EdgeConfig) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            capture_every_ticks: config.camera.capture_every_ticks.max(1),
            status_every_ticks: config.status_every_ticks.max(1),
        }
    }
}

pub struct Aggregator {
    sensors: SensorBank,
    link: LinkHandle,
    settings: AggregatorSettings,
    ticks: u64,
}

impl Aggregator {
    pub fn new(sensors: SensorBank, link: LinkHandle, settings: AggregatorSettings) -> Self {
        Self {
            sensors,
            link,
            settings,
            ticks: 0,
        }
    }

    /// Tick until the running flag clears
    pub async fn run(mut self, mut shutdown: Shutdown) {
        let mut ticker = interval(self.settings.tick_interval);
        // A slow tick delays the next one rather than bursting to catch up
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "[AGG] Sampling every {:?} ({} slots)",
            self.settings.tick_interval,
            self.sensors.states().len()
        );

        while shutdown.is_running() {
            tokio::select! {
                _ = shutdown.stopped() => break,
                _ = ticker.tick() => {}
            }

            let reading = self.tick().await;
            let outcome = self.link.enqueue(&reading);
            debug!("[AGG] Tick {}: {:?}", self.ticks, outcome);

            if self.ticks % self.settings.status_every_ticks == 0 {
                info!("{}", self.status_line());
            }
        }

        info!("[AGG] Stopped after {} ticks", self.ticks);
    }

    /// Drive every slot once and build this tick's reading
    pub async fn tick(&mut self) -> Reading {
        self.ticks += 1;

        let heart_rate = self.sensors.heart_rate.poll().await.unwrap_or_default();
        let distance_cm = self.sensors.ranging.poll().await.unwrap_or_default();
        let imu = self.sensors.inertial.poll().await.unwrap_or_default();

        let capture = self.ticks % self.settings.capture_every_ticks == 0;
        let image = match self.sensors.camera.as_mut() {
            Some(camera) if capture => camera.poll().await.unwrap_or_default(),
            Some(camera) => {
                camera.maintain().await;
                Bytes::new()
            }
            None => Bytes::new(),
        };

        Reading {
            heart_rate,
            distance_cm,
            accel: imu.accel,
            gyro: imu.gyro,
            image,
        }
    }

    fn status_line(&self) -> String {
        let mut line = format!("[STATUS] tick {}", self.ticks);
        for (kind, state) in self.sensors.states() {
            let _ = write!(line, " {}={}", kind, state);
        }
        let _ = write!(
            line,
            " link={} queue={}",
            self.link.status(),
            self.link.queue_len()
        );
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{Link, LinkSettings};
    use crate::sensors::testing::ScriptedDriver;
    use crate::sensors::SensorSlot;
    use pathpal_shared::state_machine::RetryPolicy;

    const TIMEOUT: Duration = Duration::from_millis(100);

    fn settings(capture_every_ticks: u64) -> AggregatorSettings {
        AggregatorSettings {
            tick_interval: Duration::from_millis(10),
            capture_every_ticks,
            status_every_ticks: 25,
        }
    }

    fn offline_link() -> LinkHandle {
        Link::new(None, &LinkSettings::default()).handle()
    }

    fn slot<V: Clone + Send + Sync + 'static>(
        kind: SensorKind,
        fallback: V,
        acquires: Vec<bool>,
        reads: Vec<Option<V>>,
    ) -> Box<SensorSlot<ScriptedDriver<V>>> {
        let (driver, _script) = ScriptedDriver::new(kind, fallback, acquires, reads);
        Box::new(SensorSlot::new(driver, RetryPolicy::every_tick(), TIMEOUT))
    }

    #[tokio::test]
    async fn test_reading_complete_without_sensors() {
        let absent = vec![false; 16];
        let bank = SensorBank::new(
            slot(SensorKind::HeartRate, 70.0f32, absent.clone(), vec![]),
            slot(SensorKind::Ranging, 100u16, absent.clone(), vec![]),
            slot(SensorKind::Inertial, ImuSample::default(), absent.clone(), vec![]),
        )
        .with_camera(slot(SensorKind::Camera, Bytes::from_static(b"jpg"), absent, vec![]));
        let mut aggregator = Aggregator::new(bank, offline_link(), settings(1));

        for _ in 0..5 {
            assert_eq!(aggregator.tick().await, Reading::neutral());
        }
        assert!(aggregator
            .sensors
            .states()
            .iter()
            .all(|(_, state)| *state == SlotState::Disconnected));
    }

    #[tokio::test]
    async fn test_read_failure_then_recovery() {
        let ranging = slot(
            SensorKind::Ranging,
            0u16,
            vec![],
            vec![Some(100), Some(101), Some(102), None, Some(200)],
        );
        let bank = SensorBank::new(
            slot(SensorKind::HeartRate, 0.0f32, vec![], vec![]),
            ranging,
            slot(SensorKind::Inertial, ImuSample::default(), vec![], vec![]),
        );
        let mut aggregator = Aggregator::new(bank, offline_link(), settings(10));

        let mut distances = Vec::new();
        let mut ranging_states = Vec::new();
        for _ in 0..7 {
            distances.push(aggregator.tick().await.distance_cm);
            ranging_states.push(aggregator.sensors.states()[1].1);
        }

        // Tick 1 acquires, 2-4 read, 5 fails, 6 reacquires, 7 reads
        assert_eq!(distances, vec![0, 100, 101, 102, 0, 0, 200]);
        assert_eq!(ranging_states[4], SlotState::Disconnected);
        assert_eq!(ranging_states[5], SlotState::Connected);
        assert_eq!(ranging_states[6], SlotState::Connected);
    }

    #[tokio::test]
    async fn test_camera_captures_every_kth_tick() {
        let (camera, script) = ScriptedDriver::new(
            SensorKind::Camera,
            Bytes::from_static(b"jpg"),
            vec![],
            vec![],
        );
        let bank = SensorBank::new(
            slot(SensorKind::HeartRate, 0.0f32, vec![], vec![]),
            slot(SensorKind::Ranging, 0u16, vec![], vec![]),
            slot(SensorKind::Inertial, ImuSample::default(), vec![], vec![]),
        )
        .with_camera(Box::new(SensorSlot::new(
            camera,
            RetryPolicy::every_tick(),
            TIMEOUT,
        )));
        let mut aggregator = Aggregator::new(bank, offline_link(), settings(3));

        let mut captured = Vec::new();
        for _ in 0..6 {
            captured.push(aggregator.tick().await.has_image());
        }

        assert_eq!(captured, vec![false, false, true, false, false, true]);
        assert_eq!(script.read_calls(), 2);
        assert_eq!(script.acquire_calls(), 1);
    }

    #[tokio::test]
    async fn test_status_line_lists_every_slot() {
        let bank = SensorBank::new(
            slot(SensorKind::HeartRate, 0.0f32, vec![], vec![]),
            slot(SensorKind::Ranging, 0u16, vec![false], vec![]),
            slot(SensorKind::Inertial, ImuSample::default(), vec![], vec![]),
        );
        let mut aggregator = Aggregator::new(bank, offline_link(), settings(10));
        aggregator.tick().await;

        assert_eq!(
            aggregator.status_line(),
            "[STATUS] tick 1 hr=up range=down imu=up link=offline queue=0"
        );
    }

    #[tokio::test]
    async fn test_run_stops_on_flag() {
        let bank = SensorBank::new(
            slot(SensorKind::HeartRate, 0.0f32, vec![], vec![]),
            slot(SensorKind::Ranging, 0u16, vec![], vec![]),
            slot(SensorKind::Inertial, ImuSample::default(), vec![], vec![]),
        );
        let aggregator = Aggregator::new(bank, offline_link(), settings(10));
        let (trigger, shutdown) = crate::shutdown::channel();

        let task = tokio::spawn(aggregator.run(shutdown));
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.stop();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("aggregator should stop")
            .unwrap();
    }
}
