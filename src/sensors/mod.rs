//! Sensor slots and driver boundaries
//!
//! This module handles:
//! - The acquire/read contract every hardware driver implements
//! - Per-kind slots that own their handle and retry policy
//! - Heart rate estimation on a background sampler
//! - Saturation clamping for the ranging sensor
//! - Simulated drivers for running without hardware

mod heart_rate;
mod ranging;
pub mod sim;
mod slot;

pub use heart_rate::{HeartRateSensor, HeartRateSettings, PpgDevice, PpgSample};
pub use ranging::Clamped;
pub use slot::{PolledSlot, SensorSlot};

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The sensor kinds a device carries, one slot each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    HeartRate,
    Ranging,
    Inertial,
    Camera,
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorKind::HeartRate => write!(f, "hr"),
            SensorKind::Ranging => write!(f, "range"),
            SensorKind::Inertial => write!(f, "imu"),
            SensorKind::Camera => write!(f, "cam"),
        }
    }
}

/// Transient sensor failures; a slot swallows all of them
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Device not present")]
    NotPresent,

    #[error("Sampler stopped: {0}")]
    SamplerStopped(String),
}

/// One accelerometer + gyroscope sample
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ImuSample {
    /// m/s^2
    pub accel: [f32; 3],
    /// rad/s
    pub gyro: [f32; 3],
}

/// Boundary to a hardware driver
///
/// `acquire` opens the device and returns a handle the slot owns exclusively;
/// `read` takes one measurement through that handle. Either may fail at any
/// time. Neither call needs to bound its own latency: the slot wraps both in
/// a timeout.
#[async_trait]
pub trait SensorDriver: Send + Sync + 'static {
    /// Open device state, dropped to release the device
    type Handle: Send + 'static;
    /// One measurement
    type Value: Send + 'static;

    /// Which slot this driver fills
    fn kind(&self) -> SensorKind;

    /// Open the device
    async fn acquire(&self) -> Result<Self::Handle, SensorError>;

    /// Take one measurement
    async fn read(&self, handle: &mut Self::Handle) -> Result<Self::Value, SensorError>;
}

#[cfg(test)]
pub mod testing {
    //! Scripted drivers for deterministic slot and aggregator tests

    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Shared script and call counters, kept by the test after the driver moves into a slot
    pub struct Script<V> {
        acquires: Mutex<VecDeque<bool>>,
        reads: Mutex<VecDeque<Option<V>>>,
        pub acquire_calls: AtomicUsize,
        pub read_calls: AtomicUsize,
        pub released: AtomicUsize,
    }

    impl<V> Script<V> {
        pub fn acquire_calls(&self) -> usize {
            self.acquire_calls.load(Ordering::SeqCst)
        }

        pub fn read_calls(&self) -> usize {
            self.read_calls.load(Ordering::SeqCst)
        }

        pub fn released(&self) -> usize {
            self.released.load(Ordering::SeqCst)
        }
    }

    /// Driver replaying a script: acquisitions succeed and reads return
    /// `fallback` once their queues run dry
    pub struct ScriptedDriver<V> {
        kind: SensorKind,
        fallback: V,
        script: Arc<Script<V>>,
    }

    /// Handle counting its own release
    pub struct ScriptedHandle<V> {
        script: Arc<Script<V>>,
    }

    impl<V> Drop for ScriptedHandle<V> {
        fn drop(&mut self) {
            self.script.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl<V: Clone> ScriptedDriver<V> {
        /// `acquires`: true = success. `reads`: `None` = failure.
        pub fn new(
            kind: SensorKind,
            fallback: V,
            acquires: Vec<bool>,
            reads: Vec<Option<V>>,
        ) -> (Self, Arc<Script<V>>) {
            let script = Arc::new(Script {
                acquires: Mutex::new(acquires.into()),
                reads: Mutex::new(reads.into()),
                acquire_calls: AtomicUsize::new(0),
                read_calls: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
            });
            let driver = Self {
                kind,
                fallback,
                script: script.clone(),
            };
            (driver, script)
        }
    }

    #[async_trait]
    impl<V: Clone + Send + Sync + 'static> SensorDriver for ScriptedDriver<V> {
        type Handle = ScriptedHandle<V>;
        type Value = V;

        fn kind(&self) -> SensorKind {
            self.kind
        }

        async fn acquire(&self) -> Result<Self::Handle, SensorError> {
            self.script.acquire_calls.fetch_add(1, Ordering::SeqCst);
            let ok = self.script.acquires.lock().unwrap().pop_front().unwrap_or(true);
            if ok {
                Ok(ScriptedHandle {
                    script: self.script.clone(),
                })
            } else {
                Err(SensorError::NotPresent)
            }
        }

        async fn read(&self, _handle: &mut Self::Handle) -> Result<V, SensorError> {
            self.script.read_calls.fetch_add(1, Ordering::SeqCst);
            let step = self.script.reads.lock().unwrap().pop_front();
            match step {
                None => Ok(self.fallback.clone()),
                Some(Some(value)) => Ok(value),
                Some(None) => Err(SensorError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "scripted failure",
                ))),
            }
        }
    }
}
