//! Sensor slot: one driver, its owned handle and its lifecycle

use super::{SensorDriver, SensorError, SensorKind};
use async_trait::async_trait;
use pathpal_shared::state_machine::{
    RetryPolicy, SlotEvent, SlotMachine, SlotState, TransitionResult,
};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// A slot as seen by the aggregator, independent of its driver type
#[async_trait]
pub trait PolledSlot<V: Send + 'static>: Send {
    /// Which sensor this slot holds
    fn kind(&self) -> SensorKind;

    /// Current lifecycle state
    fn state(&self) -> SlotState;

    /// Run one tick: acquire if due, otherwise read. `None` means the tick
    /// contributes the neutral value.
    async fn poll(&mut self) -> Option<V>;

    /// Run the acquisition policy only, without reading
    async fn maintain(&mut self);
}

/// Owns one driver's handle and applies the acquire/read/fail/retry cycle
///
/// The handle is `Some` exactly while the state machine is Connected. It is
/// dropped on the first failed read, before any reacquisition.
pub struct SensorSlot<D: SensorDriver> {
    driver: D,
    handle: Option<D::Handle>,
    machine: SlotMachine,
    call_timeout: Duration,
}

impl<D: SensorDriver> SensorSlot<D> {
    /// Create a slot in Disconnected state
    pub fn new(driver: D, policy: RetryPolicy, call_timeout: Duration) -> Self {
        Self {
            driver,
            handle: None,
            machine: SlotMachine::new(policy),
            call_timeout,
        }
    }

    /// Attempt acquisition if the retry policy says so
    async fn try_acquire(&mut self) {
        if !self.machine.retry_due() {
            return;
        }

        let kind = self.driver.kind();
        if !self.transition(SlotEvent::AcquireStarted) {
            return;
        }

        match bounded(self.call_timeout, self.driver.acquire()).await {
            Ok(handle) => {
                self.handle = Some(handle);
                self.transition(SlotEvent::Acquired);
                info!("[SENSOR] {} acquired", kind);
            }
            Err(e) => {
                self.transition(SlotEvent::AcquireFailed);
                let failures = self.machine.consecutive_failures();
                // Absent hardware fails every attempt; only the first is news
                if failures == 1 {
                    warn!("[SENSOR] {} unavailable: {}", kind, e);
                } else {
                    debug!("[SENSOR] {} acquire failed ({} in a row): {}", kind, failures, e);
                }
            }
        }
    }

    /// Feed one event to the state machine; a rejected event is logged and
    /// leaves the state unchanged
    fn transition(&mut self, event: SlotEvent) -> bool {
        match self.machine.process_event(event) {
            TransitionResult::Success(_) => true,
            TransitionResult::Invalid { from, event } => {
                warn!(
                    "[SENSOR] {} rejected {:?} while {}",
                    self.driver.kind(),
                    event,
                    from
                );
                false
            }
        }
    }

    /// Drop the handle and fall back to Disconnected
    fn release(&mut self, error: SensorError) {
        self.handle = None;
        self.transition(SlotEvent::ReadFailed);
        warn!("[SENSOR] {} read failed, released: {}", self.driver.kind(), error);
    }
}

/// Run a driver call, converting an overrun into a failure
async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, SensorError>>,
) -> Result<T, SensorError> {
    timeout(limit, call)
        .await
        .unwrap_or(Err(SensorError::Timeout(limit)))
}

#[async_trait]
impl<D: SensorDriver> PolledSlot<D::Value> for SensorSlot<D> {
    fn kind(&self) -> SensorKind {
        self.driver.kind()
    }

    fn state(&self) -> SlotState {
        self.machine.state()
    }

    async fn poll(&mut self) -> Option<D::Value> {
        if self.handle.is_none() {
            self.try_acquire().await;
            return None;
        }
        let handle = self.handle.as_mut()?;

        match bounded(self.call_timeout, self.driver.read(handle)).await {
            Ok(value) => {
                self.transition(SlotEvent::ReadOk);
                Some(value)
            }
            Err(e) => {
                self.release(e);
                None
            }
        }
    }

    async fn maintain(&mut self) {
        if self.handle.is_none() {
            self.try_acquire().await;
        }
    }
}
