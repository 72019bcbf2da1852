//! Sensor Slot and Link State Machines
//!
//! Defines the valid lifecycle transitions of a sensor slot and the
//! acquisition throttle applied while a slot is disconnected.

use std::fmt;

/// Lifecycle state of one sensor slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// No handle held; acquisition is attempted when the retry policy allows
    Disconnected,
    /// Acquisition in progress
    Connecting,
    /// Handle held; one read per tick
    Connected,
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotState::Disconnected => write!(f, "down"),
            SlotState::Connecting => write!(f, "connecting"),
            SlotState::Connected => write!(f, "up"),
        }
    }
}

/// Events that can trigger slot transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotEvent {
    /// An acquisition attempt is starting
    AcquireStarted,
    /// The driver returned a handle
    Acquired,
    /// The driver failed to produce a handle
    AcquireFailed,
    /// A read succeeded
    ReadOk,
    /// A read failed; the handle must be released
    ReadFailed,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionResult {
    /// Transition was valid
    Success(SlotState),
    /// Transition was invalid from current state
    Invalid { from: SlotState, event: SlotEvent },
}

/// How often a disconnected slot may attempt acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    every_ticks: u32,
}

impl RetryPolicy {
    /// Attempt acquisition on every tick
    pub const fn every_tick() -> Self {
        Self { every_ticks: 1 }
    }

    /// Attempt acquisition once every `ticks` ticks (minimum 1)
    pub const fn every(ticks: u32) -> Self {
        Self {
            every_ticks: if ticks == 0 { 1 } else { ticks },
        }
    }

    /// Ticks between acquisition attempts
    pub fn interval(&self) -> u32 {
        self.every_ticks
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::every_tick()
    }
}

/// The lifecycle state machine of one sensor slot
#[derive(Debug)]
pub struct SlotMachine {
    current_state: SlotState,
    policy: RetryPolicy,
    ticks_waited: u32,
    consecutive_failures: u32,
}

impl SlotMachine {
    /// Create a new state machine in Disconnected state, due on its first tick
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            current_state: SlotState::Disconnected,
            policy,
            ticks_waited: policy.interval() - 1,
            consecutive_failures: 0,
        }
    }

    /// Get current state
    pub fn state(&self) -> SlotState {
        self.current_state
    }

    /// Whether the slot currently holds a handle
    pub fn is_connected(&self) -> bool {
        self.current_state == SlotState::Connected
    }

    /// Failures since the last successful acquisition
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Get the retry policy
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Count one disconnected tick and report whether acquisition is due
    pub fn retry_due(&mut self) -> bool {
        if self.current_state != SlotState::Disconnected {
            return false;
        }

        self.ticks_waited = self.ticks_waited.saturating_add(1);
        if self.ticks_waited >= self.policy.interval() {
            self.ticks_waited = 0;
            true
        } else {
            false
        }
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: SlotEvent) -> TransitionResult {
        use SlotEvent::*;
        use SlotState::*;

        let next = match (self.current_state, event) {
            (Disconnected, AcquireStarted) => Connecting,

            (Connecting, Acquired) => {
                self.consecutive_failures = 0;
                Connected
            }
            (Connecting, AcquireFailed) => {
                self.note_failure();
                Disconnected
            }

            (Connected, ReadOk) => Connected,
            (Connected, ReadFailed) => {
                self.note_failure();
                Disconnected
            }

            (from, event) => return TransitionResult::Invalid { from, event },
        };

        self.current_state = next;
        TransitionResult::Success(next)
    }

    fn note_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.ticks_waited = 0;
    }
}

/// Connectivity of the single peer link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// Service registered, waiting for a peer
    Listening,
    /// A peer is attached
    Connected,
    /// Transport stack unavailable; readings are not streamed
    Offline,
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkStatus::Listening => write!(f, "listening"),
            LinkStatus::Connected => write!(f, "connected"),
            LinkStatus::Offline => write!(f, "offline"),
        }
    }
}
