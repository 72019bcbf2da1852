//! Shared running flag
//!
//! One flag, written only by [`ShutdownTrigger`], observed by every background
//! task. Tasks check it between iterations and await [`Shutdown::stopped`]
//! inside every blocking `select!` so a parked accept or read is released.

use tokio::sync::watch;

/// Create a linked trigger/flag pair in the running state
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(true);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

/// Owner side of the running flag
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Clear the running flag and wake every waiter
    pub fn stop(&self) {
        self.tx.send_replace(false);
    }
}

/// Observer side of the running flag
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Whether the service is still running
    pub fn is_running(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the running flag is cleared (or its owner is gone)
    pub async fn stopped(&mut self) {
        loop {
            if !*self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_stop_wakes_waiter() {
        let (trigger, shutdown) = channel();
        assert!(shutdown.is_running());

        let mut waiter = shutdown.clone();
        let task = tokio::spawn(async move { waiter.stopped().await });

        trigger.stop();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("waiter should wake")
            .expect("task panicked");
        assert!(!shutdown.is_running());
    }

    #[tokio::test]
    async fn test_dropped_trigger_counts_as_stopped() {
        let (trigger, mut shutdown) = channel();
        drop(trigger);
        tokio::time::timeout(Duration::from_secs(1), shutdown.stopped())
            .await
            .expect("should resolve when the trigger is gone");
    }
}
