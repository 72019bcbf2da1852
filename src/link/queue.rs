//! Bounded newest-wins outbound queue

use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::timeout;

/// One encoded message, tagged with the peer session it was queued for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub session: u64,
    pub bytes: Bytes,
}

/// FIFO of at most `capacity` frames; pushing into a full queue evicts the
/// oldest frame. Producers never block.
#[derive(Debug)]
pub struct OutboundQueue {
    frames: Mutex<VecDeque<Frame>>,
    capacity: usize,
    ready: Notify,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            ready: Notify::new(),
        }
    }

    // A panicking holder cannot leave the deque half-updated, so the data is
    // still usable after poisoning
    fn lock(&self) -> MutexGuard<'_, VecDeque<Frame>> {
        self.frames.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a frame, returning the one evicted to make room
    pub fn push(&self, frame: Frame) -> Option<Frame> {
        let evicted = {
            let mut frames = self.lock();
            let evicted = if frames.len() >= self.capacity {
                frames.pop_front()
            } else {
                None
            };
            frames.push_back(frame);
            evicted
        };
        self.ready.notify_one();
        evicted
    }

    /// Take the oldest frame without waiting
    pub fn try_pop(&self) -> Option<Frame> {
        self.lock().pop_front()
    }

    /// Take the oldest frame, waiting up to `wait` for one to arrive
    pub async fn pop_timeout(&self, wait: Duration) -> Option<Frame> {
        if let Some(frame) = self.try_pop() {
            return Some(frame);
        }

        timeout(wait, async {
            loop {
                let notified = self.ready.notified();
                if let Some(frame) = self.try_pop() {
                    return frame;
                }
                notified.await;
            }
        })
        .await
        .ok()
    }

    /// Drop every queued frame, returning how many were dropped
    pub fn clear(&self) -> usize {
        let mut frames = self.lock();
        let dropped = frames.len();
        frames.clear();
        dropped
    }

    /// Drop the frames tagged with `session`, returning how many were dropped
    pub fn discard_session(&self, session: u64) -> usize {
        let mut frames = self.lock();
        let before = frames.len();
        frames.retain(|frame| frame.session != session);
        before - frames.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
}
