//! Peer session bookkeeping shared by the acceptor, sender and producers

use pathpal_shared::state_machine::LinkStatus;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Notify;

/// Session counters and the connected flag
///
/// Every accepted peer gets a fresh session number. Frames carry the session
/// they were queued under and are only written to the peer of that session,
/// so nothing queued for one peer can reach the next.
#[derive(Debug)]
pub struct LinkState {
    session: AtomicU64,
    ended: AtomicU64,
    connected: AtomicBool,
    listening: AtomicBool,
    lost: Notify,
}

impl LinkState {
    pub fn new(listening: bool) -> Self {
        Self {
            session: AtomicU64::new(0),
            ended: AtomicU64::new(0),
            connected: AtomicBool::new(false),
            listening: AtomicBool::new(listening),
            lost: Notify::new(),
        }
    }

    /// Current (or most recent) session number
    pub fn session(&self) -> u64 {
        self.session.load(Ordering::SeqCst)
    }

    /// Start a new session for a freshly accepted peer, not yet connected
    pub fn begin_session(&self) -> u64 {
        self.connected.store(false, Ordering::SeqCst);
        self.session.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Open the session for producers
    pub fn mark_connected(&self, session: u64) {
        if self.session() == session {
            self.connected.store(true, Ordering::SeqCst);
        }
    }

    /// End the current session
    pub fn close_session(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.ended.store(self.session(), Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Whether `session` is the current one and has not ended
    pub fn is_live(&self, session: u64) -> bool {
        session == self.session() && session > self.ended.load(Ordering::SeqCst)
    }

    /// Report a failed write on `session`; wakes the acceptor once
    pub fn report_lost(&self, session: u64) {
        if self.is_live(session) && self.connected.swap(false, Ordering::SeqCst) {
            self.lost.notify_one();
        }
    }

    /// Wait for a `report_lost`
    pub async fn lost(&self) {
        self.lost.notified().await
    }

    /// Mark the listener as gone for good
    pub fn stop_listening(&self) {
        self.listening.store(false, Ordering::SeqCst);
    }

    pub fn status(&self) -> LinkStatus {
        if self.is_connected() {
            LinkStatus::Connected
        } else if self.listening.load(Ordering::SeqCst) {
            LinkStatus::Listening
        } else {
            LinkStatus::Offline
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_session_lifecycle() {
        let state = LinkState::new(true);
        assert_eq!(state.status(), LinkStatus::Listening);

        let session = state.begin_session();
        assert_eq!(session, 1);
        assert!(!state.is_connected());
        assert!(state.is_live(session));

        state.mark_connected(session);
        assert_eq!(state.status(), LinkStatus::Connected);

        state.close_session();
        assert!(!state.is_live(session));
        assert_eq!(state.status(), LinkStatus::Listening);

        let next = state.begin_session();
        assert_eq!(next, 2);
        assert!(!state.is_live(session));
    }

    #[test]
    fn test_stale_mark_connected_ignored() {
        let state = LinkState::new(true);
        let old = state.begin_session();
        state.begin_session();
        state.mark_connected(old);
        assert!(!state.is_connected());
    }

    #[tokio::test]
    async fn test_report_lost_notifies_once() {
        let state = LinkState::new(true);
        let session = state.begin_session();
        state.mark_connected(session);

        state.report_lost(session);
        state.report_lost(session);
        assert!(!state.is_connected());

        tokio::time::timeout(Duration::from_millis(100), state.lost())
            .await
            .expect("first report should be stored as a permit");
        assert!(
            tokio::time::timeout(Duration::from_millis(20), state.lost())
                .await
                .is_err(),
            "second report is a no-op"
        );
    }

    #[test]
    fn test_offline_without_listener() {
        let state = LinkState::new(false);
        assert_eq!(state.status(), LinkStatus::Offline);
    }
}
