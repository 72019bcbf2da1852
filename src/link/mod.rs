//! Peer link: connection lifecycle and outbound streaming
//!
//! This module handles:
//! - Accepting a single peer over RFCOMM (or TCP in simulation)
//! - A bounded newest-wins queue between the aggregator and the network
//! - A background sender that writes frames only to the session they were
//!   produced for

mod acceptor;
mod queue;
mod rfcomm;
mod sender;
mod state;
mod tcp;
mod traits;

pub use rfcomm::{RfcommConfig, RfcommListener};
pub use tcp::TcpSimListener;
pub use traits::PeerListener;

use acceptor::Acceptor;
use queue::{Frame, OutboundQueue};
use sender::FrameSender;
use state::LinkState;

use crate::shutdown::Shutdown;
use pathpal_shared::codec;
use pathpal_shared::state_machine::LinkStatus;
use pathpal_shared::{telemetry, Reading};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Pending write-half handovers from the acceptor to the sender
const WRITER_CHANNEL_SIZE: usize = 4;

/// Link timing and sizing
#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub queue_capacity: usize,
    /// How long the sender waits for a frame before rechecking the running flag
    pub poll_timeout: Duration,
    /// Upper bound on one frame write
    pub write_timeout: Duration,
    /// Fallback period for the acceptor to recheck the connection
    pub liveness: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            queue_capacity: telemetry::QUEUE_CAPACITY,
            poll_timeout: Duration::from_millis(100),
            write_timeout: Duration::from_secs(2),
            liveness: Duration::from_secs(1),
        }
    }
}

/// Result of handing a reading to the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// No peer connected; the reading was dropped
    NoPeer,
    /// Queued without eviction
    Queued,
    /// Queued after evicting the oldest frame
    Evicted,
    /// The reading could not be encoded and was dropped
    EncodeFailed,
}

/// Producer side of the link, cheap to clone
#[derive(Clone)]
pub struct LinkHandle {
    state: Arc<LinkState>,
    queue: Arc<OutboundQueue>,
}

impl LinkHandle {
    /// Non-blocking: drop when no peer, else encode and queue (newest wins)
    pub fn enqueue(&self, reading: &Reading) -> EnqueueOutcome {
        // Session before flag: a racing reconnect can only make the frame stale
        let session = self.state.session();
        if !self.state.is_connected() {
            return EnqueueOutcome::NoPeer;
        }

        let bytes = match codec::encode(reading) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("[LINK] Dropping reading: {}", e);
                return EnqueueOutcome::EncodeFailed;
            }
        };

        self.admit(Frame { session, bytes })
    }

    /// Queue a frame for its session. A disconnect that purged the queue
    /// between the connected check and the push leaves the frame orphaned,
    /// so it is withdrawn again.
    fn admit(&self, frame: Frame) -> EnqueueOutcome {
        let session = frame.session;
        let evicted = self.queue.push(frame);

        if !self.state.is_live(session) {
            self.queue.discard_session(session);
            return EnqueueOutcome::NoPeer;
        }

        match evicted {
            Some(evicted) => {
                debug!(
                    "[LINK] Queue full, evicted a {} byte frame",
                    evicted.bytes.len()
                );
                EnqueueOutcome::Evicted
            }
            None => EnqueueOutcome::Queued,
        }
    }

    pub fn status(&self) -> LinkStatus {
        self.state.status()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
}

/// The assembled link: producer handle plus the two background activities
pub struct Link {
    handle: LinkHandle,
    acceptor: Option<Acceptor>,
    sender: FrameSender,
}

impl Link {
    /// Wire up the link. Without a listener the link is offline and every
    /// enqueue is dropped.
    pub fn new(listener: Option<Box<dyn PeerListener>>, settings: &LinkSettings) -> Self {
        let state = Arc::new(LinkState::new(listener.is_some()));
        let queue = Arc::new(OutboundQueue::new(settings.queue_capacity));
        let (writer_tx, writer_rx) = mpsc::channel(WRITER_CHANNEL_SIZE);

        let acceptor = listener.map(|listener| {
            Acceptor::new(
                listener,
                state.clone(),
                queue.clone(),
                writer_tx,
                settings.liveness,
            )
        });
        let sender = FrameSender::new(
            queue.clone(),
            state.clone(),
            writer_rx,
            settings.poll_timeout,
            settings.write_timeout,
        );

        Self {
            handle: LinkHandle { state, queue },
            acceptor,
            sender,
        }
    }

    pub fn handle(&self) -> LinkHandle {
        self.handle.clone()
    }

    /// Spawn the acceptor and sender; nothing is spawned when offline
    pub fn spawn(self, shutdown: &Shutdown) -> Vec<(&'static str, JoinHandle<()>)> {
        let Some(acceptor) = self.acceptor else {
            return Vec::new();
        };

        vec![
            ("acceptor", tokio::spawn(acceptor.run(shutdown.clone()))),
            ("sender", tokio::spawn(self.sender.run(shutdown.clone()))),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::{self, ShutdownTrigger};
    use pathpal_shared::codec::FrameDecoder;
    use std::net::SocketAddr;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;
    use tokio::time::{sleep, timeout};

    fn settings(queue_capacity: usize) -> LinkSettings {
        LinkSettings {
            queue_capacity,
            poll_timeout: Duration::from_millis(20),
            write_timeout: Duration::from_millis(500),
            liveness: Duration::from_millis(50),
        }
    }

    fn reading(distance_cm: u16) -> Reading {
        Reading {
            distance_cm,
            ..Reading::neutral()
        }
    }

    /// Link over a loopback listener with the acceptor running and the
    /// sender held back so tests can fill the queue first
    async fn start_link(
        queue_capacity: usize,
    ) -> (LinkHandle, FrameSender, SocketAddr, ShutdownTrigger, Shutdown) {
        let listener = TcpSimListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let link = Link::new(Some(Box::new(listener)), &settings(queue_capacity));
        let handle = link.handle();
        let (trigger, shutdown) = shutdown::channel();

        let acceptor = link.acceptor.unwrap();
        tokio::spawn(acceptor.run(shutdown.clone()));
        (handle, link.sender, addr, trigger, shutdown)
    }

    async fn wait_for_status(handle: &LinkHandle, status: LinkStatus) {
        timeout(Duration::from_secs(2), async {
            while handle.status() != status {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("link never became {status}"));
    }

    /// Read frames until `count` arrived or nothing more comes
    async fn read_distances(stream: &mut TcpStream, count: usize) -> Vec<u16> {
        let mut decoder = FrameDecoder::new();
        let mut distances = Vec::new();
        let mut buf = [0u8; 1024];

        while distances.len() < count {
            match timeout(Duration::from_millis(300), stream.read(&mut buf)).await {
                Ok(Ok(n)) if n > 0 => {
                    decoder.extend(&buf[..n]);
                    while let Some(reading) = decoder.decode_next().unwrap() {
                        distances.push(reading.distance_cm);
                    }
                }
                _ => break,
            }
        }
        distances
    }

    #[tokio::test]
    async fn test_enqueue_without_peer_is_dropped() {
        let (handle, _sender, _addr, _trigger, _shutdown) = start_link(2).await;

        assert_eq!(handle.status(), LinkStatus::Listening);
        assert_eq!(handle.enqueue(&reading(1)), EnqueueOutcome::NoPeer);
        assert_eq!(handle.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_frame_racing_disconnect_is_withdrawn() {
        let listener = TcpSimListener::bind("127.0.0.1:0").await.unwrap();
        let link = Link::new(Some(Box::new(listener)), &settings(2));
        let handle = link.handle();

        let first = handle.state.begin_session();
        handle.state.mark_connected(first);
        assert_eq!(handle.enqueue(&reading(1)), EnqueueOutcome::Queued);

        // Producer passed its connected check, then the peer went away
        let late = codec::encode(&reading(2)).unwrap();
        handle.state.close_session();
        handle.queue.clear();
        let outcome = handle.admit(Frame {
            session: first,
            bytes: late.clone(),
        });
        assert_eq!(outcome, EnqueueOutcome::NoPeer);
        assert_eq!(handle.queue_len(), 0);

        // A late frame from the old session must not purge the new one
        let second = handle.state.begin_session();
        handle.state.mark_connected(second);
        assert_eq!(handle.enqueue(&reading(3)), EnqueueOutcome::Queued);
        let outcome = handle.admit(Frame {
            session: first,
            bytes: late,
        });
        assert_eq!(outcome, EnqueueOutcome::NoPeer);
        assert_eq!(handle.queue_len(), 1);
        assert_eq!(handle.queue.try_pop().map(|f| f.session), Some(second));
    }

    #[tokio::test]
    async fn test_offline_link_spawns_nothing() {
        let (_trigger, shutdown) = shutdown::channel();
        let link = Link::new(None, &LinkSettings::default());
        let handle = link.handle();

        assert_eq!(handle.status(), LinkStatus::Offline);
        assert!(link.spawn(&shutdown).is_empty());
        assert_eq!(handle.enqueue(&reading(1)), EnqueueOutcome::NoPeer);
    }

    #[tokio::test]
    async fn test_frames_delivered_in_order() {
        let (handle, sender, addr, trigger, shutdown) = start_link(2).await;
        tokio::spawn(sender.run(shutdown.clone()));

        let mut peer = TcpStream::connect(addr).await.unwrap();
        wait_for_status(&handle, LinkStatus::Connected).await;

        let mut received = Vec::new();
        for distance in [10, 20, 30] {
            assert_ne!(handle.enqueue(&reading(distance)), EnqueueOutcome::NoPeer);
            received.extend(read_distances(&mut peer, 1).await);
        }
        assert_eq!(received, vec![10, 20, 30]);
        trigger.stop();
    }

    #[tokio::test]
    async fn test_full_queue_keeps_two_newest() {
        let (handle, sender, addr, trigger, shutdown) = start_link(2).await;

        let mut peer = TcpStream::connect(addr).await.unwrap();
        wait_for_status(&handle, LinkStatus::Connected).await;

        assert_eq!(handle.enqueue(&reading(1)), EnqueueOutcome::Queued);
        assert_eq!(handle.enqueue(&reading(2)), EnqueueOutcome::Queued);
        assert_eq!(handle.enqueue(&reading(3)), EnqueueOutcome::Evicted);
        assert_eq!(handle.queue_len(), 2);

        tokio::spawn(sender.run(shutdown.clone()));
        assert_eq!(read_distances(&mut peer, 3).await, vec![2, 3]);
        trigger.stop();
    }

    #[tokio::test]
    async fn test_single_slot_queue_sends_only_newest() {
        let (handle, sender, addr, trigger, shutdown) = start_link(1).await;

        let mut peer = TcpStream::connect(addr).await.unwrap();
        wait_for_status(&handle, LinkStatus::Connected).await;

        handle.enqueue(&reading(1));
        handle.enqueue(&reading(2));

        tokio::spawn(sender.run(shutdown.clone()));
        assert_eq!(read_distances(&mut peer, 2).await, vec![2]);
        trigger.stop();
    }

    #[tokio::test]
    async fn test_disconnect_purges_queue_for_next_peer() {
        let (handle, sender, addr, trigger, shutdown) = start_link(2).await;

        let first = TcpStream::connect(addr).await.unwrap();
        wait_for_status(&handle, LinkStatus::Connected).await;
        handle.enqueue(&reading(1));
        assert_eq!(handle.queue_len(), 1);

        drop(first);
        wait_for_status(&handle, LinkStatus::Listening).await;
        assert_eq!(handle.queue_len(), 0);

        tokio::spawn(sender.run(shutdown.clone()));
        let mut second = TcpStream::connect(addr).await.unwrap();
        wait_for_status(&handle, LinkStatus::Connected).await;
        handle.enqueue(&reading(9));

        assert_eq!(read_distances(&mut second, 2).await, vec![9]);
        trigger.stop();
    }

    #[tokio::test]
    async fn test_stop_releases_parked_acceptor() {
        let listener = TcpSimListener::bind("127.0.0.1:0").await.unwrap();
        let link = Link::new(Some(Box::new(listener)), &settings(2));
        let handle = link.handle();
        let (trigger, shutdown) = shutdown::channel();
        let tasks = link.spawn(&shutdown);

        trigger.stop();
        for (name, task) in tasks {
            timeout(Duration::from_secs(1), task)
                .await
                .unwrap_or_else(|_| panic!("{name} did not stop"))
                .unwrap();
        }
        assert_eq!(handle.status(), LinkStatus::Offline);
    }
}
