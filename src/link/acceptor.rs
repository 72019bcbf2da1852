//! Single-peer connection lifecycle

use super::queue::OutboundQueue;
use super::sender::PeerWriter;
use super::state::LinkState;
use super::traits::{AcceptedPeer, PeerListener, PeerStream};
use crate::shutdown::Shutdown;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, ReadHalf};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Why a peer session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Peer closed its end
    PeerClosed,
    /// Reading from the peer failed
    ReadFailed(String),
    /// The sender could not write to the peer
    WriteFailed,
    /// Service is stopping
    Stopped,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::PeerClosed => write!(f, "peer closed"),
            DisconnectReason::ReadFailed(e) => write!(f, "read failed: {}", e),
            DisconnectReason::WriteFailed => write!(f, "write failed"),
            DisconnectReason::Stopped => write!(f, "stopping"),
        }
    }
}

/// Waits for a peer, serves it until it goes away, then waits again
pub struct Acceptor {
    listener: Box<dyn PeerListener>,
    state: Arc<LinkState>,
    queue: Arc<OutboundQueue>,
    writers: mpsc::Sender<PeerWriter>,
    liveness: Duration,
}

impl Acceptor {
    pub(super) fn new(
        listener: Box<dyn PeerListener>,
        state: Arc<LinkState>,
        queue: Arc<OutboundQueue>,
        writers: mpsc::Sender<PeerWriter>,
        liveness: Duration,
    ) -> Self {
        Self {
            listener,
            state,
            queue,
            writers,
            liveness,
        }
    }

    /// Accept loop; returns once the running flag clears
    pub async fn run(mut self, mut shutdown: Shutdown) {
        info!("[LINK] Waiting for a peer via {}", self.listener.name());

        while shutdown.is_running() {
            let accepted = tokio::select! {
                _ = shutdown.stopped() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok(peer) => self.serve(peer, &mut shutdown).await,
                Err(e) => {
                    warn!("[LINK] Accept failed: {}", e);
                    // Keep a broken listener from spinning
                    tokio::select! {
                        _ = shutdown.stopped() => break,
                        _ = sleep(self.liveness) => {}
                    }
                }
            }
        }

        self.state.close_session();
        self.state.stop_listening();
        self.queue.clear();
        info!("[LINK] Acceptor stopped");
    }

    async fn serve(&mut self, peer: AcceptedPeer, shutdown: &mut Shutdown) {
        let session = self.state.begin_session();
        self.queue.clear();

        let (mut reader, writer) = tokio::io::split(peer.stream);
        if self.writers.send(PeerWriter::new(session, writer)).await.is_err() {
            warn!("[LINK] Sender is gone, dropping peer {}", peer.address);
            self.state.close_session();
            return;
        }

        self.state.mark_connected(session);
        info!("[LINK] Peer {} connected (session {})", peer.address, session);

        let reason =
            wait_for_disconnect(&self.state, self.liveness, &mut reader, shutdown).await;

        self.state.close_session();
        let purged = self.queue.clear();
        info!(
            "[LINK] Peer {} disconnected: {} ({} queued frames purged)",
            peer.address, reason, purged
        );
    }

}

/// Park until the session ends; inbound bytes are discarded.
/// Borrows only the shared state, since `Acceptor` is not `Sync`.
async fn wait_for_disconnect(
    state: &LinkState,
    liveness: Duration,
    reader: &mut ReadHalf<Box<dyn PeerStream>>,
    shutdown: &mut Shutdown,
) -> DisconnectReason {
    let mut buf = [0u8; 256];

    loop {
        tokio::select! {
            _ = shutdown.stopped() => return DisconnectReason::Stopped,
            read = reader.read(&mut buf) => match read {
                Ok(0) => return DisconnectReason::PeerClosed,
                Ok(n) => debug!("[LINK] Ignoring {} inbound bytes", n),
                Err(e) => return DisconnectReason::ReadFailed(e.to_string()),
            },
            // A permit can outlive the session that stored it
            _ = state.lost() => {
                if !state.is_connected() {
                    return DisconnectReason::WriteFailed;
                }
            }
            _ = sleep(liveness) => {
                if !state.is_connected() {
                    return DisconnectReason::WriteFailed;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::queue::Frame;
    use crate::link::tcp::TcpSimListener;
    use crate::shutdown;
    use bytes::Bytes;
    use tokio::net::TcpStream;
    use tokio::time::timeout;

    fn assert_send<T: Send>(_: &T) {}

    async fn wait_until(check: impl Fn() -> bool) {
        timeout(Duration::from_secs(2), async {
            while !check() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition never held");
    }

    #[tokio::test]
    async fn test_peer_close_ends_session_and_purges() {
        let listener = TcpSimListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(LinkState::new(true));
        let queue = Arc::new(OutboundQueue::new(2));
        let (writers_tx, mut writers_rx) = mpsc::channel(1);
        let acceptor = Acceptor::new(
            Box::new(listener),
            state.clone(),
            queue.clone(),
            writers_tx,
            Duration::from_millis(50),
        );
        let (trigger, shutdown) = shutdown::channel();

        let run = acceptor.run(shutdown);
        assert_send(&run);
        let task = tokio::spawn(run);

        let peer = TcpStream::connect(addr).await.unwrap();
        let writer = timeout(Duration::from_secs(2), writers_rx.recv())
            .await
            .expect("no write half handed over")
            .unwrap();
        wait_until(|| state.is_connected()).await;

        let session = state.session();
        queue.push(Frame {
            session,
            bytes: Bytes::from_static(b"{}\n"),
        });

        drop(peer);
        wait_until(|| !state.is_connected() && queue.len() == 0).await;
        assert!(!state.is_live(session));

        drop(writer);
        trigger.stop();
        timeout(Duration::from_secs(1), task)
            .await
            .expect("acceptor should stop")
            .unwrap();
    }
}
