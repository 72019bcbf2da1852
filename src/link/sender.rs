//! Background frame delivery

use super::queue::{Frame, OutboundQueue};
use super::state::LinkState;
use super::traits::PeerStream;
use crate::shutdown::Shutdown;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Write half of a peer connection, tagged with its session
pub struct PeerWriter {
    session: u64,
    writer: WriteHalf<Box<dyn PeerStream>>,
}

impl PeerWriter {
    pub fn new(session: u64, writer: WriteHalf<Box<dyn PeerStream>>) -> Self {
        Self { session, writer }
    }

    async fn write_frame(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await
    }
}

/// Drains the outbound queue into the current peer
pub struct FrameSender {
    queue: Arc<OutboundQueue>,
    state: Arc<LinkState>,
    writers: mpsc::Receiver<PeerWriter>,
    poll_timeout: Duration,
    write_timeout: Duration,
}

impl FrameSender {
    pub(super) fn new(
        queue: Arc<OutboundQueue>,
        state: Arc<LinkState>,
        writers: mpsc::Receiver<PeerWriter>,
        poll_timeout: Duration,
        write_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            state,
            writers,
            poll_timeout,
            write_timeout,
        }
    }

    /// Send loop; returns once the running flag clears
    pub async fn run(mut self, mut shutdown: Shutdown) {
        let mut peer: Option<PeerWriter> = None;
        let mut sent: u64 = 0;

        while shutdown.is_running() {
            self.refresh_peer(&mut peer);

            let Some(frame) = self.queue.pop_timeout(self.poll_timeout).await else {
                continue;
            };

            // The peer may have changed while waiting
            self.refresh_peer(&mut peer);
            let Some(writer) = peer.as_mut() else {
                debug!("[SEND] No peer, dropping frame of session {}", frame.session);
                continue;
            };
            if !self.deliverable(&frame, writer.session) {
                debug!(
                    "[SEND] Dropping stale frame (session {}, current {})",
                    frame.session, writer.session
                );
                continue;
            }

            let session = writer.session;
            let outcome = tokio::select! {
                _ = shutdown.stopped() => break,
                outcome = timeout(self.write_timeout, writer.write_frame(&frame.bytes)) => outcome,
            };

            match outcome {
                Ok(Ok(())) => {
                    sent += 1;
                    debug!("[SEND] Frame {} delivered ({} bytes)", sent, frame.bytes.len());
                }
                Ok(Err(e)) => {
                    warn!("[SEND] Write failed on session {}: {}", session, e);
                    self.state.report_lost(session);
                    peer = None;
                }
                Err(_) => {
                    warn!(
                        "[SEND] Write timed out after {:?} on session {}",
                        self.write_timeout, session
                    );
                    self.state.report_lost(session);
                    peer = None;
                }
            }
        }

        info!("[SEND] Sender stopped ({} frames delivered)", sent);
    }

    fn deliverable(&self, frame: &Frame, writer_session: u64) -> bool {
        frame.session == writer_session && self.state.is_live(frame.session)
    }

    /// Pick up the newest handed-over writer and drop one whose session ended
    fn refresh_peer(&mut self, peer: &mut Option<PeerWriter>) {
        while let Ok(writer) = self.writers.try_recv() {
            *peer = Some(writer);
        }
        if peer
            .as_ref()
            .is_some_and(|writer| !self.state.is_live(writer.session))
        {
            *peer = None;
        }
    }
}
