//! Listener abstraction for pluggable peer transports

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// A bidirectional byte stream to one peer
pub trait PeerStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> PeerStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// A peer that just connected
pub struct AcceptedPeer {
    pub stream: Box<dyn PeerStream>,
    /// Transport-specific peer address, for logging
    pub address: String,
}

/// Source of incoming peer connections
#[async_trait]
pub trait PeerListener: Send {
    /// Wait for the next peer
    async fn accept(&mut self) -> Result<AcceptedPeer>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
