//! TCP listener, used in place of RFCOMM on hosts without Bluetooth

use super::traits::{AcceptedPeer, PeerListener};
use anyhow::Result;
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::net::{TcpListener, ToSocketAddrs};

/// Accepts monitor connections over TCP
pub struct TcpSimListener {
    inner: TcpListener,
}

impl TcpSimListener {
    /// Bind to the given address
    pub async fn bind(address: impl ToSocketAddrs) -> Result<Self> {
        let inner = TcpListener::bind(address).await?;
        Ok(Self { inner })
    }

    /// Get the bound address (useful when binding port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }
}

#[async_trait]
impl PeerListener for TcpSimListener {
    async fn accept(&mut self) -> Result<AcceptedPeer> {
        let (stream, addr) = self.inner.accept().await?;
        stream.set_nodelay(true)?;
        Ok(AcceptedPeer {
            stream: Box::new(stream),
            address: addr.to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "TCP"
    }
}
