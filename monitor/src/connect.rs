//! Outbound connection to the edge device

use anyhow::{anyhow, Context, Result};
use bluer::rfcomm::{SocketAddr as RfcommAddr, Stream as RfcommStream};
use bluer::Address;
use std::fmt;
use tokio::io::AsyncRead;
use tokio::net::TcpStream;

/// Where the edge is reachable
#[derive(Debug, Clone)]
pub enum Target {
    Tcp(String),
    Rfcomm { address: Address, channel: u8 },
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Tcp(address) => write!(f, "tcp://{}", address),
            Target::Rfcomm { address, channel } => write!(f, "rfcomm://{}/{}", address, channel),
        }
    }
}

/// Readable half of a connection; the monitor never writes
pub type Inbound = Box<dyn AsyncRead + Send + Unpin>;

impl Target {
    /// Parse an RFCOMM target from a MAC address string
    pub fn rfcomm(address: &str, channel: u8) -> Result<Self> {
        let address: Address = address
            .parse()
            .map_err(|e| anyhow!("Invalid Bluetooth address '{}': {}", address, e))?;
        Ok(Target::Rfcomm { address, channel })
    }

    pub async fn connect(&self) -> Result<Inbound> {
        match self {
            Target::Tcp(address) => {
                let stream = TcpStream::connect(address)
                    .await
                    .with_context(|| format!("TCP connect to {} failed", address))?;
                Ok(Box::new(stream))
            }
            Target::Rfcomm { address, channel } => {
                let stream = RfcommStream::connect(RfcommAddr::new(*address, *channel))
                    .await
                    .map_err(|e| anyhow!("RFCOMM connect failed: {}", e))?;
                Ok(Box::new(stream))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rfcomm_target() {
        let target = Target::rfcomm("00:11:22:33:44:55", 1).unwrap();
        assert_eq!(target.to_string(), "rfcomm://00:11:22:33:44:55/1");
    }

    #[test]
    fn test_reject_bad_address() {
        assert!(Target::rfcomm("not-a-mac", 1).is_err());
    }

    #[tokio::test]
    async fn test_tcp_connect_refused() {
        // Port 1 on loopback is reliably closed in test environments
        let target = Target::Tcp("127.0.0.1:1".into());
        assert!(target.connect().await.is_err());
    }
}
