//! RFCOMM listener advertising the Serial Port Profile

use super::traits::{AcceptedPeer, PeerListener};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bluer::rfcomm::{Profile, ProfileHandle, Role};
use bluer::{Session, Uuid};
use futures::StreamExt;
use pathpal_shared::telemetry;
use tracing::info;

/// RFCOMM service registration settings
#[derive(Debug, Clone)]
pub struct RfcommConfig {
    /// Advertised service name
    pub service_name: String,
    /// RFCOMM channel to listen on
    pub channel: u8,
}

impl Default for RfcommConfig {
    fn default() -> Self {
        Self {
            service_name: telemetry::SERVICE_NAME.into(),
            channel: telemetry::DEFAULT_RFCOMM_CHANNEL,
        }
    }
}

impl RfcommConfig {
    /// The SPP profile to register with bluetoothd
    fn profile(&self) -> Profile {
        Profile {
            uuid: Uuid::from_u128(telemetry::SPP_SERVICE_UUID),
            name: Some(self.service_name.clone()),
            channel: Some(u16::from(self.channel)),
            role: Some(Role::Server),
            require_authentication: Some(false),
            require_authorization: Some(false),
            ..Default::default()
        }
    }
}

/// Accepts peers through a registered SPP profile
pub struct RfcommListener {
    // Keeps the D-Bus connection (and so the registration) alive
    _session: Session,
    handle: ProfileHandle,
}

impl RfcommListener {
    /// Power the default adapter and register the service.
    ///
    /// Fails when bluetoothd or an adapter is unavailable; the caller decides
    /// whether to run without a link.
    pub async fn register(config: &RfcommConfig) -> Result<Self> {
        let session = Session::new().await?;
        let adapter = session.default_adapter().await?;
        adapter.set_powered(true).await?;

        let handle = session.register_profile(config.profile()).await?;
        info!(
            "[LINK] Advertising '{}' on {} channel {}",
            config.service_name,
            adapter.name(),
            config.channel
        );

        Ok(Self {
            _session: session,
            handle,
        })
    }
}

#[async_trait]
impl PeerListener for RfcommListener {
    async fn accept(&mut self) -> Result<AcceptedPeer> {
        let request = self
            .handle
            .next()
            .await
            .ok_or_else(|| anyhow!("Profile registration ended"))?;
        let address = request.device().to_string();
        let stream = request.accept()?;
        Ok(AcceptedPeer {
            stream: Box::new(stream),
            address,
        })
    }

    fn name(&self) -> &'static str {
        "Bluetooth"
    }
}
