//! Ranging saturation policy

use super::{SensorDriver, SensorError, SensorKind};
use async_trait::async_trait;
use tracing::debug;

/// Map a raw range to the reported one: anything past the ceiling is
/// saturation or noise and reads as 0
pub fn sanitize_distance(raw_cm: u16, ceiling_cm: u16) -> u16 {
    if raw_cm > ceiling_cm {
        0
    } else {
        raw_cm
    }
}

/// Wraps a ranging driver and clamps saturated reads
pub struct Clamped<D> {
    inner: D,
    ceiling_cm: u16,
}

impl<D> Clamped<D> {
    pub fn new(inner: D, ceiling_cm: u16) -> Self {
        Self { inner, ceiling_cm }
    }
}

#[async_trait]
impl<D: SensorDriver<Value = u16>> SensorDriver for Clamped<D> {
    type Handle = D::Handle;
    type Value = u16;

    fn kind(&self) -> SensorKind {
        self.inner.kind()
    }

    async fn acquire(&self) -> Result<Self::Handle, SensorError> {
        self.inner.acquire().await
    }

    async fn read(&self, handle: &mut Self::Handle) -> Result<u16, SensorError> {
        let raw = self.inner.read(handle).await?;
        let distance = sanitize_distance(raw, self.ceiling_cm);
        if distance != raw {
            debug!("[SENSOR] range {} cm above ceiling, reporting 0", raw);
        }
        Ok(distance)
    }
}
