//! Transport trait abstractions for the platform collaborators

use anyhow::Result;
use async_trait::async_trait;
use bridge_shared::DeviceDescriptor;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

/// A transport stream that can read and write bytes
#[async_trait]
pub trait TransportStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Close the transport gracefully
    async fn shutdown(&mut self) -> Result<()>;
}

/// Directory of paired/known devices
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Paired devices, in no particular order
    async fn known_devices(&self) -> Result<Vec<DeviceDescriptor>>;

    /// Stop any running device discovery. Fire-and-forget.
    async fn cancel_discovery(&self);
}

/// Factory for serial channels to a known device
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    /// Open an authenticated channel to the service record `service`
    async fn open_secure(
        &self,
        device: &DeviceDescriptor,
        service: Uuid,
    ) -> Result<Box<dyn TransportStream>>;

    /// Open an unauthenticated channel on a fixed RFCOMM channel
    async fn open_insecure(
        &self,
        device: &DeviceDescriptor,
        channel: u8,
    ) -> Result<Box<dyn TransportStream>>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
