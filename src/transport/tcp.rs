//! TCP transport implementation for simulated serial devices
//!
//! Each simulated "paired device" is a name bound to a TCP address, so the
//! bridge can be exercised against `device-sim` without a radio.

use crate::transport::traits::{ChannelFactory, DeviceDirectory, TransportStream};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bridge_shared::DeviceDescriptor;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tracing::{debug, info};
use uuid::Uuid;

/// TCP stream wrapper implementing TransportStream
pub struct TcpTransportStream {
    inner: TcpStream,
}

impl TcpTransportStream {
    pub fn new(stream: TcpStream) -> Self {
        Self { inner: stream }
    }
}

impl AsyncRead for TcpTransportStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TcpTransportStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[async_trait]
impl TransportStream for TcpTransportStream {
    async fn shutdown(&mut self) -> Result<()> {
        tokio::io::AsyncWriteExt::shutdown(&mut self.inner).await?;
        Ok(())
    }
}

/// Fixed list of simulated devices
#[derive(Debug, Clone, Default)]
pub struct SimulatedDirectory {
    devices: Vec<DeviceDescriptor>,
}

impl SimulatedDirectory {
    /// Create a directory from `(name, address)` pairs
    pub fn new<I, N, A>(devices: I) -> Self
    where
        I: IntoIterator<Item = (N, A)>,
        N: Into<String>,
        A: Into<String>,
    {
        Self {
            devices: devices
                .into_iter()
                .map(|(name, address)| DeviceDescriptor::new(address, name))
                .collect(),
        }
    }
}

#[async_trait]
impl DeviceDirectory for SimulatedDirectory {
    async fn known_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        Ok(self.devices.clone())
    }

    async fn cancel_discovery(&self) {
        debug!("[SIM] No discovery to cancel");
    }
}

/// TCP connector standing in for RFCOMM
#[derive(Debug, Default)]
pub struct TcpChannelFactory;

impl TcpChannelFactory {
    pub fn new() -> Self {
        Self
    }

    async fn connect(&self, device: &DeviceDescriptor) -> Result<Box<dyn TransportStream>> {
        let stream = TcpStream::connect(&device.id)
            .await
            .map_err(|e| anyhow!("TCP connect to {} failed: {}", device.id, e))?;
        stream.set_nodelay(true)?;
        info!("[SIM] Connected to {}", device);
        Ok(Box::new(TcpTransportStream::new(stream)))
    }
}

#[async_trait]
impl ChannelFactory for TcpChannelFactory {
    async fn open_secure(
        &self,
        device: &DeviceDescriptor,
        service: Uuid,
    ) -> Result<Box<dyn TransportStream>> {
        debug!("[SIM] Ignoring service {} for {}", service, device.name);
        self.connect(device).await
    }

    async fn open_insecure(
        &self,
        device: &DeviceDescriptor,
        _channel: u8,
    ) -> Result<Box<dyn TransportStream>> {
        self.connect(device).await
    }

    fn name(&self) -> &'static str {
        "TCP simulation"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_shared::serial::SERIAL_PORT_SERVICE_UUID;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_simulated_directory() {
        let directory =
            SimulatedDirectory::new([("RaceCapturePro", "127.0.0.1:9000"), ("OBDLink", "127.0.0.1:9001")]);
        let devices = directory.known_devices().await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].name, "RaceCapturePro");
        assert_eq!(devices[0].id, "127.0.0.1:9000");
    }

    #[tokio::test]
    async fn test_tcp_channel_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
        });

        let device = DeviceDescriptor::new(addr.to_string(), "RaceCapturePro");
        let factory = TcpChannelFactory::new();
        let mut stream = factory
            .open_secure(&device, SERIAL_PORT_SERVICE_UUID)
            .await
            .expect("connect failed");

        stream.write_all(b"PING").await.unwrap();
        let mut echoed = [0u8; 4];
        stream.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"PING");
        assert_eq!(factory.name(), "TCP simulation");
    }

    #[tokio::test]
    async fn test_tcp_connect_failure() {
        // Bind then drop to get a port with nothing listening
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let device = DeviceDescriptor::new(addr.to_string(), "Gone");
        let result = TcpChannelFactory::new().open_insecure(&device, 1).await;
        assert!(result.is_err());
    }
}
