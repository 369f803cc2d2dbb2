//! RFCOMM transport implementation for Bluetooth serial connections

use crate::transport::traits::{ChannelFactory, TransportStream};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bluer::rfcomm::{
    Profile, ProfileHandle, ReqError, Role, Security, SecurityLevel, Socket,
    SocketAddr as RfcommAddr, Stream as RfcommStream,
};
use bluer::Address;
use bridge_shared::DeviceDescriptor;
use futures::StreamExt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// RFCOMM stream wrapper implementing TransportStream
pub struct RfcommTransportStream {
    inner: RfcommStream,
    peer_addr: Address,
    /// Registered client profile; BlueZ drops profile connections when it is unregistered
    _profile: Option<Box<ProfileHandle>>,
}

impl RfcommTransportStream {
    /// Create a new RFCOMM transport stream
    pub fn new(stream: RfcommStream, peer_addr: Address) -> Self {
        Self {
            inner: stream,
            peer_addr,
            _profile: None,
        }
    }

    fn with_profile(stream: RfcommStream, peer_addr: Address, profile: ProfileHandle) -> Self {
        Self {
            inner: stream,
            peer_addr,
            _profile: Some(Box::new(profile)),
        }
    }
}

impl AsyncRead for RfcommTransportStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for RfcommTransportStream {
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
impl TransportStream for RfcommTransportStream {
    async fn shutdown(&mut self) -> Result<()> {
        debug!("[BT] Closing RFCOMM link to {}", self.peer_addr);
        tokio::io::AsyncWriteExt::shutdown(&mut self.inner).await?;
        Ok(())
    }
}

/// Parse the descriptor id as a Bluetooth MAC address
pub fn device_address(device: &DeviceDescriptor) -> Result<Address> {
    device
        .id
        .parse::<Address>()
        .map_err(|e| anyhow!("invalid Bluetooth address {:?}: {}", device.id, e))
}

/// RFCOMM channel factory backed by BlueZ
#[derive(Debug, Default)]
pub struct RfcommChannelFactory;

impl RfcommChannelFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ChannelFactory for RfcommChannelFactory {
    async fn open_secure(
        &self,
        device: &DeviceDescriptor,
        service: Uuid,
    ) -> Result<Box<dyn TransportStream>> {
        let addr = device_address(device)?;
        info!("[BT] Creating socket in secure mode: {} service {}", addr, service);

        let session = bluer::Session::new().await?;
        let adapter = session.default_adapter().await?;

        // Client profile for the service record; BlueZ does the SDP lookup
        let profile = Profile {
            uuid: service,
            role: Some(Role::Client),
            require_authentication: Some(true),
            require_authorization: Some(false),
            auto_connect: Some(false),
            ..Default::default()
        };
        let mut handle = session.register_profile(profile).await?;
        let bt_device = adapter.device(addr)?;

        let connect = bt_device.connect_profile(&service);
        tokio::pin!(connect);
        let mut connect_done = false;

        let stream = loop {
            tokio::select! {
                res = &mut connect, if !connect_done => {
                    connect_done = true;
                    res.map_err(|e| anyhow!("profile connect failed: {}", e))?;
                }
                req = handle.next() => {
                    let req = req.ok_or_else(|| anyhow!("profile unregistered before connecting"))?;
                    if req.device() == addr {
                        break req.accept()?;
                    }
                    debug!("[BT] Rejecting profile connection from {}", req.device());
                    req.reject(ReqError::Rejected);
                }
            }
        };

        info!("[BT] Got a socket to {}", addr);
        Ok(Box::new(RfcommTransportStream::with_profile(stream, addr, handle)))
    }

    async fn open_insecure(
        &self,
        device: &DeviceDescriptor,
        channel: u8,
    ) -> Result<Box<dyn TransportStream>> {
        let addr = device_address(device)?;
        info!("[BT] Creating socket in insecure mode: {} channel {}", addr, channel);

        let socket = Socket::new()?;
        socket.set_security(Security {
            level: SecurityLevel::Low,
            key_size: 0,
        })?;

        let stream = socket
            .connect(RfcommAddr::new(addr, channel))
            .await
            .map_err(|e| anyhow!("RFCOMM connect failed: {}", e))?;

        info!("[BT] Connected to {}", addr);
        Ok(Box::new(RfcommTransportStream::new(stream, addr)))
    }

    fn name(&self) -> &'static str {
        "Bluetooth"
    }
}
