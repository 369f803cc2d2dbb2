//! Mock transport implementation for testing.
//!
//! Provides an in-memory device directory and channel factory so the
//! connection manager can be exercised without Bluetooth hardware.
//!
//! # Features
//!
//! - **Peer access**: every successful channel hands its far end to the test
//!   as a [`MockPeer`]
//! - **Failure injection**: connect failures, hanging connects, read and write errors
//! - **Call accounting**: discovery cancels, connect attempts, cancelled attempts

use crate::transport::traits::{ChannelFactory, DeviceDirectory, TransportStream};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bridge_shared::DeviceDescriptor;
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use uuid::Uuid;

/// Buffer size of the in-memory pipe
const PIPE_CAPACITY: usize = 64 * 1024;

/// In-memory directory of paired devices
#[derive(Debug, Default)]
pub struct MockDirectory {
    devices: Vec<DeviceDescriptor>,
    failure: Option<String>,
    discovery_cancels: AtomicUsize,
}

impl MockDirectory {
    /// Create a directory listing the given names (ids are synthetic)
    pub fn with_names(names: &[&str]) -> Self {
        Self {
            devices: names
                .iter()
                .enumerate()
                .map(|(i, name)| DeviceDescriptor::new(format!("mock-{}", i), *name))
                .collect(),
            ..Default::default()
        }
    }

    /// Create a directory whose listing always fails
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            failure: Some(reason.into()),
            ..Default::default()
        }
    }

    /// Number of `cancel_discovery` calls so far
    pub fn discovery_cancels(&self) -> usize {
        self.discovery_cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceDirectory for MockDirectory {
    async fn known_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        match &self.failure {
            Some(reason) => Err(anyhow!("{}", reason)),
            None => Ok(self.devices.clone()),
        }
    }

    async fn cancel_discovery(&self) {
        self.discovery_cancels.fetch_add(1, Ordering::SeqCst);
    }
}

/// How a mock connect attempt behaves
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockBehavior {
    /// Succeed with a fresh in-memory pipe
    Connect,
    /// Fail with the given message
    Fail(String),
    /// Never complete
    Hang,
}

/// The far end of a mock channel
pub struct MockPeer {
    /// Device the channel was opened to
    pub device: DeviceDescriptor,
    /// `true` if opened through the insecure path
    pub insecure: bool,
    /// Bytes written by the manager arrive here; bytes written here are read by the manager
    pub stream: DuplexStream,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
}

impl MockPeer {
    /// Make every subsequent read on the manager's side fail
    pub fn break_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }


    /// Make every subsequent write on the manager's side fail
    pub fn break_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }
}

/// Manager-side end of a mock channel
pub struct MockStream {
    inner: DuplexStream,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
}

impl AsyncRead for MockStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "mock link reset",
            )));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "mock link dropped",
            )));
        }
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
impl TransportStream for MockStream {
    async fn shutdown(&mut self) -> Result<()> {
        tokio::io::AsyncWriteExt::shutdown(&mut self.inner).await?;
        Ok(())
    }
}

/// Increments a counter when a pending attempt is dropped
struct CancelGuard(Arc<AtomicUsize>);

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Mock channel factory
pub struct MockChannelFactory {
    secure: Mutex<MockBehavior>,
    insecure: Mutex<MockBehavior>,
    peers: Mutex<VecDeque<MockPeer>>,
    secure_attempts: AtomicUsize,
    insecure_attempts: AtomicUsize,
    cancelled_attempts: Arc<AtomicUsize>,
}

impl Default for MockChannelFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChannelFactory {
    /// Factory whose secure and insecure paths both connect
    pub fn new() -> Self {
        Self::with_behavior(MockBehavior::Connect, MockBehavior::Connect)
    }

    /// Factory with explicit behaviour per path
    pub fn with_behavior(secure: MockBehavior, insecure: MockBehavior) -> Self {
        Self {
            secure: Mutex::new(secure),
            insecure: Mutex::new(insecure),
            peers: Mutex::new(VecDeque::new()),
            secure_attempts: AtomicUsize::new(0),
            insecure_attempts: AtomicUsize::new(0),
            cancelled_attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Change the secure-path behaviour for later attempts
    pub fn set_secure(&self, behavior: MockBehavior) {
        *self.secure.lock().unwrap_or_else(|e| e.into_inner()) = behavior;
    }

    /// Take the far end of the oldest unclaimed channel
    pub fn take_peer(&self) -> Option<MockPeer> {
        self.peers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    pub fn secure_attempts(&self) -> usize {
        self.secure_attempts.load(Ordering::SeqCst)
    }

    pub fn insecure_attempts(&self) -> usize {
        self.insecure_attempts.load(Ordering::SeqCst)
    }

    /// Attempts that were dropped before completing
    pub fn cancelled_attempts(&self) -> usize {
        self.cancelled_attempts.load(Ordering::SeqCst)
    }

    async fn attempt(
        &self,
        behavior: MockBehavior,
        device: &DeviceDescriptor,
        insecure: bool,
    ) -> Result<Box<dyn TransportStream>> {
        match behavior {
            MockBehavior::Connect => {
                let (near, far) = tokio::io::duplex(PIPE_CAPACITY);
                let fail_reads = Arc::new(AtomicBool::new(false));
                let fail_writes = Arc::new(AtomicBool::new(false));
                self.peers
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push_back(MockPeer {
                        device: device.clone(),
                        insecure,
                        stream: far,
                        fail_reads: fail_reads.clone(),
                        fail_writes: fail_writes.clone(),
                    });
                Ok(Box::new(MockStream {
                    inner: near,
                    fail_reads,
                    fail_writes,
                }))
            }
            MockBehavior::Fail(reason) => Err(anyhow!("{}", reason)),
            MockBehavior::Hang => {
                let _guard = CancelGuard(self.cancelled_attempts.clone());
                std::future::pending::<Result<Box<dyn TransportStream>>>().await
            }
        }
    }
}

#[async_trait]
impl ChannelFactory for MockChannelFactory {
    async fn open_secure(
        &self,
        device: &DeviceDescriptor,
        _service: Uuid,
    ) -> Result<Box<dyn TransportStream>> {
        self.secure_attempts.fetch_add(1, Ordering::SeqCst);
        let behavior = self.secure.lock().unwrap_or_else(|e| e.into_inner()).clone();
        self.attempt(behavior, device, false).await
    }

    async fn open_insecure(
        &self,
        device: &DeviceDescriptor,
        _channel: u8,
    ) -> Result<Box<dyn TransportStream>> {
        self.insecure_attempts.fetch_add(1, Ordering::SeqCst);
        let behavior = self.insecure.lock().unwrap_or_else(|e| e.into_inner()).clone();
        self.attempt(behavior, device, true).await
    }

    fn name(&self) -> &'static str {
        "Mock"
    }
}
