//! Blocking facade for hosts that poll from plain threads

use super::manager::{ConnectionConfig, ConnectionManager};
use crate::error::{ConnectError, StreamError};
use crate::transport::{ChannelFactory, DeviceDirectory};
use anyhow::Result;
use bridge_shared::{DeviceDescriptor, LinkState};
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};

/// Synchronous wrapper over [`ConnectionManager`]
///
/// Owns its own runtime; every call blocks the calling thread. Must not be
/// used from inside an async context.
pub struct BlockingConnectionManager {
    runtime: Runtime,
    inner: Arc<ConnectionManager>,
}

impl BlockingConnectionManager {
    /// Create a closed manager with a dedicated runtime
    pub fn new(
        config: ConnectionConfig,
        directory: Arc<dyn DeviceDirectory>,
        channels: Arc<dyn ChannelFactory>,
    ) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("bt-bridge")
            .enable_all()
            .build()?;
        Ok(Self {
            runtime,
            inner: Arc::new(ConnectionManager::new(config, directory, channels)),
        })
    }

    pub fn open(&self, name: &str) -> Result<(), ConnectError> {
        self.runtime.block_on(self.inner.open(name))
    }

    pub fn close(&self) {
        self.runtime.block_on(self.inner.close())
    }

    pub fn is_open(&self) -> bool {
        self.runtime.block_on(self.inner.is_open())
    }

    pub fn read_line(&self) -> Option<String> {
        self.runtime.block_on(self.inner.read_line())
    }

    pub fn try_read_line(&self) -> Result<Option<String>, StreamError> {
        self.runtime.block_on(self.inner.try_read_line())
    }

    pub fn write(&self, data: &str) -> bool {
        self.runtime.block_on(self.inner.write(data))
    }

    pub fn try_write(&self, data: &str) -> Result<(), StreamError> {
        self.runtime.block_on(self.inner.try_write(data))
    }

    pub fn list_known_device_names(&self) -> Vec<String> {
        self.runtime.block_on(self.inner.list_known_device_names())
    }

    pub fn connected_device(&self) -> Option<DeviceDescriptor> {
        self.runtime.block_on(self.inner.connected_device())
    }

    pub fn state(&self) -> LinkState {
        self.inner.state()
    }

    /// The async manager, for callers that also run async code
    pub fn manager(&self) -> Arc<ConnectionManager> {
        self.inner.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockChannelFactory, MockDirectory};
    use std::thread;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn blocking_manager() -> (Arc<BlockingConnectionManager>, Arc<MockChannelFactory>) {
        let channels = Arc::new(MockChannelFactory::new());
        let manager = BlockingConnectionManager::new(
            ConnectionConfig::default(),
            Arc::new(MockDirectory::with_names(&["RaceCapturePro", "OBDLink"])),
            channels.clone(),
        )
        .expect("runtime");
        (Arc::new(manager), channels)
    }

    #[test]
    fn test_blocking_ping_pong() {
        let (manager, channels) = blocking_manager();
        assert!(!manager.is_open());

        manager.open("RaceCapturePro").expect("open failed");
        assert!(manager.is_open());

        let mut peer = channels.take_peer().unwrap();

        // Drive the far end on the manager's runtime
        let responder = manager.runtime.spawn(async move {
            let mut request = [0u8; 6];
            peer.stream.read_exact(&mut request).await.unwrap();
            peer.stream.write_all(b"PONG\r\n").await.unwrap();
            (peer, request)
        });

        assert!(manager.write("PING\r\n"));
        assert_eq!(manager.read_line().as_deref(), Some("PONG"));
        let (_peer, request) = manager.runtime.block_on(responder).unwrap();
        assert_eq!(&request, b"PING\r\n");

        manager.close();
        assert!(!manager.is_open());
        assert!(manager.read_line().is_none());
    }

    #[test]
    fn test_blocking_calls_from_many_threads() {
        let (manager, _) = blocking_manager();
        manager.open("OBDLink").unwrap();

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let manager = manager.clone();
                thread::spawn(move || {
                    if i == 3 {
                        manager.close();
                    } else {
                        let _ = manager.write("PING\r\n");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(!manager.is_open());
        assert_eq!(manager.state(), LinkState::Closed);
    }

    #[test]
    fn test_blocking_unknown_device() {
        let (manager, _) = blocking_manager();
        assert!(matches!(
            manager.open("Anything"),
            Err(ConnectError::DeviceNotFound { .. })
        ));
        let mut names = manager.list_known_device_names();
        names.sort();
        assert_eq!(names, vec!["OBDLink", "RaceCapturePro"]);
    }
}
