//! Connection manager for a single named serial link

use crate::error::{ConnectError, StreamError};
use crate::transport::{ChannelFactory, DeviceDirectory, TransportStream};
use bridge_shared::{serial, DeviceDescriptor, LineDecoder, LinkEvent, LinkState};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Configuration for connection manager
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Upper bound for one connection attempt
    pub connect_timeout: Duration,
    /// Connect over an unauthenticated RFCOMM channel instead of the secure service
    pub allow_insecure_connections: bool,
    /// Service record requested on the secure path
    pub service_uuid: Uuid,
    /// RFCOMM channel used on the insecure path
    pub insecure_channel: u8,
    /// Bytes requested per socket read
    pub read_chunk_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(serial::CONNECT_TIMEOUT_MS),
            allow_insecure_connections: false,
            service_uuid: serial::SERIAL_PORT_SERVICE_UUID,
            insecure_channel: serial::INSECURE_RFCOMM_CHANNEL,
            read_chunk_size: serial::READ_CHUNK_SIZE,
        }
    }
}

/// An open link: both stream sides and the inbound line decoder
struct Link {
    device: DeviceDescriptor,
    stream: Box<dyn TransportStream>,
    decoder: LineDecoder,
    read_buf: Vec<u8>,
}

/// Owns at most one open serial link, selected by device name
///
/// Every operation except [`list_known_device_names`](Self::list_known_device_names)
/// runs under one lock, including blocking reads and the bounded connect.
pub struct ConnectionManager {
    config: ConnectionConfig,
    directory: Arc<dyn DeviceDirectory>,
    channels: Arc<dyn ChannelFactory>,
    link: Mutex<Option<Link>>,
    state_tx: watch::Sender<LinkState>,
}

impl ConnectionManager {
    /// Create a closed connection manager
    pub fn new(
        config: ConnectionConfig,
        directory: Arc<dyn DeviceDirectory>,
        channels: Arc<dyn ChannelFactory>,
    ) -> Self {
        let (state_tx, _) = watch::channel(LinkState::Closed);
        Self {
            config,
            directory,
            channels,
            link: Mutex::new(None),
            state_tx,
        }
    }

    /// Open a link to the paired device called `name`
    ///
    /// An already open link is closed first. On failure the manager is closed.
    pub async fn open(&self, name: &str) -> Result<(), ConnectError> {
        let mut link = self.link.lock().await;

        if link.is_some() {
            info!("[BT] Closing current connection before opening {}", name);
            self.teardown(&mut link, LinkEvent::CloseRequested).await;
        }

        match self.connect(name).await {
            Ok(new_link) => {
                info!("[BT] Socket ready: {} via {}", new_link.device, self.channels.name());
                *link = Some(new_link);
                self.transition(LinkEvent::OpenSucceeded);
                Ok(())
            }
            Err(e) => {
                warn!("[BT] {}", e);
                self.transition(LinkEvent::OpenFailed);
                Err(e)
            }
        }
    }

    /// Close the link. Safe to call when already closed.
    pub async fn close(&self) {
        let mut link = self.link.lock().await;
        if link.is_some() {
            info!("[BT] Closing socket");
        }
        self.teardown(&mut link, LinkEvent::CloseRequested).await;
    }

    /// Check if a link is open
    pub async fn is_open(&self) -> bool {
        self.link.lock().await.is_some()
    }

    /// Device of the open link, if any
    pub async fn connected_device(&self) -> Option<DeviceDescriptor> {
        self.link.lock().await.as_ref().map(|l| l.device.clone())
    }

    /// Next inbound line, or `None` when closed, at end of stream, or on error
    ///
    /// Blocks until a full line or end of stream arrives.
    pub async fn read_line(&self) -> Option<String> {
        match self.try_read_line().await {
            Ok(line) => line,
            Err(StreamError::NotOpen) => None,
            Err(e) => {
                debug!("[BT] Read failed: {}", e);
                None
            }
        }
    }

    /// Next inbound line with the failure reason exposed
    ///
    /// `Ok(None)` means the peer ended the stream. Read errors do not close
    /// the link.
    pub async fn try_read_line(&self) -> Result<Option<String>, StreamError> {
        let mut guard = self.link.lock().await;
        let link = guard.as_mut().ok_or(StreamError::NotOpen)?;

        loop {
            if let Some(line) = link.decoder.decode_next()? {
                return Ok(Some(line));
            }

            let n = link.stream.read(&mut link.read_buf).await?;
            if n == 0 {
                return Ok(link.decoder.finish());
            }
            link.decoder.extend(&link.read_buf[..n]);
        }
    }

    /// Write `data` to the link; `false` if closed or the write failed
    ///
    /// A failed write closes the link.
    pub async fn write(&self, data: &str) -> bool {
        self.try_write(data).await.is_ok()
    }

    /// Write `data` with the failure reason exposed
    pub async fn try_write(&self, data: &str) -> Result<(), StreamError> {
        let mut guard = self.link.lock().await;
        let link = guard.as_mut().ok_or(StreamError::NotOpen)?;

        let result = async {
            link.stream.write_all(data.as_bytes()).await?;
            link.stream.flush().await
        }
        .await;

        if let Err(e) = result {
            warn!("[BT] Error writing data {:?}: {}", data, e);
            self.teardown(&mut guard, LinkEvent::WriteFailed).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Names of paired devices, in no particular order
    ///
    /// Does not take the manager lock. A directory failure yields an empty list.
    pub async fn list_known_device_names(&self) -> Vec<String> {
        match self.directory.known_devices().await {
            Ok(devices) => devices.into_iter().map(|d| d.name).collect(),
            Err(e) => {
                warn!("[BT] Could not list paired devices: {}", e);
                Vec::new()
            }
        }
    }

    /// Watch link state changes
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }

    /// Last published link state
    pub fn state(&self) -> LinkState {
        *self.state_tx.borrow()
    }

    /// Resolve `name` and establish a channel within the connect timeout
    async fn connect(&self, name: &str) -> Result<Link, ConnectError> {
        self.directory.cancel_discovery().await;

        let devices = self
            .directory
            .known_devices()
            .await
            .map_err(|e| ConnectError::failure(name, e))?;

        let device = devices
            .into_iter()
            .find(|d| d.name == name)
            .ok_or_else(|| ConnectError::DeviceNotFound {
                name: name.to_string(),
            })?;

        info!("[BT] Trying {}", device);

        // Dropping the attempt on timeout cancels it; nothing can publish a
        // stream after the deadline.
        let stream = match timeout(self.config.connect_timeout, self.establish(&device)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(ConnectError::failure(name, e)),
            Err(_) => {
                return Err(ConnectError::ConnectTimeout {
                    name: name.to_string(),
                    timeout: self.config.connect_timeout,
                })
            }
        };

        Ok(Link {
            device,
            stream,
            decoder: LineDecoder::new(),
            read_buf: vec![0u8; self.config.read_chunk_size.max(1)],
        })
    }

    async fn establish(&self, device: &DeviceDescriptor) -> anyhow::Result<Box<dyn TransportStream>> {
        if self.config.allow_insecure_connections {
            info!(
                "[BT] Using insecure channel {} for {}",
                self.config.insecure_channel, device
            );
            self.channels
                .open_insecure(device, self.config.insecure_channel)
                .await
        } else {
            self.channels
                .open_secure(device, self.config.service_uuid)
                .await
        }
    }

    /// Shut down and clear the link (if any), then publish `event`
    async fn teardown(&self, link: &mut Option<Link>, event: LinkEvent) {
        if let Some(mut old) = link.take() {
            if let Err(e) = TransportStream::shutdown(old.stream.as_mut()).await {
                debug!("[BT] Ignoring close error on {}: {}", old.device, e);
            }
        }
        self.transition(event);
    }

    fn transition(&self, event: LinkEvent) {
        self.state_tx.send_if_modified(|state| {
            let next = state.on_event(event);
            let changed = next != *state;
            *state = next;
            changed
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockBehavior, MockChannelFactory, MockDirectory};
    use bridge_shared::codec::{CodecError, MAX_LINE_LENGTH};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn manager_with(
        names: &[&str],
        channels: MockChannelFactory,
        config: ConnectionConfig,
    ) -> (Arc<ConnectionManager>, Arc<MockDirectory>, Arc<MockChannelFactory>) {
        let directory = Arc::new(MockDirectory::with_names(names));
        let channels = Arc::new(channels);
        let manager = Arc::new(ConnectionManager::new(
            config,
            directory.clone(),
            channels.clone(),
        ));
        (manager, directory, channels)
    }

    fn default_manager() -> (Arc<ConnectionManager>, Arc<MockDirectory>, Arc<MockChannelFactory>) {
        manager_with(
            &["RaceCapturePro", "OBDLink"],
            MockChannelFactory::new(),
            ConnectionConfig::default(),
        )
    }

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_millis(5000));
        assert!(!config.allow_insecure_connections);
        assert_eq!(config.service_uuid, serial::SERIAL_PORT_SERVICE_UUID);
        assert_eq!(config.insecure_channel, 1);
    }

    #[tokio::test]
    async fn test_closed_manager() {
        let (manager, _, _) = default_manager();

        assert!(!manager.is_open().await);
        assert_eq!(manager.state(), LinkState::Closed);
        assert!(manager.read_line().await.is_none());
        assert!(!manager.write("PING\r\n").await);
        assert!(matches!(
            manager.try_write("PING\r\n").await,
            Err(StreamError::NotOpen)
        ));
        assert!(!manager.is_open().await);
    }

    #[tokio::test]
    async fn test_ping_pong_session() {
        let (manager, _, channels) = default_manager();

        manager.open("RaceCapturePro").await.expect("open failed");
        assert!(manager.is_open().await);
        assert_eq!(manager.state(), LinkState::Open);

        let mut peer = channels.take_peer().expect("no channel opened");
        assert_eq!(peer.device.name, "RaceCapturePro");
        assert!(!peer.insecure);

        let responder = tokio::spawn(async move {
            let mut request = [0u8; 6];
            peer.stream.read_exact(&mut request).await.unwrap();
            assert_eq!(&request, b"PING\r\n");
            peer.stream.write_all(b"PONG\r\n").await.unwrap();
            peer
        });

        assert!(manager.write("PING\r\n").await);
        assert_eq!(manager.read_line().await.as_deref(), Some("PONG"));
        let _peer = responder.await.unwrap();

        manager.close().await;
        assert!(!manager.is_open().await);
        assert_eq!(manager.state(), LinkState::Closed);
    }

    #[tokio::test]
    async fn test_unknown_device() {
        let (manager, _, channels) =
            manager_with(&[], MockChannelFactory::new(), ConnectionConfig::default());

        let err = manager.open("Anything").await.unwrap_err();
        assert!(matches!(err, ConnectError::DeviceNotFound { ref name } if name == "Anything"));
        assert!(!manager.is_open().await);
        assert_eq!(channels.secure_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_cancels_attempt() {
        let (manager, _, channels) = manager_with(
            &["RaceCapturePro"],
            MockChannelFactory::with_behavior(MockBehavior::Hang, MockBehavior::Hang),
            ConnectionConfig::default(),
        );

        let err = manager.open("RaceCapturePro").await.unwrap_err();
        assert!(matches!(
            err,
            ConnectError::ConnectTimeout { timeout: waited, .. } if waited == Duration::from_millis(5000)
        ));
        assert!(!manager.is_open().await);
        assert_eq!(channels.cancelled_attempts(), 1);

        // A later attempt is unaffected by the abandoned one
        channels.set_secure(MockBehavior::Connect);
        manager.open("RaceCapturePro").await.expect("reopen failed");
        assert!(manager.is_open().await);
    }

    #[tokio::test]
    async fn test_connect_failure_reports_cause() {
        let (manager, _, channels) = manager_with(
            &["OBDLink"],
            MockChannelFactory::with_behavior(
                MockBehavior::Fail("Host is down".into()),
                MockBehavior::Connect,
            ),
            ConnectionConfig::default(),
        );

        let err = manager.open("OBDLink").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error opening Bluetooth port OBDLink: Host is down"
        );
        assert!(!manager.is_open().await);
        assert_eq!(channels.insecure_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_insecure_channel_when_allowed() {
        let config = ConnectionConfig {
            allow_insecure_connections: true,
            ..Default::default()
        };
        // The secure path would never complete; it must not be tried at all
        let (manager, _, channels) = manager_with(
            &["OBDLink"],
            MockChannelFactory::with_behavior(MockBehavior::Hang, MockBehavior::Connect),
            config,
        );

        manager.open("OBDLink").await.expect("insecure open failed");
        assert!(manager.is_open().await);
        assert_eq!(channels.secure_attempts(), 0);
        assert_eq!(channels.insecure_attempts(), 1);
        assert!(channels.take_peer().unwrap().insecure);
    }

    #[tokio::test]
    async fn test_write_failure_closes_link() {
        let (manager, _, channels) = default_manager();
        let mut states = manager.subscribe();

        manager.open("OBDLink").await.unwrap();
        let peer = channels.take_peer().unwrap();
        peer.break_writes();

        assert!(!manager.write("PING\r\n").await);
        assert!(!manager.is_open().await);
        assert!(manager.connected_device().await.is_none());
        assert_eq!(*states.borrow_and_update(), LinkState::Closed);

        // Still closed; writes are rejected without touching a stream
        assert!(matches!(
            manager.try_write("PING\r\n").await,
            Err(StreamError::NotOpen)
        ));
    }

    #[tokio::test]
    async fn test_reopen_closes_previous_link() {
        let (manager, _, channels) = default_manager();

        manager.open("RaceCapturePro").await.unwrap();
        let mut first = channels.take_peer().unwrap();

        manager.open("OBDLink").await.unwrap();
        assert_eq!(
            manager.connected_device().await.map(|d| d.name),
            Some("OBDLink".to_string())
        );

        // The first link's far end sees end of stream
        let mut buf = [0u8; 8];
        assert_eq!(first.stream.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_reopen_leaves_closed() {
        let (manager, _, channels) = default_manager();

        manager.open("RaceCapturePro").await.unwrap();
        channels.set_secure(MockBehavior::Fail("refused".into()));

        assert!(manager.open("OBDLink").await.is_err());
        assert!(!manager.is_open().await);
        assert_eq!(manager.state(), LinkState::Closed);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (manager, _, _) = default_manager();
        manager.close().await;
        manager.open("OBDLink").await.unwrap();
        manager.close().await;
        manager.close().await;
        assert!(!manager.is_open().await);
    }

    #[tokio::test]
    async fn test_open_cancels_discovery() {
        let (manager, directory, _) = default_manager();
        manager.open("OBDLink").await.unwrap();
        let _ = manager.open("Missing").await;
        assert_eq!(directory.discovery_cancels(), 2);
    }

    #[tokio::test]
    async fn test_end_of_stream_flushes_partial_line() {
        let (manager, _, channels) = default_manager();
        manager.open("RaceCapturePro").await.unwrap();

        let mut peer = channels.take_peer().unwrap();
        peer.stream.write_all(b"line\r\npartial").await.unwrap();
        drop(peer);

        assert_eq!(manager.read_line().await.as_deref(), Some("line"));
        assert_eq!(manager.read_line().await.as_deref(), Some("partial"));
        assert!(manager.read_line().await.is_none());
        assert!(matches!(manager.try_read_line().await, Ok(None)));
        assert!(manager.is_open().await);
    }

    #[tokio::test]
    async fn test_read_error_keeps_link_open() {
        let (manager, _, channels) = default_manager();
        manager.open("RaceCapturePro").await.unwrap();

        let peer = channels.take_peer().unwrap();
        peer.break_reads();

        assert!(manager.read_line().await.is_none());
        assert!(matches!(
            manager.try_read_line().await,
            Err(StreamError::Io(_))
        ));
        assert!(manager.is_open().await);
        assert_eq!(manager.state(), LinkState::Open);
    }

    #[tokio::test]
    async fn test_overlong_line_is_a_codec_error() {
        let (manager, _, channels) = default_manager();
        manager.open("RaceCapturePro").await.unwrap();

        let mut peer = channels.take_peer().unwrap();
        let writer = tokio::spawn(async move {
            peer.stream
                .write_all(&vec![b'x'; MAX_LINE_LENGTH + 1])
                .await
                .unwrap();
            peer
        });

        let err = loop {
            match manager.try_read_line().await {
                Err(e) => break e,
                Ok(line) => panic!("unexpected line {:?}", line),
            }
        };
        assert!(matches!(err, StreamError::Codec(CodecError::LineTooLong(_))));
        assert!(manager.is_open().await);

        // The stream recovers once the oversized data is dropped
        let mut peer = writer.await.unwrap();
        peer.stream.write_all(b"PONG\r\n").await.unwrap();
        assert_eq!(manager.read_line().await.as_deref(), Some("PONG"));
    }

    #[tokio::test]
    async fn test_directory_failure() {
        let directory = Arc::new(MockDirectory::failing("adapter not available"));
        let manager = ConnectionManager::new(
            ConnectionConfig::default(),
            directory,
            Arc::new(MockChannelFactory::new()),
        );

        let err = manager.open("RaceCapturePro").await.unwrap_err();
        assert!(err.to_string().contains("adapter not available"));
        assert!(manager.list_known_device_names().await.is_empty());
    }

    #[tokio::test]
    async fn test_list_known_device_names() {
        let (manager, _, _) = default_manager();
        let mut names = manager.list_known_device_names().await;
        names.sort();
        assert_eq!(names, vec!["OBDLink", "RaceCapturePro"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_write_and_close() {
        for _ in 0..50 {
            let (manager, _, channels) = default_manager();
            manager.open("RaceCapturePro").await.unwrap();
            let _peer = channels.take_peer().unwrap();

            let writer = {
                let manager = manager.clone();
                tokio::spawn(async move { manager.write("PING\r\n").await })
            };
            let closer = {
                let manager = manager.clone();
                tokio::spawn(async move { manager.close().await })
            };

            let _ = writer.await.unwrap();
            closer.await.unwrap();

            // close always ran, so the link is fully gone whichever won
            assert!(!manager.is_open().await);
            assert!(manager.connected_device().await.is_none());
            assert_eq!(manager.state(), LinkState::Closed);
        }
    }

    #[tokio::test]
    async fn test_state_notifications() {
        let (manager, _, _) = default_manager();
        let mut states = manager.subscribe();

        manager.open("OBDLink").await.unwrap();
        states.changed().await.unwrap();
        assert_eq!(*states.borrow_and_update(), LinkState::Open);

        manager.close().await;
        states.changed().await.unwrap();
        assert_eq!(*states.borrow_and_update(), LinkState::Closed);
    }
}
