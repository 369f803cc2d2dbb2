//! Platform collaborators of the connection manager
//!
//! - `DeviceDirectory`: paired-device listing and discovery control
//! - `ChannelFactory`: secure/insecure serial channel establishment
//!
//! BlueZ (RFCOMM) and TCP simulation backends are provided, plus an
//! in-memory mock for tests.

pub mod bt_directory;
pub mod mock;
pub mod rfcomm;
pub mod tcp;
pub mod traits;

pub use bt_directory::BluezDirectory;
pub use rfcomm::{RfcommChannelFactory, RfcommTransportStream};
pub use tcp::{SimulatedDirectory, TcpChannelFactory, TcpTransportStream};
pub use traits::{ChannelFactory, DeviceDirectory, TransportStream};

use std::sync::Arc;

/// Bluetooth transport mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BluetoothMode {
    /// Use real RFCOMM Bluetooth (requires BlueZ)
    #[default]
    Rfcomm,
    /// Use TCP simulation (for development)
    TcpSimulation,
}

/// Bluetooth backend configuration
#[derive(Debug, Clone, Default)]
pub struct BluetoothConfig {
    /// Bluetooth transport mode
    pub mode: BluetoothMode,
    /// Simulated devices as `(name, tcp address)` (when mode is TcpSimulation)
    pub simulated_devices: Vec<(String, String)>,
}

impl BluetoothConfig {
    /// Build the directory and channel factory for the configured mode
    pub fn collaborators(&self) -> (Arc<dyn DeviceDirectory>, Arc<dyn ChannelFactory>) {
        match self.mode {
            BluetoothMode::Rfcomm => (
                Arc::new(BluezDirectory::new()),
                Arc::new(RfcommChannelFactory::new()),
            ),
            BluetoothMode::TcpSimulation => (
                Arc::new(SimulatedDirectory::new(self.simulated_devices.clone())),
                Arc::new(TcpChannelFactory::new()),
            ),
        }
    }
}
