//! RaceCapture Bridge Shared Types
//!
//! This crate provides the shared types and codecs used by the sensor bridge
//! and the device simulator: device descriptors, the link state machine,
//! the inbound line decoder and the NMEA sentence parser.

pub mod codec;
pub mod location;
pub mod nmea;
pub mod state_machine;

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub use codec::{CodecError, LineDecoder};
pub use location::{Location, ProviderStatus};
pub use state_machine::{LinkEvent, LinkState};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Serial link parameters
pub mod serial {
    use uuid::{uuid, Uuid};

    /// Standard Serial Port Profile service class
    pub const SERIAL_PORT_SERVICE_UUID: Uuid = uuid!("00001101-0000-1000-8000-00805F9B34FB");

    /// Upper bound for a single connection attempt
    pub const CONNECT_TIMEOUT_MS: u64 = 5000;

    /// RFCOMM channel used when connecting without a service lookup
    pub const INSECURE_RFCOMM_CHANNEL: u8 = 1;

    /// Chunk size for socket reads
    pub const READ_CHUNK_SIZE: usize = 1024;
}

/// A paired/known device as reported by the platform directory
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceDescriptor {
    /// Opaque platform identifier (MAC address, socket address, ...)
    pub id: String,
    /// Human-readable name
    pub name: String,
}

impl DeviceDescriptor {
    /// Create a new descriptor
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_display() {
        let device = DeviceDescriptor::new("00:11:22:33:44:55", "RaceCapturePro");
        assert_eq!(device.to_string(), "RaceCapturePro (00:11:22:33:44:55)");
    }

    #[test]
    fn test_spp_uuid() {
        assert_eq!(
            serial::SERIAL_PORT_SERVICE_UUID.to_string(),
            "00001101-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(serial::CONNECT_TIMEOUT_MS, 5000);
    }

    #[test]
    fn test_now_ms() {
        assert!(now_ms() > 0);
    }
}
