//! GPS location bridge
//!
//! - `GpsConnection`: pollable view of the latest fix and provider status
//! - `NmeaSerialProvider`: NMEA receiver on a serial port

mod connection;
pub mod serial;

pub use connection::{GpsConfig, GpsConnection, LocationEvent, LocationProvider};
pub use serial::{FixAssembler, NmeaSerialProvider};
