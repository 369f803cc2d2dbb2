//! Bluetooth serial bridge for RaceCapture devices
//!
//! A single managed link to a paired device, exposed through a small
//! line-oriented API, plus a GPS bridge that tracks the latest fix.

pub mod connection;
pub mod error;
pub mod gps;
pub mod transport;

pub use connection::{BlockingConnectionManager, ConnectionConfig, ConnectionManager};
pub use error::{ConnectError, StreamError};
pub use gps::{GpsConfig, GpsConnection};
pub use transport::{BluetoothConfig, BluetoothMode};
