//! Connection management for the Bluetooth serial link
//!
//! This module handles:
//! - Resolving a paired device by name and opening one serial link to it
//! - Bounded, cancellable connection attempts over a secure or insecure channel
//! - Line-oriented reads and raw writes serialized behind one lock
//! - A blocking facade for hosts that poll from plain threads

pub mod blocking;
mod manager;

pub use blocking::BlockingConnectionManager;
pub use manager::{ConnectionConfig, ConnectionManager};
