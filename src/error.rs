//! Error types for the bridge
//!
//! `open` reports why a connection could not be made. Stream errors are only
//! surfaced through the `try_*` operations; the polling operations degrade
//! them to `None`/`false`.

use bridge_shared::CodecError;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Why `open` failed
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Error opening Bluetooth port {name}: no paired device with that name")]
    DeviceNotFound { name: String },

    #[error("Error opening Bluetooth port {name}: connection timed out after {}ms", .timeout.as_millis())]
    ConnectTimeout { name: String, timeout: Duration },

    #[error("Error opening Bluetooth port {name}: {cause}")]
    ConnectFailure { name: String, cause: String },
}

impl ConnectError {
    /// Build a `ConnectFailure`, substituting "unknown" for an empty cause
    pub fn failure(name: &str, cause: impl ToString) -> Self {
        let cause = cause.to_string();
        Self::ConnectFailure {
            name: name.to_string(),
            cause: if cause.trim().is_empty() {
                "unknown".into()
            } else {
                cause
            },
        }
    }
}

/// Read/write failure on an open link
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("No connection is open")]
    NotOpen,

    #[error("Stream I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Line decode error: {0}")]
    Codec(#[from] CodecError),
}
