//! Location fix and provider status types

use crate::now_ms;

/// Metres per second in one knot
pub const MPS_PER_KNOT: f32 = 0.514_444;

/// A position fix
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    /// Degrees, negative south
    pub latitude: f64,
    /// Degrees, negative west
    pub longitude: f64,
    /// Altitude above mean sea level
    pub altitude_m: Option<f64>,
    /// Ground speed
    pub speed_mps: Option<f32>,
    /// Course over ground, degrees true
    pub bearing_deg: Option<f32>,
    /// Satellites used in the fix
    pub satellites: Option<u8>,
    /// Horizontal dilution of precision
    pub hdop: Option<f32>,
    /// Time the fix was received (ms since Unix epoch)
    pub timestamp_ms: u64,
}

impl Location {
    /// Create a fix at the given coordinates, stamped now
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude_m: None,
            speed_mps: None,
            bearing_deg: None,
            satellites: None,
            hdop: None,
            timestamp_ms: now_ms(),
        }
    }
}

/// Availability of the location provider
///
/// The numeric codes are the ones reported to host applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderStatus {
    #[default]
    OutOfService = 0,
    TemporarilyUnavailable = 1,
    Available = 2,
}

impl ProviderStatus {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for ProviderStatus {
    type Error = i32;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(ProviderStatus::OutOfService),
            1 => Ok(ProviderStatus::TemporarilyUnavailable),
            2 => Ok(ProviderStatus::Available),
            other => Err(other),
        }
    }
}
