//! Common types for the transit environment abstraction.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Identifier of one simulated vehicle.
///
/// Every vehicle instance runs its own isolated fusion core; the device id
/// is what ties its published events back to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    /// Creates a DeviceId from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates the fleet-style identifier for the vehicle at `index`.
    ///
    /// `from_index(7)` yields `BUS-0007`.
    pub fn from_index(index: usize) -> Self {
        Self(format!("BUS-{:04}", index))
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new("COMBI-DEFAULT")
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single instant as seen by both clocks.
///
/// `monotonic` drives every window and timeout; `unix_ms` is only copied
/// into outbound event timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Moment {
    /// Time since context creation
    pub monotonic: Duration,

    /// Wall-clock milliseconds since the Unix epoch
    pub unix_ms: u64,
}

impl Moment {
    /// Builds a synthetic moment whose wall clock mirrors the monotonic one.
    pub fn at(monotonic: Duration) -> Self {
        Self {
            monotonic,
            unix_ms: monotonic.as_millis() as u64,
        }
    }

    /// Builds a synthetic moment `secs` seconds after context creation.
    pub fn at_secs(secs: f64) -> Self {
        Self::at(Duration::from_secs_f64(secs))
    }

    /// Time elapsed since an earlier monotonic instant (zero if in the past).
    pub fn since(&self, earlier: Duration) -> Duration {
        self.monotonic.saturating_sub(earlier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_from_index() {
        assert_eq!(DeviceId::from_index(7).as_str(), "BUS-0007");
        assert_eq!(DeviceId::from_index(1234).to_string(), "BUS-1234");
    }

    #[test]
    fn test_moment_since_saturates() {
        let moment = Moment::at_secs(2.0);
        assert_eq!(moment.since(Duration::from_secs(1)), Duration::from_secs(1));
        assert_eq!(moment.since(Duration::from_secs(5)), Duration::ZERO);
    }
}
