//! Fusion configuration.
//!
//! All windows are in seconds and measured on the monotonic clock. The core
//! treats the values as read-only once a component is constructed.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

/// Confirmation and safety windows, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    /// Door must stay continuously closed this long before closure is confirmed
    pub door_close_confirm: f64,

    /// Monitoring is forcibly ended this long after the door opened
    pub max_monitoring: f64,

    /// A pending exit is confirmed after this long
    pub exit_confirmation: f64,

    /// Minimum dwell before a pending entry is confirmed
    pub entry_min: f64,

    /// A pending entry that never reaches `entry_min` is dropped after this long
    pub entry_max: f64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            door_close_confirm: 5.0,
            max_monitoring: 60.0,
            exit_confirmation: 3.0,
            entry_min: 3.0,
            entry_max: 8.0,
        }
    }
}

/// Detection thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdsConfig {
    /// GPS speed at or above this counts as movement (km/h)
    pub movement_kmh: f64,

    /// Proximity distance at or above this means the door is open (mm)
    pub door_distance_mm: u32,
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            movement_kmh: 3.0,
            door_distance_mm: 300,
        }
    }
}

/// Configuration of one vehicle's fusion core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Vehicle identifier stamped on passenger events
    pub device_id: String,

    pub timeouts: TimeoutsConfig,

    pub thresholds: ThresholdsConfig,

    /// Fusion tick period in milliseconds (default: 100)
    pub tick_interval_ms: u64,

    /// A track seen within this window counts as live (default: 2.0)
    pub track_live_secs: f64,

    /// Tracks unseen for longer than this are forgotten (default: 30.0)
    pub track_stale_secs: f64,

    /// Confidence reported on bulk-correction events (default: 0.85)
    pub bulk_confidence: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            device_id: "COMBI-DEFAULT".to_string(),
            timeouts: TimeoutsConfig::default(),
            thresholds: ThresholdsConfig::default(),
            tick_interval_ms: 100,
            track_live_secs: 2.0,
            track_stale_secs: 30.0,
            bulk_confidence: 0.85,
        }
    }
}

impl FusionConfig {
    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: FusionConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_json_str(&json)
    }

    /// Checks that every window is positive and the entry window is ordered.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.timeouts;
        let windows = [
            ("door_close_confirm", t.door_close_confirm),
            ("max_monitoring", t.max_monitoring),
            ("exit_confirmation", t.exit_confirmation),
            ("entry_min", t.entry_min),
            ("entry_max", t.entry_max),
            ("track_live_secs", self.track_live_secs),
            ("track_stale_secs", self.track_stale_secs),
            ("tick_interval_ms", self.tick_interval_ms as f64),
        ];

        for (field, value) in windows {
            if !(value > 0.0) {
                return Err(ConfigError::NonPositive { field, value });
            }
        }

        if t.entry_min > t.entry_max {
            return Err(ConfigError::EntryWindowInverted {
                entry_min: t.entry_min,
                entry_max: t.entry_max,
            });
        }

        if !(0.0..=1.0).contains(&self.bulk_confidence) {
            return Err(ConfigError::ConfidenceOutOfRange(self.bulk_confidence));
        }

        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Door-related windows as durations.
    pub fn door_timings(&self) -> DoorTimings {
        DoorTimings {
            close_confirm: Duration::from_secs_f64(self.timeouts.door_close_confirm),
            max_monitoring: Duration::from_secs_f64(self.timeouts.max_monitoring),
        }
    }

    /// Passenger-related windows as durations.
    pub fn passenger_timings(&self) -> PassengerTimings {
        PassengerTimings {
            entry_min: Duration::from_secs_f64(self.timeouts.entry_min),
            entry_max: Duration::from_secs_f64(self.timeouts.entry_max),
            exit_confirmation: Duration::from_secs_f64(self.timeouts.exit_confirmation),
            track_live: Duration::from_secs_f64(self.track_live_secs),
            track_stale: Duration::from_secs_f64(self.track_stale_secs),
        }
    }
}

/// Windows consumed by the door state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoorTimings {
    pub close_confirm: Duration,
    pub max_monitoring: Duration,
}

impl Default for DoorTimings {
    fn default() -> Self {
        FusionConfig::default().door_timings()
    }
}

/// Windows consumed by the passenger tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassengerTimings {
    pub entry_min: Duration,
    pub entry_max: Duration,
    pub exit_confirmation: Duration,
    pub track_live: Duration,
    pub track_stale: Duration,
}

impl Default for PassengerTimings {
    fn default() -> Self {
        FusionConfig::default().passenger_timings()
    }
}
