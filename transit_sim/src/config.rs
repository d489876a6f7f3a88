//! Simulation configuration: the fusion core settings plus sensor rates,
//! motion thresholds and the route.

use serde::{Deserialize, Serialize};
use std::path::Path;

use transit_core::FusionConfig;

use crate::error::SimError;

/// A straight route between two coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    pub name: String,
    pub start_lat: f64,
    pub start_lon: f64,
    pub end_lat: f64,
    pub end_lon: f64,

    /// Route length in km; progress advances by distance over this
    pub length_km: f64,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            name: "Route 5 - Downtown".to_string(),
            start_lat: 19.4326,
            start_lon: -99.1332,
            end_lat: 19.4426,
            end_lon: -99.1232,
            length_km: 10.0,
        }
    }
}

impl RouteConfig {
    /// Linear interpolation along the route, progress clamped to [0, 1].
    pub fn position_at(&self, progress: f64) -> (f64, f64) {
        let p = progress.clamp(0.0, 1.0);
        (
            self.start_lat + (self.end_lat - self.start_lat) * p,
            self.start_lon + (self.end_lon - self.start_lon) * p,
        )
    }

    /// Heading from start to end in degrees [0, 360).
    pub fn course_deg(&self) -> f64 {
        let angle = (self.end_lon - self.start_lon)
            .atan2(self.end_lat - self.start_lat)
            .to_degrees();
        if angle < 0.0 {
            angle + 360.0
        } else {
            angle
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpsConfig {
    pub frequency_hz: f64,
    pub altitude_m: f64,
    pub satellites: u8,
    pub fix_quality: u8,
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 1.0,
            altitude_m: 2240.0,
            satellites: 8,
            fix_quality: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    pub frequency_hz: f64,

    /// Smoothed |acceleration| above this is "accelerating" (m/s²)
    pub accel_threshold: f64,

    /// |yaw rate| above this is "turning" (°/s)
    pub turn_threshold: f64,

    /// Rolling window of the smoothed acceleration, in samples
    pub smoothing_window: usize,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 2.0,
            accel_threshold: 0.8,
            turn_threshold: 30.0,
            smoothing_window: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProximityConfig {
    pub frequency_hz: f64,

    /// Door cycle while stopped: open for `open_secs` out of every `cycle_secs`
    pub cycle_secs: f64,
    pub open_secs: f64,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 10.0,
            cycle_secs: 30.0,
            open_secs: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub frequency_hz: f64,

    /// Detections below this confidence are not reported
    pub min_confidence: f64,

    /// The simulated crowd changes every this many frames
    pub change_every_frames: u64,

    pub max_persons: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 5.0,
            min_confidence: 0.6,
            change_every_frames: 15,
            max_persons: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorsConfig {
    pub gps: GpsConfig,
    pub motion: MotionConfig,
    pub proximity: ProximityConfig,
    pub camera: CameraConfig,
}

/// Full simulator configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub fusion: FusionConfig,
    pub sensors: SensorsConfig,
    pub route: RouteConfig,
}

impl SimConfig {
    /// Loads a JSON config file; missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SimError> {
        let json = std::fs::read_to_string(path)?;
        let config: SimConfig = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SimError> {
        self.fusion.validate()?;

        let rates = [
            ("gps", self.sensors.gps.frequency_hz),
            ("motion", self.sensors.motion.frequency_hz),
            ("proximity", self.sensors.proximity.frequency_hz),
            ("camera", self.sensors.camera.frequency_hz),
        ];
        for (sensor, hz) in rates {
            if !(hz > 0.0) {
                return Err(SimError::Sensor(format!("{} frequency must be positive", sensor)));
            }
        }

        if self.sensors.motion.smoothing_window == 0 {
            return Err(SimError::Sensor("motion smoothing window is empty".to_string()));
        }
        if self.sensors.camera.change_every_frames == 0 {
            return Err(SimError::Sensor("camera change interval is zero".to_string()));
        }
        if self.route.length_km <= 0.0 {
            return Err(SimError::Sensor("route length must be positive".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sensor_rates() {
        let config = SimConfig::default();
        assert_eq!(config.sensors.gps.frequency_hz, 1.0);
        assert_eq!(config.sensors.motion.frequency_hz, 2.0);
        assert_eq!(config.sensors.proximity.frequency_hz, 10.0);
        assert_eq!(config.sensors.camera.frequency_hz, 5.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let config: SimConfig = serde_json::from_str(
            r#"{ "fusion": { "device_id": "BUS-0009" }, "sensors": { "camera": { "frequency_hz": 10.0 } } }"#,
        )
        .unwrap();

        assert_eq!(config.fusion.device_id, "BUS-0009");
        assert_eq!(config.sensors.camera.frequency_hz, 10.0);
        assert_eq!(config.sensors.camera.min_confidence, 0.6);
        assert_eq!(config.sensors.gps.frequency_hz, 1.0);
    }

    #[test]
    fn test_zero_frequency_rejected() {
        let mut config = SimConfig::default();
        config.sensors.proximity.frequency_hz = 0.0;
        assert!(matches!(config.validate(), Err(SimError::Sensor(_))));
    }

    #[test]
    fn test_route_interpolation_and_course() {
        let route = RouteConfig::default();
        let (lat, lon) = route.position_at(0.5);
        assert!((lat - 19.4376).abs() < 1e-9);
        assert!((lon + 99.1282).abs() < 1e-9);

        // Equal north and east deltas
        assert!((route.course_deg() - 45.0).abs() < 1e-6);
        assert_eq!(route.position_at(2.0), route.position_at(1.0));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            SimConfig::load("/nonexistent/transit/sim.json"),
            Err(SimError::Io(_))
        ));
    }
}
