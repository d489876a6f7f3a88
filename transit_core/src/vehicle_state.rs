//! Vehicle State Calculator - hybrid GPS + inertial motion classification.
//!
//! Pure and deterministic: the same pair of samples always yields the same
//! state, so it is safe to call on every tick with stale inputs.

use crate::events::{MotionSample, PositionSample, VehicleState, VehicleStateLabel};

/// Minimum satellites in view for a usable GPS fix.
pub const MIN_FIX_SATELLITES: u8 = 4;

/// Combines the latest position and motion samples into a [`VehicleState`].
#[derive(Debug, Clone)]
pub struct VehicleStateCalculator {
    /// GPS speed at or above this counts as movement (km/h)
    movement_threshold_kmh: f64,
}

impl VehicleStateCalculator {
    pub fn new(movement_threshold_kmh: f64) -> Self {
        Self {
            movement_threshold_kmh,
        }
    }

    pub fn movement_threshold_kmh(&self) -> f64 {
        self.movement_threshold_kmh
    }

    /// Classifies the vehicle from one position and one motion sample.
    ///
    /// `door_open` is always false here; the caller overlays it from the
    /// latest proximity sample.
    pub fn calculate(
        &self,
        position: &PositionSample,
        motion: &MotionSample,
        timestamp_ms: u64,
    ) -> VehicleState {
        let gps_moving = position.speed_kmh >= self.movement_threshold_kmh;
        let motion_detecting = motion.is_accelerating || motion.is_turning;
        let has_fix = has_gps_fix(position);

        let is_moving = gps_moving || motion_detecting;

        VehicleState {
            label: classify(gps_moving, motion_detecting, has_fix),
            speed_kmh: position.speed_kmh,
            acceleration: motion.accel_smooth,
            turn_rate: motion.yaw_rate(),
            is_moving,
            is_stopped: !is_moving,
            door_open: false,
            has_gps_fix: has_fix,
            gps_quality: position.fix_quality,
            timestamp_ms,
        }
    }
}

/// A fix needs a non-zero quality and at least [`MIN_FIX_SATELLITES`].
pub fn has_gps_fix(position: &PositionSample) -> bool {
    position.fix_quality > 0 && position.satellites >= MIN_FIX_SATELLITES
}

/// Decision table over the three movement signals.
pub fn classify(gps_moving: bool, motion_detecting: bool, has_fix: bool) -> VehicleStateLabel {
    match (has_fix, gps_moving, motion_detecting) {
        (true, true, true) => VehicleStateLabel::ConfirmedMovement,
        (true, true, false) => VehicleStateLabel::GpsMovement,
        (true, false, true) => VehicleStateLabel::MotionMovement,
        (true, false, false) => VehicleStateLabel::Stopped,
        // Without a fix the GPS speed is not trusted
        (false, _, true) => VehicleStateLabel::MotionMovementNoGps,
        (false, _, false) => VehicleStateLabel::StoppedNoGps,
    }
}
