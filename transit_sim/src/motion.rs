//! Synthetic inertial measurement unit.
//!
//! Longitudinal acceleration is the derivative of the speed the GPS last
//! reported. Lateral, vertical and the pitch/roll rates are noise; yaw
//! spikes occasionally while the vehicle moves.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::VecDeque;
use std::time::Duration;

use transit_core::{EventKind, EventPayload, MotionLabel, MotionSample};
use transit_env::Moment;

use crate::config::MotionConfig;
use crate::producer::{SensorModel, VehicleSignals};

const GRAVITY: f64 = 9.81;

/// Yaw spikes only happen above this speed (km/h)
const TURN_MIN_SPEED_KMH: f64 = 5.0;

/// Chance of a yaw spike on any one sample
const TURN_PROBABILITY: f64 = 0.2;

/// Peak yaw rate of a spike (°/s)
const TURN_PEAK_DEG_S: f64 = 45.0;

pub struct MotionModel {
    config: MotionConfig,
    previous_speed_kmh: f64,
    last_sample: Option<Duration>,
    window: VecDeque<f64>,
    rng: ChaCha8Rng,
}

impl MotionModel {
    pub fn new(config: MotionConfig, seed: u64) -> Self {
        let window = VecDeque::with_capacity(config.smoothing_window);
        Self {
            config,
            previous_speed_kmh: 0.0,
            last_sample: None,
            window,
            rng: ChaCha8Rng::seed_from_u64(seed ^ 0x6d70_7500),
        }
    }

    /// Symmetric uniform noise in [-half_width, half_width).
    fn noise(&mut self, half_width: f64) -> f64 {
        self.rng.gen_range(-half_width..half_width)
    }

    fn smooth(&mut self, accel_x: f64) -> f64 {
        self.window.push_back(accel_x.abs());
        while self.window.len() > self.config.smoothing_window {
            self.window.pop_front();
        }
        self.window.iter().sum::<f64>() / self.window.len() as f64
    }
}

impl SensorModel for MotionModel {
    fn kind(&self) -> EventKind {
        EventKind::Motion
    }

    fn frequency_hz(&self) -> f64 {
        self.config.frequency_hz
    }

    fn sample(&mut self, signals: &VehicleSignals, now: Moment) -> EventPayload {
        let dt = match self.last_sample {
            Some(last) => now.since(last).as_secs_f64(),
            None => 1.0 / self.config.frequency_hz,
        };
        self.last_sample = Some(now.monotonic);

        let speed_kmh = signals.reported_speed_kmh;
        let mut accel_x = if dt > 0.0 {
            (speed_kmh - self.previous_speed_kmh) / 3.6 / dt
        } else {
            0.0
        };
        accel_x += self.noise(0.05);
        self.previous_speed_kmh = speed_kmh;

        let accel_smooth = self.smooth(accel_x);

        let mut yaw = 0.0;
        if speed_kmh > TURN_MIN_SPEED_KMH && self.rng.gen_bool(TURN_PROBABILITY) {
            yaw = self.noise(TURN_PEAK_DEG_S);
        }

        let accel = [accel_x, self.noise(0.1), GRAVITY + self.noise(0.15)];
        let gyro = [self.noise(1.0), self.noise(1.0), yaw];

        let is_accelerating = accel_smooth > self.config.accel_threshold;
        let is_braking = accel_x < -self.config.accel_threshold;
        let is_turning = yaw.abs() > self.config.turn_threshold;

        EventPayload::Motion(MotionSample {
            accel,
            accel_smooth,
            gyro,
            is_accelerating,
            is_braking,
            is_turning,
            label: MotionLabel::from_flags(is_accelerating, is_braking, is_turning),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn motion(payload: EventPayload) -> MotionSample {
        match payload {
            EventPayload::Motion(m) => m,
            other => panic!("expected motion, got {:?}", other.kind()),
        }
    }

    fn at_speed(speed: f64) -> VehicleSignals {
        VehicleSignals {
            reported_speed_kmh: speed,
            ..Default::default()
        }
    }

    #[test]
    fn test_stationary_vehicle_is_quiet() {
        let mut imu = MotionModel::new(MotionConfig::default(), 3);

        for i in 0..20 {
            let sample = motion(imu.sample(&at_speed(0.0), Moment::at_secs(i as f64 * 0.5)));
            assert!(sample.accel[0].abs() <= 0.05);
            assert_eq!(sample.yaw_rate(), 0.0);
            assert_eq!(sample.label, MotionLabel::Stationary);
            assert!((sample.accel[2] - GRAVITY).abs() <= 0.15);
        }
    }

    #[test]
    fn test_hard_braking_detected() {
        let mut imu = MotionModel::new(MotionConfig::default(), 3);
        imu.sample(&at_speed(30.0), Moment::at_secs(0.0));

        // 30 -> 0 km/h in 0.5 s is about -16.7 m/s²
        let sample = motion(imu.sample(&at_speed(0.0), Moment::at_secs(0.5)));
        assert!(sample.accel[0] < -10.0);
        assert!(sample.is_braking);
    }

    #[test]
    fn test_smoothing_window_is_bounded() {
        let config = MotionConfig {
            smoothing_window: 4,
            ..Default::default()
        };
        let mut imu = MotionModel::new(config, 3);

        for i in 0..10 {
            imu.sample(&at_speed(i as f64 * 10.0), Moment::at_secs(i as f64 * 0.5));
        }
        assert_eq!(imu.window.len(), 4);
    }

    #[test]
    fn test_steady_acceleration_sets_label() {
        let mut imu = MotionModel::new(MotionConfig::default(), 3);

        // +3.6 km/h every 0.5 s = 2 m/s²
        let mut last = MotionSample::default();
        for i in 0..10 {
            last = motion(imu.sample(&at_speed(i as f64 * 3.6), Moment::at_secs(i as f64 * 0.5)));
        }
        assert!(last.is_accelerating);
        assert!(matches!(
            last.label,
            MotionLabel::Accelerating | MotionLabel::AcceleratingTurning
        ));
    }
}
