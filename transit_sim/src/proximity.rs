//! Synthetic door proximity sensor.
//!
//! While the vehicle is stopped the door cycles: open for the first part of
//! every cycle, closed for the rest. While moving it is always closed.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::time::Duration;

use transit_core::{EventKind, EventPayload, ProximitySample};
use transit_env::Moment;

use crate::config::ProximityConfig;
use crate::producer::{SensorModel, VehicleSignals};

/// Readings never go below this (mm)
const MIN_DISTANCE_MM: i64 = 50;

pub struct ProximityModel {
    config: ProximityConfig,
    threshold_mm: u32,

    /// Start of the current door cycle; None while moving
    cycle_origin: Option<Duration>,

    rng: ChaCha8Rng,
}

impl ProximityModel {
    pub fn new(config: ProximityConfig, threshold_mm: u32, seed: u64) -> Self {
        Self {
            config,
            threshold_mm,
            cycle_origin: None,
            rng: ChaCha8Rng::seed_from_u64(seed ^ 0x646f_6f72),
        }
    }

    fn closed_distance(&mut self) -> i64 {
        self.rng.gen_range(100..150)
    }

    fn open_distance(&mut self) -> i64 {
        self.rng.gen_range(350..450)
    }

    fn stopped_distance(&mut self, now: Moment) -> i64 {
        let cycle = Duration::from_secs_f64(self.config.cycle_secs);
        let origin = match self.cycle_origin {
            Some(origin) if now.since(origin) < cycle => origin,
            _ => {
                self.cycle_origin = Some(now.monotonic);
                now.monotonic
            }
        };

        if now.since(origin).as_secs_f64() < self.config.open_secs {
            self.open_distance()
        } else {
            self.closed_distance()
        }
    }
}

impl SensorModel for ProximityModel {
    fn kind(&self) -> EventKind {
        EventKind::Proximity
    }

    fn frequency_hz(&self) -> f64 {
        self.config.frequency_hz
    }

    fn sample(&mut self, signals: &VehicleSignals, now: Moment) -> EventPayload {
        let base = if signals.vehicle_stopped {
            self.stopped_distance(now)
        } else {
            self.cycle_origin = None;
            self.closed_distance()
        };

        let noisy = (base + self.rng.gen_range(-10..10)).max(MIN_DISTANCE_MM);
        EventPayload::Proximity(ProximitySample::from_distance(
            noisy as u32,
            self.threshold_mm,
        ))
    }
}
