//! Synthetic GPS receiver.
//!
//! Advances along the configured route at the commanded speed and reports
//! position with a small Gaussian jitter.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

use transit_core::{EventKind, EventPayload, PositionSample};
use transit_env::Moment;

use crate::config::{GpsConfig, RouteConfig};
use crate::producer::{SensorModel, VehicleSignals};

/// Position jitter standard deviation in degrees (about 1 m)
const POSITION_NOISE_DEG: f64 = 0.00001;

pub struct GpsModel {
    config: GpsConfig,
    route: RouteConfig,
    progress: f64,
    rng: ChaCha8Rng,
}

impl GpsModel {
    pub fn new(config: GpsConfig, route: RouteConfig, seed: u64) -> Self {
        Self {
            config,
            route,
            progress: 0.0,
            rng: ChaCha8Rng::seed_from_u64(seed ^ 0x6770_7300),
        }
    }

    /// Current progress along the route [0.0 - 1.0).
    pub fn progress(&self) -> f64 {
        self.progress
    }

    fn jitter(&mut self) -> f64 {
        let n: f64 = self.rng.sample(StandardNormal);
        n * POSITION_NOISE_DEG
    }

    fn advance(&mut self, speed_kmh: f64) {
        if speed_kmh <= 0.0 {
            return;
        }

        let hours = 1.0 / self.config.frequency_hz / 3600.0;
        self.progress += speed_kmh * hours / self.route.length_km;
        if self.progress >= 1.0 {
            self.progress = 0.0;
        }
    }
}

impl SensorModel for GpsModel {
    fn kind(&self) -> EventKind {
        EventKind::Position
    }

    fn frequency_hz(&self) -> f64 {
        self.config.frequency_hz
    }

    fn sample(&mut self, signals: &VehicleSignals, _now: Moment) -> EventPayload {
        let speed_kmh = signals.commanded_speed_kmh.max(0.0);
        self.advance(speed_kmh);

        let (lat, lon) = self.route.position_at(self.progress);

        EventPayload::Position(PositionSample {
            latitude: lat + self.jitter(),
            longitude: lon + self.jitter(),
            altitude: self.config.altitude_m,
            speed_kmh,
            course_deg: self.route.course_deg(),
            satellites: self.config.satellites,
            fix_quality: self.config.fix_quality,
            route_progress: self.progress,
        })
    }
}
