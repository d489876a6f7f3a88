//! Looping drive profile.
//!
//! A fixed sequence of stages, each holding a target speed for a duration.
//! Every vehicle draws its own speed offset so a fleet does not move in
//! lockstep.

use rand::Rng;
use std::time::Duration;

/// Base cruising speed (km/h)
const CRUISE_KMH: f64 = 30.0;

/// Per-vehicle speed offset is drawn from [-MAX_VARIATION, MAX_VARIATION)
const MAX_VARIATION_KMH: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveStageKind {
    Cruise,
    Approach,
    Stopped,
    PullAway,
    SlowDown,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriveStage {
    pub kind: DriveStageKind,
    pub duration: Duration,
    pub speed_kmh: f64,
}

#[derive(Debug, Clone)]
pub struct DriveProfile {
    stages: Vec<DriveStage>,
    cycle: Duration,
}

impl DriveProfile {
    /// Builds the standard urban stop cycle with a fixed speed offset.
    pub fn urban(variation_kmh: f64) -> Self {
        let stage = |kind, secs, speed_kmh: f64| DriveStage {
            kind,
            duration: Duration::from_secs(secs),
            speed_kmh: speed_kmh.max(0.0),
        };

        Self::from_stages(vec![
            stage(DriveStageKind::Cruise, 15, CRUISE_KMH + variation_kmh),
            stage(DriveStageKind::Approach, 10, 20.0 + variation_kmh),
            stage(DriveStageKind::Stopped, 20, 0.0),
            stage(DriveStageKind::PullAway, 5, 15.0 + variation_kmh),
            stage(DriveStageKind::Cruise, 15, CRUISE_KMH + variation_kmh),
            stage(DriveStageKind::SlowDown, 5, 10.0 + variation_kmh),
        ])
    }

    /// Builds the urban cycle with an offset drawn from `rng`.
    pub fn random_urban<R: Rng>(rng: &mut R) -> Self {
        Self::urban(rng.gen_range(-MAX_VARIATION_KMH..MAX_VARIATION_KMH))
    }

    pub fn from_stages(stages: Vec<DriveStage>) -> Self {
        let cycle = stages.iter().map(|s| s.duration).sum();
        Self { stages, cycle }
    }

    /// Length of one full loop.
    pub fn cycle(&self) -> Duration {
        self.cycle
    }

    pub fn stages(&self) -> &[DriveStage] {
        &self.stages
    }

    /// Stage active `elapsed` after the profile origin; the profile loops.
    pub fn stage_at(&self, elapsed: Duration) -> Option<&DriveStage> {
        if self.cycle.is_zero() {
            return None;
        }

        let mut offset = Duration::from_nanos((elapsed.as_nanos() % self.cycle.as_nanos()) as u64);
        for stage in &self.stages {
            if offset < stage.duration {
                return Some(stage);
            }
            offset -= stage.duration;
        }
        None
    }

    /// Target speed at `elapsed` (0 for an empty profile).
    pub fn speed_at(&self, elapsed: Duration) -> f64 {
        self.stage_at(elapsed).map(|s| s.speed_kmh).unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_urban_cycle_layout() {
        let profile = DriveProfile::urban(0.0);
        assert_eq!(profile.cycle(), Duration::from_secs(70));
        assert_eq!(profile.stages().len(), 6);
    }

    #[test]
    fn test_stage_lookup_and_wrap() {
        let profile = DriveProfile::urban(2.0);
        let kind_at = |secs: u64| profile.stage_at(Duration::from_secs(secs)).map(|s| s.kind);

        assert_eq!(kind_at(0), Some(DriveStageKind::Cruise));
        assert_eq!(kind_at(14), Some(DriveStageKind::Cruise));
        assert_eq!(kind_at(15), Some(DriveStageKind::Approach));
        assert_eq!(kind_at(30), Some(DriveStageKind::Stopped));
        assert_eq!(kind_at(46), Some(DriveStageKind::PullAway));
        assert_eq!(kind_at(66), Some(DriveStageKind::SlowDown));
        assert_eq!(kind_at(70), Some(DriveStageKind::Cruise));
        assert_eq!(kind_at(100), Some(DriveStageKind::Stopped));

        assert_eq!(profile.speed_at(Duration::from_secs(5)), 32.0);
        assert_eq!(profile.speed_at(Duration::from_secs(35)), 0.0);
    }

    #[test]
    fn test_random_variation_is_bounded() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for _ in 0..100 {
            let profile = DriveProfile::random_urban(&mut rng);
            let cruise = profile.stages()[0].speed_kmh;
            assert!((27.0..33.0).contains(&cruise));
            assert_eq!(profile.stages()[2].speed_kmh, 0.0);
        }
    }

    #[test]
    fn test_empty_profile() {
        let profile = DriveProfile::from_stages(Vec::new());
        assert!(profile.stage_at(Duration::from_secs(3)).is_none());
        assert_eq!(profile.speed_at(Duration::from_secs(3)), 0.0);
    }

    proptest! {
        #[test]
        fn prop_profile_loops_with_cycle(
            variation in -3.0f64..3.0,
            millis in 0u64..1_000_000,
        ) {
            let profile = DriveProfile::urban(variation);
            let elapsed = Duration::from_millis(millis);
            let stage = profile.stage_at(elapsed).map(|s| s.kind);

            prop_assert!(stage.is_some());
            prop_assert_eq!(stage, profile.stage_at(elapsed + profile.cycle()).map(|s| s.kind));
            prop_assert!(profile.speed_at(elapsed) >= 0.0);
        }
    }
}
