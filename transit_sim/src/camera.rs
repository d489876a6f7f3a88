//! Synthetic cabin camera.
//!
//! Everyone aboard stays in view. The crowd only changes while the vehicle
//! is stopped with the door open: its size drifts every few frames, biased
//! towards growing; new people get fresh track ids and the longest-tracked
//! leave first.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;

use transit_core::{BoundingBox, EventKind, EventPayload, PersonTrack, VisionFrame};
use transit_env::Moment;

use crate::config::CameraConfig;
use crate::producer::{SensorModel, VehicleSignals};

#[derive(Debug, Clone)]
struct SimulatedPerson {
    first_seen_frame: u64,
    confidence: f64,
}

pub struct CameraModel {
    config: CameraConfig,
    frame_number: u64,
    next_track_id: u64,

    /// Visible people by track id; ids increase so the first key is the oldest
    people: BTreeMap<u64, SimulatedPerson>,

    rng: ChaCha8Rng,
}

impl CameraModel {
    pub fn new(config: CameraConfig, seed: u64) -> Self {
        Self {
            config,
            frame_number: 0,
            next_track_id: 1,
            people: BTreeMap::new(),
            rng: ChaCha8Rng::seed_from_u64(seed ^ 0x6361_6d00),
        }
    }

    pub fn visible_count(&self) -> usize {
        self.people.len()
    }

    fn drift_crowd(&mut self) {
        let change: i64 = self.rng.gen_range(-1..=3);
        let target = (self.people.len() as i64 + change).clamp(0, self.config.max_persons as i64) as usize;

        while self.people.len() < target {
            let id = self.next_track_id;
            self.next_track_id += 1;
            let confidence = self.rng.gen_range(0.7..0.95);
            self.people.insert(
                id,
                SimulatedPerson {
                    first_seen_frame: self.frame_number,
                    confidence,
                },
            );
        }

        while self.people.len() > target {
            self.people.pop_first();
        }
    }

    fn bbox(&mut self) -> BoundingBox {
        BoundingBox {
            x1: 100.0 + self.rng.gen_range(0.0..200.0),
            y1: 100.0 + self.rng.gen_range(0.0..200.0),
            x2: 300.0 + self.rng.gen_range(0.0..200.0),
            y2: 400.0 + self.rng.gen_range(0.0..100.0),
        }
    }

    fn frame(&mut self, signals: &VehicleSignals) -> VisionFrame {
        let boarding = signals.vehicle_stopped && signals.door_open;
        if boarding && self.frame_number % self.config.change_every_frames == 0 {
            self.drift_crowd();
        }

        let visible: Vec<(u64, SimulatedPerson)> = self
            .people
            .iter()
            .filter(|(_, p)| p.confidence >= self.config.min_confidence)
            .map(|(id, p)| (*id, p.clone()))
            .collect();

        let tracks = visible
            .into_iter()
            .map(|(track_id, person)| PersonTrack {
                track_id,
                confidence: person.confidence,
                bbox: self.bbox(),
                first_seen_frame: person.first_seen_frame,
                last_seen_frame: self.frame_number,
            })
            .collect();

        VisionFrame::from_tracks(self.frame_number, tracks)
    }
}

impl SensorModel for CameraModel {
    fn kind(&self) -> EventKind {
        EventKind::Vision
    }

    fn frequency_hz(&self) -> f64 {
        self.config.frequency_hz
    }

    fn sample(&mut self, signals: &VehicleSignals, _now: Moment) -> EventPayload {
        let frame = self.frame(signals);
        self.frame_number += 1;
        EventPayload::Vision(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vision(payload: EventPayload) -> VisionFrame {
        match payload {
            EventPayload::Vision(v) => v,
            other => panic!("expected vision, got {:?}", other.kind()),
        }
    }

    fn boarding() -> VehicleSignals {
        VehicleSignals {
            vehicle_stopped: true,
            door_open: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_nobody_visible_with_door_closed() {
        let mut camera = CameraModel::new(CameraConfig::default(), 9);
        let signals = VehicleSignals {
            vehicle_stopped: true,
            ..Default::default()
        };

        for _ in 0..30 {
            let frame = vision(camera.sample(&signals, Moment::default()));
            assert_eq!(frame.detected_persons, 0);
            assert!(frame.tracks.is_empty());
        }
    }

    #[test]
    fn test_frames_are_numbered_and_bounded() {
        let mut camera = CameraModel::new(CameraConfig::default(), 9);

        for expected in 0..200 {
            let frame = vision(camera.sample(&boarding(), Moment::default()));
            assert_eq!(frame.frame_number, expected);
            assert!(frame.detected_persons <= 5);
            assert_eq!(frame.detected_persons, frame.tracks.len());
            for track in &frame.tracks {
                assert!(track.confidence >= 0.7 && track.confidence < 0.95);
                assert_eq!(track.last_seen_frame, expected);
                assert!(track.first_seen_frame <= expected);
            }
        }
    }

    #[test]
    fn test_track_ids_never_recycled() {
        let mut camera = CameraModel::new(CameraConfig::default(), 11);
        let mut highest_seen = 0;

        for _ in 0..500 {
            let frame = vision(camera.sample(&boarding(), Moment::default()));
            for track in &frame.tracks {
                if track.first_seen_frame == frame.frame_number {
                    assert!(track.track_id > highest_seen);
                }
            }
            if let Some(max) = frame.tracks.iter().map(|t| t.track_id).max() {
                highest_seen = highest_seen.max(max);
            }
        }
    }

    #[test]
    fn test_boarded_people_stay_in_view_after_departure() {
        let mut camera = CameraModel::new(CameraConfig::default(), 9);
        for _ in 0..100 {
            camera.sample(&boarding(), Moment::default());
        }
        let aboard = camera.visible_count();

        let moving = VehicleSignals {
            commanded_speed_kmh: 30.0,
            ..Default::default()
        };
        for _ in 0..100 {
            let frame = vision(camera.sample(&moving, Moment::default()));
            assert_eq!(frame.tracks.len(), aboard);
        }
        assert_eq!(camera.visible_count(), aboard);
    }

    #[test]
    fn test_crowd_frozen_while_door_closed() {
        let mut camera = CameraModel::new(CameraConfig::default(), 21);
        for _ in 0..60 {
            camera.sample(&boarding(), Moment::default());
        }

        let closed = VehicleSignals {
            vehicle_stopped: true,
            ..Default::default()
        };
        let ids = |frame: VisionFrame| frame.tracks.iter().map(|t| t.track_id).collect::<Vec<_>>();
        let first = ids(vision(camera.sample(&closed, Moment::default())));
        for _ in 0..60 {
            assert_eq!(ids(vision(camera.sample(&closed, Moment::default()))), first);
        }
    }
}
