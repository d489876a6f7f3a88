//! Event model shared by sensor producers, the fusion core and outbound
//! collaborators.
//!
//! Every payload type is an immutable value snapshot. An [`Event`] is built
//! from its payload, so the declared kind is derived rather than trusted:
//! there is no way to publish a position event carrying a camera frame.

use serde::{Deserialize, Serialize};

use crate::error::FusionError;

// ============================================================================
// EVENT KIND
// ============================================================================

/// Routing key of the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Position/speed samples (GPS-like)
    Position,
    /// Inertial samples (accelerometer + gyroscope)
    Motion,
    /// Door proximity distance samples
    Proximity,
    /// Camera person-detection frames
    Vision,
    /// Fused vehicle state, one per fusion tick
    VehicleState,
    /// Confirmed boarding/alighting events
    Passenger,
}

impl EventKind {
    /// Returns every kind, sensor inputs first.
    pub fn all() -> [EventKind; 6] {
        [
            EventKind::Position,
            EventKind::Motion,
            EventKind::Proximity,
            EventKind::Vision,
            EventKind::VehicleState,
            EventKind::Passenger,
        ]
    }

    /// Stable wire name used by outbound publishers.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Position => "gps",
            EventKind::Motion => "mpu",
            EventKind::Proximity => "door",
            EventKind::Vision => "camera",
            EventKind::VehicleState => "vehicle_state",
            EventKind::Passenger => "passenger",
        }
    }

    /// True for the four kinds produced by sensors.
    pub fn is_sensor(&self) -> bool {
        matches!(
            self,
            EventKind::Position | EventKind::Motion | EventKind::Proximity | EventKind::Vision
        )
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gps" | "position" => Ok(EventKind::Position),
            "mpu" | "motion" => Ok(EventKind::Motion),
            "door" | "proximity" => Ok(EventKind::Proximity),
            "camera" | "vision" => Ok(EventKind::Vision),
            "vehicle_state" | "vehicle" => Ok(EventKind::VehicleState),
            "passenger" => Ok(EventKind::Passenger),
            _ => Err(format!("Unknown event kind: {}", s)),
        }
    }
}

// ============================================================================
// SENSOR PAYLOADS (Input)
// ============================================================================

/// A GPS-like position/speed sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    /// Degrees
    pub latitude: f64,

    /// Degrees
    pub longitude: f64,

    /// Meters
    pub altitude: f64,

    /// Ground speed in km/h
    pub speed_kmh: f64,

    /// Heading in degrees [0, 360)
    pub course_deg: f64,

    /// Number of satellites in view
    pub satellites: u8,

    /// 0 = no fix, 1 = single, 2 = enhanced
    pub fix_quality: u8,

    /// Progress along the route [0.0 - 1.0]
    pub route_progress: f64,
}

impl Default for PositionSample {
    fn default() -> Self {
        Self {
            latitude: 0.0,
            longitude: 0.0,
            altitude: 0.0,
            speed_kmh: 0.0,
            course_deg: 0.0,
            satellites: 0,
            fix_quality: 0,
            route_progress: 0.0,
        }
    }
}

/// Label the inertial producer derives on its own, before fusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MotionLabel {
    #[default]
    Stationary,
    Accelerating,
    Braking,
    Turning,
    AcceleratingTurning,
}

impl MotionLabel {
    /// Derives the label from the producer's detection flags.
    ///
    /// Acceleration wins over braking; turning combines only with
    /// acceleration.
    pub fn from_flags(accelerating: bool, braking: bool, turning: bool) -> Self {
        match (accelerating, braking, turning) {
            (true, _, true) => MotionLabel::AcceleratingTurning,
            (true, _, false) => MotionLabel::Accelerating,
            (false, true, _) => MotionLabel::Braking,
            (false, false, true) => MotionLabel::Turning,
            (false, false, false) => MotionLabel::Stationary,
        }
    }
}

/// An inertial (accelerometer + gyroscope) sample.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MotionSample {
    /// Acceleration in m/s² (x = longitudinal, y = lateral, z = vertical)
    pub accel: [f64; 3],

    /// Rolling average of |longitudinal acceleration| over a bounded window
    pub accel_smooth: f64,

    /// Angular rate in °/s (x = pitch, y = roll, z = yaw)
    pub gyro: [f64; 3],

    pub is_accelerating: bool,
    pub is_braking: bool,
    pub is_turning: bool,

    /// Producer-side motion label
    pub label: MotionLabel,
}

impl MotionSample {
    /// Yaw rate (°/s), the turn rate reported in the fused state.
    pub fn yaw_rate(&self) -> f64 {
        self.gyro[2]
    }
}

/// A door proximity sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProximitySample {
    /// Measured distance in millimeters
    pub distance_mm: u32,

    /// `distance_mm >= threshold`
    pub is_open: bool,
}

impl ProximitySample {
    /// Builds a sample, deriving `is_open` from the configured threshold.
    pub fn from_distance(distance_mm: u32, threshold_mm: u32) -> Self {
        Self {
            distance_mm,
            is_open: distance_mm >= threshold_mm,
        }
    }
}

/// Bounding box in image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

/// One person track reported by the vision detector.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PersonTrack {
    /// Detector-assigned id, globally increasing and never recycled
    pub track_id: u64,

    /// Detection confidence [0.0 - 1.0]
    pub confidence: f64,

    pub bbox: BoundingBox,

    /// Frame number of first detection
    pub first_seen_frame: u64,

    /// Frame number of latest detection
    pub last_seen_frame: u64,
}

/// One camera frame of person detections.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VisionFrame {
    pub detected_persons: usize,
    pub tracks: Vec<PersonTrack>,
    pub frame_number: u64,

    /// Mean confidence over `tracks` (0.0 when empty)
    pub mean_confidence: f64,
}

impl VisionFrame {
    /// Builds a frame, deriving the person count and mean confidence.
    pub fn from_tracks(frame_number: u64, tracks: Vec<PersonTrack>) -> Self {
        let mean_confidence = if tracks.is_empty() {
            0.0
        } else {
            tracks.iter().map(|t| t.confidence).sum::<f64>() / tracks.len() as f64
        };

        Self {
            detected_persons: tracks.len(),
            tracks,
            frame_number,
            mean_confidence,
        }
    }
}

// ============================================================================
// FUSED OUTPUTS (Output)
// ============================================================================

/// Classification of the fused vehicle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleStateLabel {
    /// GPS fix, GPS and inertial both report movement
    ConfirmedMovement,
    /// GPS fix, only GPS speed reports movement
    GpsMovement,
    /// GPS fix, only the inertial sensor reports movement
    MotionMovement,
    /// GPS fix, nothing reports movement
    Stopped,
    /// No GPS fix, inertial sensor reports movement
    MotionMovementNoGps,
    /// No GPS fix, inertial sensor quiet
    StoppedNoGps,
}

impl VehicleStateLabel {
    /// Returns the label's wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleStateLabel::ConfirmedMovement => "CONFIRMED_MOVEMENT",
            VehicleStateLabel::GpsMovement => "GPS_MOVEMENT",
            VehicleStateLabel::MotionMovement => "MOTION_MOVEMENT",
            VehicleStateLabel::Stopped => "STOPPED",
            VehicleStateLabel::MotionMovementNoGps => "MOTION_MOVEMENT_NO_GPS",
            VehicleStateLabel::StoppedNoGps => "STOPPED_NO_GPS",
        }
    }
}

impl std::fmt::Display for VehicleStateLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fused vehicle state, rebuilt on every fusion tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    pub label: VehicleStateLabel,

    /// km/h, from the position sample
    pub speed_kmh: f64,

    /// m/s², smoothed longitudinal acceleration from the motion sample
    pub acceleration: f64,

    /// °/s, yaw rate from the motion sample
    pub turn_rate: f64,

    pub is_moving: bool,
    pub is_stopped: bool,

    /// Overlaid by the caller from the latest proximity sample
    pub door_open: bool,

    pub has_gps_fix: bool,
    pub gps_quality: u8,

    /// Wall-clock milliseconds when the state was computed
    pub timestamp_ms: u64,
}

/// Direction of a passenger event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PassengerEventKind {
    Entry,
    Exit,
}

impl PassengerEventKind {
    /// +1 for an entry, -1 for an exit.
    pub fn delta(&self) -> i32 {
        match self {
            PassengerEventKind::Entry => 1,
            PassengerEventKind::Exit => -1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PassengerEventKind::Entry => "ENTRY",
            PassengerEventKind::Exit => "EXIT",
        }
    }
}

/// What a passenger event was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "source", content = "id", rename_all = "snake_case")]
pub enum TrackRef {
    /// A vision track confirmed through its pending record
    Vision(u64),

    /// A synthetic bulk-correction event, numbered by the tracker
    Bulk(u64),
}

/// A confirmed boarding or alighting. Never mutated after emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassengerEvent {
    pub kind: PassengerEventKind,
    pub track: TrackRef,
    pub confidence: f64,

    /// Door proximity distance when the person was detected, if known
    pub sensor_distance_mm: Option<u32>,

    /// Always `kind.delta()`
    pub delta: i32,

    /// Onboard count after this event
    pub current_onboard: u32,

    /// Cumulative entries after this event
    pub total_entries: u32,

    /// Cumulative exits after this event
    pub total_exits: u32,

    pub device_id: String,
    pub timestamp_ms: u64,
}

// ============================================================================
// EVENT ENVELOPE
// ============================================================================

/// Closed union of every payload the bus carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    Position(PositionSample),
    Motion(MotionSample),
    Proximity(ProximitySample),
    Vision(VisionFrame),
    VehicleState(VehicleState),
    Passenger(PassengerEvent),
}

impl EventPayload {
    /// The kind this payload is routed under.
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Position(_) => EventKind::Position,
            EventPayload::Motion(_) => EventKind::Motion,
            EventPayload::Proximity(_) => EventKind::Proximity,
            EventPayload::Vision(_) => EventKind::Vision,
            EventPayload::VehicleState(_) => EventKind::VehicleState,
            EventPayload::Passenger(_) => EventKind::Passenger,
        }
    }
}

/// A timestamped payload travelling over the event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Wall-clock milliseconds, set by the producer at sample time
    pub timestamp_ms: u64,

    payload: EventPayload,
}

impl Event {
    /// Wraps a payload; the event kind follows from the payload.
    pub fn new(timestamp_ms: u64, payload: EventPayload) -> Self {
        Self {
            timestamp_ms,
            payload,
        }
    }

    /// Wraps a payload under an externally declared kind.
    ///
    /// A payload that does not match `declared` is a producer wiring bug
    /// and is rejected with [`FusionError::PayloadMismatch`].
    pub fn tagged(
        declared: EventKind,
        timestamp_ms: u64,
        payload: EventPayload,
    ) -> Result<Self, FusionError> {
        let actual = payload.kind();
        if actual != declared {
            return Err(FusionError::PayloadMismatch { declared, actual });
        }
        Ok(Self::new(timestamp_ms, payload))
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    pub fn into_payload(self) -> EventPayload {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_follows_payload() {
        let event = Event::new(0, EventPayload::Proximity(ProximitySample::from_distance(350, 300)));
        assert_eq!(event.kind(), EventKind::Proximity);
    }

    #[test]
    fn test_tagged_rejects_mismatched_payload() {
        let result = Event::tagged(
            EventKind::Position,
            0,
            EventPayload::Vision(VisionFrame::default()),
        );

        match result {
            Err(FusionError::PayloadMismatch { declared, actual }) => {
                assert_eq!(declared, EventKind::Position);
                assert_eq!(actual, EventKind::Vision);
            }
            other => panic!("expected payload mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_tagged_accepts_matching_payload() {
        let event = Event::tagged(
            EventKind::Motion,
            42,
            EventPayload::Motion(MotionSample::default()),
        )
        .unwrap();
        assert_eq!(event.timestamp_ms, 42);
        assert_eq!(event.kind(), EventKind::Motion);
    }

    #[test]
    fn test_proximity_threshold_is_inclusive() {
        assert!(ProximitySample::from_distance(300, 300).is_open);
        assert!(!ProximitySample::from_distance(299, 300).is_open);
    }

    #[test]
    fn test_vision_frame_mean_confidence() {
        let tracks = vec![
            PersonTrack { track_id: 1, confidence: 0.8, ..Default::default() },
            PersonTrack { track_id: 2, confidence: 0.6, ..Default::default() },
        ];
        let frame = VisionFrame::from_tracks(3, tracks);
        assert_eq!(frame.detected_persons, 2);
        assert!((frame.mean_confidence - 0.7).abs() < 1e-9);

        let empty = VisionFrame::from_tracks(4, Vec::new());
        assert_eq!(empty.mean_confidence, 0.0);
    }

    #[test]
    fn test_motion_label_precedence() {
        assert_eq!(MotionLabel::from_flags(true, false, true), MotionLabel::AcceleratingTurning);
        assert_eq!(MotionLabel::from_flags(false, true, true), MotionLabel::Braking);
        assert_eq!(MotionLabel::from_flags(false, false, true), MotionLabel::Turning);
        assert_eq!(MotionLabel::from_flags(false, false, false), MotionLabel::Stationary);
    }

    #[test]
    fn test_event_kind_wire_names_round_trip() {
        for kind in EventKind::all() {
            assert_eq!(kind.name().parse::<EventKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_passenger_delta_matches_kind() {
        assert_eq!(PassengerEventKind::Entry.delta(), 1);
        assert_eq!(PassengerEventKind::Exit.delta(), -1);
    }

    #[test]
    fn test_payload_serializes_with_type_tag() {
        let payload = EventPayload::Proximity(ProximitySample::from_distance(120, 300));
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "proximity");
        assert_eq!(json["data"]["distance_mm"], 120);
    }
}
