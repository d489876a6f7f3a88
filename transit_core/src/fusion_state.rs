//! Single-writer fusion state of one vehicle.
//!
//! Holds the latest sample of every sensor plus the door machine and the
//! passenger tracker. Exactly one task mutates it (the State Manager's
//! consumer loop); everything else reads through the manager's lock.

use std::sync::Arc;
use tracing::{debug, info, warn};

use transit_env::Moment;

use crate::config::FusionConfig;
use crate::door_state::{DoorState, DoorStateMachine, DoorTransition};
use crate::event_bus::EventBus;
use crate::events::{
    Event, EventPayload, MotionSample, PassengerEvent, PositionSample, ProximitySample,
    VehicleState, VehicleStateLabel, VisionFrame,
};
use crate::passenger_tracker::{PassengerStats, PassengerTracker};
use crate::vehicle_state::VehicleStateCalculator;

/// What one fusion tick produced.
#[derive(Debug, Clone, PartialEq)]
pub struct FusionTick {
    pub state: VehicleState,

    /// Passenger events emitted since the previous tick, already published.
    /// Includes closures confirmed while ingesting a proximity sample.
    pub passenger_events: Vec<PassengerEvent>,
}

/// Cached samples, derived state and the two state machines.
pub struct FusionState {
    calculator: VehicleStateCalculator,
    door: DoorStateMachine,
    tracker: PassengerTracker,

    latest_position: Option<PositionSample>,
    latest_motion: Option<MotionSample>,
    latest_proximity: Option<ProximitySample>,
    latest_vision: Option<VisionFrame>,

    current: Option<VehicleState>,
    previous_label: Option<VehicleStateLabel>,

    /// Passenger events awaiting the next tick
    emitted: Vec<PassengerEvent>,
}

impl FusionState {
    /// Builds construction-time defaults; `reset` is just a fresh instance.
    pub fn new(bus: Arc<EventBus>, config: &FusionConfig) -> Self {
        Self {
            calculator: VehicleStateCalculator::new(config.thresholds.movement_kmh),
            door: DoorStateMachine::new(config.door_timings()),
            tracker: PassengerTracker::new(bus, config),
            latest_position: None,
            latest_motion: None,
            latest_proximity: None,
            latest_vision: None,
            current: None,
            previous_label: None,
            emitted: Vec::new(),
        }
    }

    /// Single dispatch point for inbound events.
    pub fn ingest(&mut self, event: Event, now: Moment) {
        match event.into_payload() {
            EventPayload::Position(sample) => self.latest_position = Some(sample),
            EventPayload::Motion(sample) => self.latest_motion = Some(sample),
            EventPayload::Proximity(sample) => self.on_proximity(sample, now),
            EventPayload::Vision(frame) => {
                self.tracker.process_camera_data(&frame, now);
                self.latest_vision = Some(frame);
            }
            EventPayload::VehicleState(_) | EventPayload::Passenger(_) => {
                warn!("fusion output fed back as input, dropping");
            }
        }
    }

    /// One fusion tick.
    ///
    /// Returns `None` without side effects until at least one position and
    /// one motion sample have arrived.
    pub fn fuse(&mut self, now: Moment) -> Option<FusionTick> {
        let (Some(position), Some(motion)) = (&self.latest_position, &self.latest_motion) else {
            return None;
        };

        let mut state = self.calculator.calculate(position, motion, now.unix_ms);
        if let Some(proximity) = &self.latest_proximity {
            state.door_open = proximity.is_open;
        }

        if self.previous_label != Some(state.label) {
            info!(
                state = %state.label,
                speed_kmh = state.speed_kmh,
                door_open = state.door_open,
                "vehicle state changed"
            );
        }
        self.previous_label = Some(state.label);
        self.current = Some(state.clone());

        if let Some(transition) = self.door.poll(now) {
            self.route_door_transition(transition, now);
        }
        let confirmed = self.tracker.check_pending_confirmations(now, state.is_stopped);
        self.emitted.extend(confirmed);

        Some(FusionTick {
            state,
            passenger_events: std::mem::take(&mut self.emitted),
        })
    }

    fn on_proximity(&mut self, sample: ProximitySample, now: Moment) {
        self.tracker.record_proximity(&sample);

        // Openings are gated on the last fused state, which is not refreshed
        // while ticks are paused
        if let Some(stopped) = self.current.as_ref().map(|c| c.is_stopped) {
            for transition in self.door.on_proximity(&sample, stopped, now) {
                self.route_door_transition(transition, now);
            }
        }

        self.latest_proximity = Some(sample);
    }

    fn route_door_transition(&mut self, transition: DoorTransition, now: Moment) {
        match transition {
            DoorTransition::Opened => self.tracker.on_door_opened(now),
            DoorTransition::Closing => self.tracker.on_door_closing(now),
            DoorTransition::CloseConfirmed => {
                let reconciled = self.tracker.on_door_closed(now);
                self.emitted.extend(reconciled);
            }
            DoorTransition::SafetyTimeout => self.tracker.on_monitoring_timeout(now),
            DoorTransition::Reopened | DoorTransition::OpenIgnored => {
                debug!(?transition, "door transition without passenger action");
            }
        }
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Latest fused state, `None` before the first successful tick.
    pub fn vehicle_state(&self) -> Option<&VehicleState> {
        self.current.as_ref()
    }

    pub fn door_state(&self) -> DoorState {
        self.door.state()
    }

    pub fn passenger_stats(&self) -> PassengerStats {
        self.tracker.stats()
    }

    pub fn latest_vision(&self) -> Option<&VisionFrame> {
        self.latest_vision.as_ref()
    }

    pub fn tracker(&self) -> &PassengerTracker {
        &self.tracker
    }

    pub fn reset_daily_totals(&mut self) {
        self.tracker.reset_daily_totals();
    }
}
