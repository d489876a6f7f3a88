//! Door State Machine - open/close confirmation with a safety timeout.
//!
//! ```text
//!            open & stopped          closed edge
//!   IDLE ───────────────────▶ OPENED ───────────▶ CLOSING
//!    ▲                          ▲     reopen         │
//!    │                          └────────────────────┤
//!    │                                               │ closed ≥ close_confirm
//!    │        (immediate)                            ▼
//!    └──────────────────────────────────── ANALYZING_CHANGES
//!    ▲
//!    └──── any monitoring state, elapsed ≥ max_monitoring (safety)
//! ```
//!
//! The machine is driven by proximity edges and polled every fusion tick so
//! that the two timer transitions fire without new sensor input.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use transit_env::Moment;

use crate::config::DoorTimings;
use crate::events::ProximitySample;

/// State of the door monitoring cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DoorState {
    #[default]
    Idle,
    Opened,
    Closing,
    AnalyzingChanges,
}

impl DoorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DoorState::Idle => "IDLE",
            DoorState::Opened => "OPENED",
            DoorState::Closing => "CLOSING",
            DoorState::AnalyzingChanges => "ANALYZING_CHANGES",
        }
    }

    /// Human-readable description for status displays.
    pub fn description(&self) -> &'static str {
        match self {
            DoorState::Idle => "Door closed, waiting for activity",
            DoorState::Opened => "Door open, monitoring passengers",
            DoorState::Closing => "Door closed, waiting for confirmation",
            DoorState::AnalyzingChanges => "Closure confirmed, analyzing passenger changes",
        }
    }

    /// True while a door window is being monitored.
    pub fn is_monitoring(&self) -> bool {
        matches!(self, DoorState::Opened | DoorState::Closing)
    }
}

impl std::fmt::Display for DoorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Observable outcome of feeding or polling the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoorTransition {
    /// Monitoring started (IDLE → OPENED)
    Opened,
    /// Door opened again while monitoring; the window continues
    Reopened,
    /// Door opened while the vehicle was moving; nothing started
    OpenIgnored,
    /// Closed edge while monitoring (→ CLOSING)
    Closing,
    /// Closure held for the full confirmation window (→ ANALYZING_CHANGES → IDLE)
    CloseConfirmed,
    /// Monitoring exceeded its maximum duration (→ IDLE)
    SafetyTimeout,
}

/// Single authoritative door controller of one vehicle.
#[derive(Debug, Clone)]
pub struct DoorStateMachine {
    timings: DoorTimings,
    state: DoorState,

    /// Last sensor reading, for edge detection
    previous_open: bool,

    /// Set while a window is monitored
    monitoring_start: Option<Duration>,

    /// Latest closed edge during monitoring
    close_start: Option<Duration>,
}

impl DoorStateMachine {
    pub fn new(timings: DoorTimings) -> Self {
        Self {
            timings,
            state: DoorState::Idle,
            previous_open: false,
            monitoring_start: None,
            close_start: None,
        }
    }

    pub fn state(&self) -> DoorState {
        self.state
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring_start.is_some()
    }

    /// Time since monitoring started, if it is active.
    pub fn monitoring_elapsed(&self, now: Moment) -> Option<Duration> {
        self.monitoring_start.map(|start| now.since(start))
    }

    /// Feeds one proximity sample, then evaluates the timers.
    ///
    /// `vehicle_stopped` gates only the IDLE → OPENED transition.
    pub fn on_proximity(
        &mut self,
        sample: &ProximitySample,
        vehicle_stopped: bool,
        now: Moment,
    ) -> Vec<DoorTransition> {
        let mut transitions = Vec::new();

        if sample.is_open != self.previous_open {
            let edge = if sample.is_open {
                self.handle_opened(sample, vehicle_stopped, now)
            } else {
                self.handle_closed(sample, now)
            };
            transitions.extend(edge);
            self.previous_open = sample.is_open;
        }

        transitions.extend(self.poll(now));
        transitions
    }

    /// Evaluates the close-confirmation debounce and the safety timeout.
    pub fn poll(&mut self, now: Moment) -> Option<DoorTransition> {
        let monitoring_start = self.monitoring_start?;

        if self.state == DoorState::Closing && !self.previous_open {
            if let Some(close_start) = self.close_start {
                let closed_for = now.since(close_start);
                if closed_for >= self.timings.close_confirm {
                    self.state = DoorState::AnalyzingChanges;
                    info!(
                        closed_secs = closed_for.as_secs_f64(),
                        state = %self.state,
                        "door closure confirmed"
                    );
                    self.finalize(now);
                    return Some(DoorTransition::CloseConfirmed);
                }
            }
        }

        if now.since(monitoring_start) >= self.timings.max_monitoring {
            warn!(
                max_secs = self.timings.max_monitoring.as_secs_f64(),
                state = %self.state,
                "door monitoring safety timeout, door blocked or sensor stuck"
            );
            self.finalize(now);
            return Some(DoorTransition::SafetyTimeout);
        }

        None
    }

    fn handle_opened(
        &mut self,
        sample: &ProximitySample,
        vehicle_stopped: bool,
        now: Moment,
    ) -> Option<DoorTransition> {
        if self.monitoring_start.is_some() {
            self.state = DoorState::Opened;
            self.close_start = None;
            info!(distance_mm = sample.distance_mm, "door reopened during monitoring");
            return Some(DoorTransition::Reopened);
        }

        if !vehicle_stopped {
            info!(distance_mm = sample.distance_mm, "door open while vehicle moving, ignoring");
            return Some(DoorTransition::OpenIgnored);
        }

        self.state = DoorState::Opened;
        self.monitoring_start = Some(now.monotonic);
        self.close_start = None;
        info!(distance_mm = sample.distance_mm, state = %self.state, "door opened, monitoring started");
        Some(DoorTransition::Opened)
    }

    fn handle_closed(&mut self, sample: &ProximitySample, now: Moment) -> Option<DoorTransition> {
        self.monitoring_start?;

        self.state = DoorState::Closing;
        self.close_start = Some(now.monotonic);
        info!(
            distance_mm = sample.distance_mm,
            confirm_secs = self.timings.close_confirm.as_secs_f64(),
            "door closed, awaiting confirmation"
        );
        Some(DoorTransition::Closing)
    }

    fn finalize(&mut self, now: Moment) {
        if let Some(elapsed) = self.monitoring_elapsed(now) {
            info!(duration_secs = elapsed.as_secs_f64(), "door monitoring finished");
        }
        self.monitoring_start = None;
        self.close_start = None;
        self.state = DoorState::Idle;
    }
}

impl Default for DoorStateMachine {
    fn default() -> Self {
        Self::new(DoorTimings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> ProximitySample {
        ProximitySample::from_distance(400, 300)
    }

    fn closed() -> ProximitySample {
        ProximitySample::from_distance(120, 300)
    }

    fn at(secs: f64) -> Moment {
        Moment::at_secs(secs)
    }

    #[test]
    fn test_open_while_stopped_starts_monitoring() {
        let mut door = DoorStateMachine::default();
        let t = door.on_proximity(&open(), true, at(1.0));

        assert_eq!(t, vec![DoorTransition::Opened]);
        assert_eq!(door.state(), DoorState::Opened);
        assert!(door.is_monitoring());
    }

    #[test]
    fn test_open_while_moving_is_ignored() {
        let mut door = DoorStateMachine::default();
        let t = door.on_proximity(&open(), false, at(1.0));

        assert_eq!(t, vec![DoorTransition::OpenIgnored]);
        assert_eq!(door.state(), DoorState::Idle);
        assert!(!door.is_monitoring());

        // Closing after an ignored open does nothing either
        assert!(door.on_proximity(&closed(), false, at(2.0)).is_empty());
        assert_eq!(door.state(), DoorState::Idle);
    }

    #[test]
    fn test_repeated_samples_are_not_edges() {
        let mut door = DoorStateMachine::default();
        door.on_proximity(&open(), true, at(1.0));

        assert!(door.on_proximity(&open(), true, at(1.1)).is_empty());
        assert_eq!(door.state(), DoorState::Opened);
    }

    #[test]
    fn test_close_confirms_after_window() {
        let mut door = DoorStateMachine::default();
        door.on_proximity(&open(), true, at(0.0));
        assert_eq!(
            door.on_proximity(&closed(), true, at(10.0)),
            vec![DoorTransition::Closing]
        );

        assert_eq!(door.poll(at(14.9)), None);
        assert_eq!(door.state(), DoorState::Closing);

        assert_eq!(door.poll(at(15.0)), Some(DoorTransition::CloseConfirmed));
        assert_eq!(door.state(), DoorState::Idle);
        assert!(!door.is_monitoring());
    }

    #[test]
    fn test_flapping_restarts_debounce_from_last_closing_edge() {
        let mut door = DoorStateMachine::default();
        door.on_proximity(&open(), true, at(0.0));

        door.on_proximity(&closed(), true, at(10.0));
        assert_eq!(
            door.on_proximity(&open(), true, at(12.0)),
            vec![DoorTransition::Reopened]
        );
        door.on_proximity(&closed(), true, at(13.0));

        // 5s after the first closing edge, only 2s after the last
        assert_eq!(door.poll(at(15.0)), None);
        assert_eq!(door.poll(at(17.9)), None);
        assert_eq!(door.state(), DoorState::Closing);

        assert_eq!(door.poll(at(18.0)), Some(DoorTransition::CloseConfirmed));
    }

    #[test]
    fn test_safety_timeout_when_door_never_closes() {
        let mut door = DoorStateMachine::default();
        door.on_proximity(&open(), true, at(0.0));

        let mut t = 0.0;
        while t < 59.0 {
            t += 1.0;
            assert!(door.on_proximity(&open(), true, at(t)).is_empty());
        }

        assert_eq!(door.poll(at(59.5)), None);
        assert_eq!(door.poll(at(60.0)), Some(DoorTransition::SafetyTimeout));
        assert_eq!(door.state(), DoorState::Idle);
    }

    #[test]
    fn test_reopen_does_not_extend_safety_window() {
        let mut door = DoorStateMachine::default();
        door.on_proximity(&open(), true, at(0.0));
        door.on_proximity(&closed(), true, at(50.0));
        door.on_proximity(&open(), true, at(52.0));

        assert_eq!(door.poll(at(60.0)), Some(DoorTransition::SafetyTimeout));
    }

    #[test]
    fn test_timeout_reported_from_proximity_feed() {
        let mut door = DoorStateMachine::default();
        door.on_proximity(&open(), true, at(0.0));

        let t = door.on_proximity(&closed(), true, at(61.0));
        assert_eq!(t, vec![DoorTransition::Closing, DoorTransition::SafetyTimeout]);
        assert_eq!(door.state(), DoorState::Idle);
    }

    #[test]
    fn test_new_cycle_after_confirmation() {
        let mut door = DoorStateMachine::default();
        door.on_proximity(&open(), true, at(0.0));
        door.on_proximity(&closed(), true, at(5.0));
        door.poll(at(10.0));

        assert_eq!(
            door.on_proximity(&open(), true, at(20.0)),
            vec![DoorTransition::Opened]
        );
        assert_eq!(door.monitoring_elapsed(at(25.0)), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_poll_idle_is_noop() {
        let mut door = DoorStateMachine::default();
        assert_eq!(door.poll(at(1000.0)), None);
        assert_eq!(door.state().description(), "Door closed, waiting for activity");
    }
}
