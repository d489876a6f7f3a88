//! Fleet runner - launches independent simulated vehicles and audits what
//! their fusion cores published.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use transit_core::{
    EventBus, EventKind, EventPayload, PassengerEvent, PassengerEventKind, PassengerStats,
    Subscription, VehicleStateLabel,
};
use transit_env::{DeviceId, TokioContext, TransitContext};

use crate::config::SimConfig;
use crate::error::SimError;
use crate::vehicle::VehicleInstance;

/// Vehicles start in this many staggered slots
const START_SLOTS: usize = 10;

/// Gap between consecutive start slots
const START_STAGGER: Duration = Duration::from_millis(100);

/// Time given to tasks to notice a stop before buses are closed
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// A change of the fused classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub timestamp_ms: u64,
    pub from: Option<VehicleStateLabel>,
    pub to: VehicleStateLabel,
    pub speed_kmh: f64,
}

/// Outcome for one vehicle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleReport {
    pub device_id: DeviceId,

    /// Counters read from the fusion core after stopping
    pub final_stats: PassengerStats,

    pub final_label: Option<VehicleStateLabel>,

    /// Every passenger event the recorder received, in order
    pub passenger_events: Vec<PassengerEvent>,

    pub state_changes: Vec<StateChange>,

    /// Events the bus dropped for any full subscriber queue
    pub dropped_events: u64,

    /// Places where recorded passenger events skip ahead
    pub sequence_gaps: usize,

    pub passed: bool,
    pub failure_reason: Option<String>,
}

/// Results from a fleet run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetResult {
    pub seed: u64,
    pub duration_secs: f64,
    pub vehicles: Vec<VehicleReport>,
}

impl FleetResult {
    pub fn passed(&self) -> bool {
        self.vehicles.iter().all(|v| v.passed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &VehicleReport> {
        self.vehicles.iter().filter(|v| !v.passed)
    }

    pub fn total_entries(&self) -> u32 {
        self.vehicles.iter().map(|v| v.final_stats.total_entries).sum()
    }

    pub fn total_exits(&self) -> u32 {
        self.vehicles.iter().map(|v| v.final_stats.total_exits).sum()
    }
}

/// Runs a fleet of vehicles for a fixed duration.
pub struct FleetRunner {
    config: SimConfig,

    /// Vehicle `i` runs on `seed + i`
    seed: u64,

    instances: usize,
    duration: Duration,
}

impl FleetRunner {
    pub fn new(config: SimConfig, seed: u64) -> Self {
        Self {
            config,
            seed,
            instances: 1,
            duration: Duration::from_secs(120),
        }
    }

    pub fn with_instances(mut self, instances: usize) -> Self {
        self.instances = instances.max(1);
        self
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration = Duration::from_secs_f64(secs.max(0.0));
        self
    }

    /// Launches every vehicle, lets them run, stops them and audits the
    /// recorded output.
    pub async fn run(&self) -> Result<FleetResult, SimError> {
        info!(
            instances = self.instances,
            seed = self.seed,
            duration_secs = self.duration.as_secs_f64(),
            "launching fleet"
        );

        let mut fleet = Vec::with_capacity(self.instances);
        for i in 0..self.instances {
            let context = Arc::new(TokioContext::with_seed(self.seed.wrapping_add(i as u64)));
            let vehicle = VehicleInstance::new(DeviceId::from_index(i + 1), context.clone(), self.config.clone())?;
            let recorder = Recorder::attach(context.as_ref(), vehicle.bus());
            fleet.push((vehicle, recorder));
        }

        // Staggered starts so vehicles do not tick in lockstep
        for slot in 0..START_SLOTS {
            if slot > 0 {
                tokio::time::sleep(START_STAGGER).await;
            }
            for (vehicle, _) in fleet.iter().skip(slot).step_by(START_SLOTS) {
                vehicle.start()?;
            }
            if slot + 1 >= self.instances {
                break;
            }
        }
        info!(instances = self.instances, "all vehicles running");

        tokio::time::sleep(self.duration).await;

        for (vehicle, _) in &fleet {
            vehicle.stop();
        }
        tokio::time::sleep(DRAIN_GRACE).await;
        for (vehicle, _) in &fleet {
            vehicle.bus().close();
        }
        tokio::time::sleep(DRAIN_GRACE).await;

        let vehicles: Vec<VehicleReport> = fleet
            .iter()
            .map(|(vehicle, recorder)| {
                let report = recorder.report(
                    vehicle.id().clone(),
                    vehicle.manager().passenger_stats(),
                    vehicle.bus().dropped_events(),
                );
                if report.passed {
                    debug!(device = %report.device_id, events = report.passenger_events.len(), "vehicle passed");
                } else {
                    warn!(
                        device = %report.device_id,
                        reason = report.failure_reason.as_deref().unwrap_or(""),
                        "vehicle failed"
                    );
                }
                report
            })
            .collect();

        Ok(FleetResult {
            seed: self.seed,
            duration_secs: self.duration.as_secs_f64(),
            vehicles,
        })
    }
}

// ============================================================================
// RECORDING
// ============================================================================

#[derive(Default)]
struct RecordedLog {
    passenger_events: Vec<PassengerEvent>,
    state_changes: Vec<StateChange>,
}

/// Collects one vehicle's passenger events and classification changes.
struct Recorder {
    log: Arc<Mutex<RecordedLog>>,
}

impl Recorder {
    /// Subscribes before the vehicle starts so the log is complete.
    fn attach<Ctx: TransitContext>(context: &Ctx, bus: &EventBus) -> Self {
        let log = Arc::new(Mutex::new(RecordedLog::default()));

        context.spawn(
            "recorder-passenger",
            record(bus.subscribe(EventKind::Passenger), log.clone()),
        );
        context.spawn(
            "recorder-vehicle-state",
            record(bus.subscribe(EventKind::VehicleState), log.clone()),
        );

        Self { log }
    }

    fn report(&self, device_id: DeviceId, final_stats: PassengerStats, dropped_events: u64) -> VehicleReport {
        let log = self.log.lock();
        let audit = audit_passenger_log(&log.passenger_events, &final_stats, dropped_events);

        VehicleReport {
            device_id,
            final_stats,
            final_label: log.state_changes.last().map(|c| c.to),
            passenger_events: log.passenger_events.clone(),
            state_changes: log.state_changes.clone(),
            dropped_events,
            sequence_gaps: audit.gaps,
            passed: audit.failure.is_none(),
            failure_reason: audit.failure,
        }
    }
}

/// Appends every event until the bus closes.
async fn record(mut events: Subscription, log: Arc<Mutex<RecordedLog>>) {
    while let Some(event) = events.recv().await {
        let mut recorded = log.lock();
        match event.into_payload() {
            EventPayload::Passenger(passenger) => recorded.passenger_events.push(passenger),
            EventPayload::VehicleState(state) => {
                let from = recorded.state_changes.last().map(|c| c.to);
                if from != Some(state.label) {
                    recorded.state_changes.push(StateChange {
                        timestamp_ms: state.timestamp_ms,
                        from,
                        to: state.label,
                        speed_kmh: state.speed_kmh,
                    });
                }
            }
            _ => {}
        }
    }
}

// ============================================================================
// AUDIT
// ============================================================================

#[derive(Debug, Default, PartialEq)]
struct PassengerAudit {
    gaps: usize,
    failure: Option<String>,
}

/// Checks that each recorded event's counters follow from the previous one.
///
/// `total_entries + total_exits` grows by exactly one per event, which makes
/// it a sequence number: a larger jump is a gap, tolerated only when the bus
/// reports drops. The last recorded event must match the final counters
/// unless drops could have hidden later events.
fn audit_passenger_log(events: &[PassengerEvent], final_stats: &PassengerStats, dropped: u64) -> PassengerAudit {
    let mut audit = PassengerAudit::default();
    let mut previous = PassengerStats::default();

    for (i, event) in events.iter().enumerate() {
        let expected_sequence = previous.total_entries + previous.total_exits + 1;
        let sequence = event.total_entries + event.total_exits;

        if sequence > expected_sequence {
            audit.gaps += 1;
            if dropped == 0 {
                audit.failure = Some(format!("event {} skips ahead without any bus drops", i));
                return audit;
            }
        } else if sequence < expected_sequence {
            audit.failure = Some(format!("event {} goes back in sequence", i));
            return audit;
        } else {
            let (entries, exits, onboard) = match event.kind {
                PassengerEventKind::Entry => (
                    previous.total_entries + 1,
                    previous.total_exits,
                    previous.onboard + 1,
                ),
                PassengerEventKind::Exit => (
                    previous.total_entries,
                    previous.total_exits + 1,
                    previous.onboard.saturating_sub(1),
                ),
            };

            if (event.total_entries, event.total_exits, event.current_onboard) != (entries, exits, onboard) {
                audit.failure = Some(format!(
                    "event {} counters ({}, {}, {}) do not follow ({}, {}, {})",
                    i, event.total_entries, event.total_exits, event.current_onboard, entries, exits, onboard
                ));
                return audit;
            }
        }

        if event.delta != event.kind.delta() {
            audit.failure = Some(format!("event {} has delta {} for {}", i, event.delta, event.kind.as_str()));
            return audit;
        }

        previous = PassengerStats {
            onboard: event.current_onboard,
            total_entries: event.total_entries,
            total_exits: event.total_exits,
        };
    }

    if previous != *final_stats && dropped == 0 {
        audit.failure = Some(format!(
            "final counters {:?} differ from last recorded event {:?}",
            final_stats, previous
        ));
    }

    audit
}

#[cfg(test)]
mod tests {
    use super::*;
    use transit_core::TrackRef;
    use PassengerEventKind::{Entry, Exit};

    fn event(kind: PassengerEventKind, onboard: u32, entries: u32, exits: u32) -> PassengerEvent {
        PassengerEvent {
            kind,
            track: TrackRef::Bulk(1),
            confidence: 0.85,
            sensor_distance_mm: None,
            delta: kind.delta(),
            current_onboard: onboard,
            total_entries: entries,
            total_exits: exits,
            device_id: "BUS-0001".to_string(),
            timestamp_ms: 0,
        }
    }

    fn stats(onboard: u32, total_entries: u32, total_exits: u32) -> PassengerStats {
        PassengerStats {
            onboard,
            total_entries,
            total_exits,
        }
    }

    #[test]
    fn test_consistent_log_passes() {
        let events = [
            event(Entry, 1, 1, 0),
            event(Entry, 2, 2, 0),
            event(Exit, 1, 2, 1),
            event(Exit, 0, 2, 2),
            // Exit while nobody is counted aboard saturates
            event(Exit, 0, 2, 3),
        ];

        let audit = audit_passenger_log(&events, &stats(0, 2, 3), 0);
        assert_eq!(audit, PassengerAudit::default());
    }

    #[test]
    fn test_wrong_onboard_fails() {
        let events = [event(Entry, 1, 1, 0), event(Entry, 3, 2, 0)];
        let audit = audit_passenger_log(&events, &stats(3, 2, 0), 0);
        assert!(audit.failure.unwrap().contains("event 1"));
    }

    #[test]
    fn test_gap_needs_drops() {
        let events = [event(Entry, 1, 1, 0), event(Entry, 3, 3, 0)];

        let strict = audit_passenger_log(&events, &stats(3, 3, 0), 0);
        assert!(strict.failure.is_some());

        let tolerant = audit_passenger_log(&events, &stats(3, 3, 0), 4);
        assert_eq!(tolerant.gaps, 1);
        assert!(tolerant.failure.is_none());
    }

    #[test]
    fn test_final_stats_must_match_last_event() {
        let events = [event(Entry, 1, 1, 0)];
        assert!(audit_passenger_log(&events, &stats(2, 2, 0), 0).failure.is_some());
        assert!(audit_passenger_log(&[], &stats(0, 0, 0), 0).failure.is_none());
    }

    #[test]
    fn test_sequence_going_backwards_fails() {
        let events = [event(Entry, 1, 1, 0), event(Entry, 2, 2, 0), event(Entry, 1, 1, 0)];
        assert!(audit_passenger_log(&events, &stats(1, 1, 0), 0).failure.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fleet_run_records_and_passes() {
        let result = FleetRunner::new(SimConfig::default(), 42)
            .with_instances(3)
            .with_duration(150.0)
            .run()
            .await
            .unwrap();

        assert_eq!(result.vehicles.len(), 3);
        assert_eq!(result.seed, 42);

        let ids: Vec<&str> = result.vehicles.iter().map(|v| v.device_id.as_str()).collect();
        assert_eq!(ids, ["BUS-0001", "BUS-0002", "BUS-0003"]);

        for vehicle in &result.vehicles {
            assert!(vehicle.passed, "{:?}", vehicle.failure_reason);
            assert!(!vehicle.state_changes.is_empty());
            assert_eq!(vehicle.state_changes[0].from, None);
            for event in &vehicle.passenger_events {
                assert_eq!(event.device_id, vehicle.device_id.as_str());
            }
        }
        assert!(result.passed());

        // Riders stay aboard between stops
        assert!(result.total_entries() > result.total_exits());
        assert!(result.vehicles.iter().any(|v| v.final_stats.onboard > 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_config_fails_before_launch() {
        let mut config = SimConfig::default();
        config.sensors.gps.frequency_hz = 0.0;

        let result = FleetRunner::new(config, 1).run().await;
        assert!(matches!(result, Err(SimError::Sensor(_))));
    }
}
