//! State Manager - orchestrates the fusion core of one vehicle.
//!
//! # Architecture
//!
//! ```text
//!  producers ──publish──▶ EventBus
//!                           │ subscribe(gps, mpu, door, camera)
//!                           ▼
//!              ┌─────────────────────────┐
//!              │ 4 forwarding tasks      │  try_send, drop on full
//!              └───────────┬─────────────┘
//!                          ▼ bounded queues (10)
//!              ┌─────────────────────────┐
//!              │ consumer task           │  sole writer of FusionState
//!              │  • ingest latest sample │
//!              │  • 100ms fusion tick    │──publish──▶ VehicleState
//!              └───────────┬─────────────┘
//!                          │ door transitions
//!                          ▼
//!                  PassengerTracker ──publish──▶ PassengerEvent
//! ```
//!
//! Status queries take the read side of the fusion lock and never block the
//! consumer for longer than a clone.
//!
//! # Usage
//!
//! ```ignore
//! use transit_core::{EventBus, FusionConfig, StateManager};
//! use transit_env::TokioContext;
//!
//! let bus = Arc::new(EventBus::new());
//! let manager = StateManager::new(TokioContext::shared(), bus.clone(), FusionConfig::default())?;
//! manager.start()?;
//! ```

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use transit_env::TransitContext;

use crate::config::FusionConfig;
use crate::door_state::DoorState;
use crate::error::FusionError;
use crate::event_bus::{EventBus, Subscription, SUBSCRIBER_QUEUE_CAPACITY};
use crate::events::{Event, EventKind, EventPayload, VehicleState};
use crate::fusion_state::{FusionState, FusionTick};
use crate::passenger_tracker::PassengerStats;

/// Lifecycle of the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    #[default]
    Stopped,
    Running,
    /// Sensor events are still ingested; fusion ticks are skipped
    Paused,
}

/// Internal queues the consumer drains, one per sensor kind.
struct SensorQueues {
    position: mpsc::Receiver<Event>,
    motion: mpsc::Receiver<Event>,
    proximity: mpsc::Receiver<Event>,
    vision: mpsc::Receiver<Event>,
}

/// Orchestrator of one vehicle's fusion core.
///
/// Generic over the context so the same manager runs on the real clock or
/// on Tokio's paused test clock.
pub struct StateManager<Ctx: TransitContext> {
    context: Arc<Ctx>,
    bus: Arc<EventBus>,
    config: FusionConfig,

    /// Written only by the consumer task (and `reset`)
    state: Arc<RwLock<FusionState>>,

    /// Run-state channel of the active session, `None` when stopped
    session: Mutex<Option<watch::Sender<RunState>>>,
}

impl<Ctx: TransitContext> StateManager<Ctx> {
    /// Creates a stopped manager. The configuration is validated here.
    pub fn new(context: Arc<Ctx>, bus: Arc<EventBus>, config: FusionConfig) -> Result<Self, FusionError> {
        config.validate()?;
        let state = FusionState::new(bus.clone(), &config);

        Ok(Self {
            context,
            bus,
            config,
            state: Arc::new(RwLock::new(state)),
            session: Mutex::new(None),
        })
    }

    /// Subscribes to the four sensor kinds and launches the forwarding and
    /// consumer tasks.
    pub fn start(&self) -> Result<(), FusionError> {
        let mut session = self.session.lock();
        if session.is_some() {
            return Err(FusionError::AlreadyRunning);
        }

        let (control, run) = watch::channel(RunState::Running);

        let queues = SensorQueues {
            position: self.forward(EventKind::Position, &run),
            motion: self.forward(EventKind::Motion, &run),
            proximity: self.forward(EventKind::Proximity, &run),
            vision: self.forward(EventKind::Vision, &run),
        };

        let consumer = run_consumer(
            self.context.clone(),
            self.bus.clone(),
            self.state.clone(),
            queues,
            run,
            self.config.tick_interval(),
        );
        self.context.spawn("state-manager-consumer", consumer);

        *session = Some(control);
        info!(device = %self.config.device_id, "state manager started");
        Ok(())
    }

    /// Ends the session. Tasks exit at their next wake-up. Idempotent.
    pub fn stop(&self) {
        if let Some(control) = self.session.lock().take() {
            control.send_replace(RunState::Stopped);
            info!(device = %self.config.device_id, "state manager stopped");
        }
    }

    /// Suspends fusion ticks while sensor events keep being ingested.
    pub fn pause(&self) {
        self.set_run_state(RunState::Paused);
    }

    /// Resumes ticking from the buffered samples.
    pub fn resume(&self) {
        self.set_run_state(RunState::Running);
    }

    /// Replaces every cached sample and both state machines with fresh
    /// instances, discarding pending records and track history.
    pub fn reset(&self) {
        *self.state.write() = FusionState::new(self.bus.clone(), &self.config);
        info!(device = %self.config.device_id, "fusion state reset");
    }

    /// Zeroes cumulative passenger totals. Onboard count is kept.
    pub fn reset_daily_totals(&self) {
        self.state.write().reset_daily_totals();
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Latest fused state, `None` until enough samples have arrived.
    pub fn vehicle_state(&self) -> Option<VehicleState> {
        self.state.read().vehicle_state().cloned()
    }

    pub fn door_state(&self) -> DoorState {
        self.state.read().door_state()
    }

    pub fn passenger_stats(&self) -> PassengerStats {
        self.state.read().passenger_stats()
    }

    pub fn run_state(&self) -> RunState {
        self.session
            .lock()
            .as_ref()
            .map(|control| *control.borrow())
            .unwrap_or(RunState::Stopped)
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    fn set_run_state(&self, next: RunState) {
        if let Some(control) = self.session.lock().as_ref() {
            let previous = control.send_replace(next);
            if previous != next {
                info!(from = ?previous, to = ?next, "state manager run state changed");
            }
        }
    }

    /// Spawns the forwarder for `kind` and returns its local queue.
    fn forward(&self, kind: EventKind, run: &watch::Receiver<RunState>) -> mpsc::Receiver<Event> {
        let subscription = self.bus.subscribe(kind);
        let (queue, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);

        self.context
            .spawn(kind.name(), run_forwarder(kind, subscription, queue, run.clone()));
        rx
    }
}

/// Moves events from a bus subscription into a local queue, dropping them
/// when the queue is full.
async fn run_forwarder(
    kind: EventKind,
    mut subscription: Subscription,
    queue: mpsc::Sender<Event>,
    mut run: watch::Receiver<RunState>,
) {
    loop {
        tokio::select! {
            event = subscription.recv() => match event {
                Some(event) => {
                    if queue.try_send(event).is_err() {
                        debug!(kind = %kind, "local queue full, event dropped");
                    }
                }
                None => break,
            },
            changed = run.changed() => {
                if changed.is_err() || *run.borrow() == RunState::Stopped {
                    break;
                }
            }
        }
    }
    debug!(kind = %kind, "forwarder exited");
}

/// Sole writer of the fusion state.
///
/// Waits on the four queues, the run-state channel and the next tick
/// deadline. The deadline is kept across iterations so a steady event
/// stream cannot starve the tick.
async fn run_consumer<Ctx: TransitContext>(
    context: Arc<Ctx>,
    bus: Arc<EventBus>,
    state: Arc<RwLock<FusionState>>,
    mut queues: SensorQueues,
    mut run: watch::Receiver<RunState>,
    tick: Duration,
) {
    let mut next_tick = context.now() + tick;

    loop {
        let wait = next_tick.saturating_sub(context.now());

        tokio::select! {
            Some(event) = queues.position.recv() => ingest(&context, &state, event),
            Some(event) = queues.motion.recv() => ingest(&context, &state, event),
            Some(event) = queues.proximity.recv() => ingest(&context, &state, event),
            Some(event) = queues.vision.recv() => ingest(&context, &state, event),
            changed = run.changed() => {
                if changed.is_err() || *run.borrow() == RunState::Stopped {
                    break;
                }
            }
            _ = context.sleep(wait) => {
                next_tick += tick;
                let now = context.now();
                if next_tick <= now {
                    next_tick = now + tick;
                }

                if *run.borrow() == RunState::Running {
                    let fused = state.write().fuse(context.moment());
                    if let Some(FusionTick { state: vehicle, passenger_events }) = fused {
                        if !passenger_events.is_empty() {
                            debug!(
                                count = passenger_events.len(),
                                onboard = passenger_events.last().map(|e| e.current_onboard),
                                "passenger events this tick"
                            );
                        }
                        bus.publish(Event::new(vehicle.timestamp_ms, EventPayload::VehicleState(vehicle)));
                    }
                }
            }
        }
    }

    debug!("consumer exited");
}

fn ingest<Ctx: TransitContext>(context: &Arc<Ctx>, state: &RwLock<FusionState>, event: Event) {
    let now = context.moment();
    state.write().ingest(event, now);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{
        MotionSample, PassengerEventKind, PersonTrack, PositionSample, ProximitySample,
        VehicleStateLabel, VisionFrame,
    };
    use transit_env::TokioContext;

    fn manager() -> (StateManager<TokioContext>, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new());
        let manager = StateManager::new(TokioContext::shared(), bus.clone(), FusionConfig::default())
            .unwrap();
        (manager, bus)
    }

    fn publish_position(bus: &EventBus, speed_kmh: f64) {
        bus.publish(Event::new(
            0,
            EventPayload::Position(PositionSample {
                speed_kmh,
                satellites: 8,
                fix_quality: 1,
                ..Default::default()
            }),
        ));
    }

    fn publish_still(bus: &EventBus) {
        bus.publish(Event::new(0, EventPayload::Motion(MotionSample::default())));
    }

    fn publish_door(bus: &EventBus, distance_mm: u32) {
        bus.publish(Event::new(
            0,
            EventPayload::Proximity(ProximitySample::from_distance(distance_mm, 300)),
        ));
    }

    fn publish_camera(bus: &EventBus, ids: &[u64]) {
        let tracks = ids
            .iter()
            .map(|&id| PersonTrack {
                track_id: id,
                confidence: 0.9,
                ..Default::default()
            })
            .collect();
        bus.publish(Event::new(0, EventPayload::Vision(VisionFrame::from_tracks(0, tracks))));
    }

    async fn sleep_ms(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = FusionConfig::default();
        config.timeouts.entry_min = 20.0;

        let result = StateManager::new(TokioContext::shared(), Arc::new(EventBus::new()), config);
        assert!(matches!(result, Err(FusionError::InvalidConfig(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_fails_and_stop_is_idempotent() {
        let (manager, bus) = manager();

        manager.start().unwrap();
        assert_eq!(manager.run_state(), RunState::Running);
        assert!(matches!(manager.start(), Err(FusionError::AlreadyRunning)));

        manager.stop();
        manager.stop();
        assert_eq!(manager.run_state(), RunState::Stopped);

        sleep_ms(10).await;
        assert_eq!(bus.subscriber_count(EventKind::Position), 0);

        manager.start().unwrap();
        assert_eq!(bus.subscriber_count(EventKind::Position), 1);
        manager.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_output_until_position_and_motion() {
        let (manager, bus) = manager();
        let mut states = bus.subscribe(EventKind::VehicleState);
        manager.start().unwrap();

        sleep_ms(1000).await;
        assert!(states.try_recv().is_err());
        assert!(manager.vehicle_state().is_none());

        publish_position(&bus, 0.0);
        sleep_ms(500).await;
        assert!(states.try_recv().is_err());

        publish_still(&bus);
        sleep_ms(250).await;

        let event = states.try_recv().unwrap();
        match event.payload() {
            EventPayload::VehicleState(state) => assert_eq!(state.label, VehicleStateLabel::Stopped),
            other => panic!("unexpected payload {:?}", other),
        }
        manager.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_buffers_and_resume_continues() {
        let (manager, bus) = manager();
        let mut states = bus.subscribe(EventKind::VehicleState);
        manager.start().unwrap();

        publish_position(&bus, 0.0);
        publish_still(&bus);
        sleep_ms(250).await;

        manager.pause();
        assert_eq!(manager.run_state(), RunState::Paused);
        while states.try_recv().is_ok() {}

        publish_position(&bus, 25.0);
        sleep_ms(1000).await;
        assert!(states.try_recv().is_err());
        assert_eq!(
            manager.vehicle_state().map(|s| s.label),
            Some(VehicleStateLabel::Stopped)
        );

        manager.resume();
        sleep_ms(150).await;
        assert_eq!(
            manager.vehicle_state().map(|s| s.label),
            Some(VehicleStateLabel::GpsMovement)
        );
        assert!(states.try_recv().is_ok());
        manager.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_boarding_cycle_end_to_end() {
        let (manager, bus) = manager();
        let mut passengers = bus.subscribe(EventKind::Passenger);
        manager.start().unwrap();

        publish_position(&bus, 0.0);
        publish_still(&bus);
        sleep_ms(300).await;

        publish_door(&bus, 420);
        sleep_ms(100).await;
        assert_eq!(manager.door_state(), DoorState::Opened);

        for _ in 0..10 {
            publish_camera(&bus, &[1, 2]);
            sleep_ms(500).await;
        }

        publish_door(&bus, 120);
        sleep_ms(100).await;
        assert_eq!(manager.door_state(), DoorState::Closing);

        for _ in 0..12 {
            publish_camera(&bus, &[1, 2]);
            sleep_ms(500).await;
        }

        assert_eq!(manager.door_state(), DoorState::Idle);
        let stats = manager.passenger_stats();
        assert_eq!(stats.onboard, 2);
        assert_eq!(stats.total_entries, 2);

        let mut entries = 0;
        while let Ok(event) = passengers.try_recv() {
            if let EventPayload::Passenger(p) = event.payload() {
                assert_eq!(p.kind, PassengerEventKind::Entry);
                entries += 1;
            }
        }
        assert_eq!(entries, 2);
        manager.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_boarded_passengers_stay_aboard_after_departure() {
        let (manager, bus) = manager();
        manager.start().unwrap();

        publish_position(&bus, 0.0);
        publish_still(&bus);
        sleep_ms(300).await;

        publish_door(&bus, 420);
        sleep_ms(100).await;
        for _ in 0..10 {
            publish_camera(&bus, &[1, 2]);
            sleep_ms(500).await;
        }

        publish_door(&bus, 120);
        sleep_ms(100).await;
        for _ in 0..12 {
            publish_camera(&bus, &[1, 2]);
            sleep_ms(500).await;
        }
        assert_eq!(manager.door_state(), DoorState::Idle);

        // Pull away with both riders still in the cabin camera's view
        publish_position(&bus, 25.0);
        for _ in 0..20 {
            publish_camera(&bus, &[1, 2]);
            sleep_ms(500).await;
        }

        let stats = manager.passenger_stats();
        assert_eq!(stats.onboard, 2);
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.total_exits, 0);
        manager.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_restores_defaults() {
        let (manager, bus) = manager();
        manager.start().unwrap();

        publish_position(&bus, 0.0);
        publish_still(&bus);
        sleep_ms(250).await;
        assert!(manager.vehicle_state().is_some());

        manager.reset();
        assert!(manager.vehicle_state().is_none());
        assert_eq!(manager.door_state(), DoorState::Idle);
        assert_eq!(manager.passenger_stats(), PassengerStats::default());

        // Cached samples are gone too, so ticks stay silent
        sleep_ms(500).await;
        assert!(manager.vehicle_state().is_none());
        manager.stop();
    }
}
