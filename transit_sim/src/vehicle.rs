//! One simulated vehicle: its own bus, sensor producers, fusion core and
//! drive profile.
//!
//! ```text
//!   DriveProfile ──commanded speed──▶ VehicleSignals ◀──feedback── EventBus
//!                                          │                         ▲
//!                                          ▼ snapshot                │
//!                     gps / mpu / door / camera producers ──publish──┤
//!                                                                    │
//!                                  StateManager ◀──subscribe─────────┘
//! ```
//!
//! Producers never see the fusion core directly. The fused vehicle state,
//! door readings and GPS speed flow back into the shared signals through
//! small feedback tasks, the same way an onboard unit would wire them.

use parking_lot::{Mutex, RwLock};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

use transit_core::{
    EventBus, EventKind, EventPayload, FusionError, RunState, StateManager, Subscription,
};
use transit_env::{DeviceId, TransitContext};

use crate::camera::CameraModel;
use crate::config::SimConfig;
use crate::drive::DriveProfile;
use crate::error::SimError;
use crate::gps::GpsModel;
use crate::motion::MotionModel;
use crate::producer::{run_producer, wait_until_running, SensorModel, SharedSignals, VehicleSignals};
use crate::proximity::ProximityModel;

/// The drive profile is re-evaluated this often
const DRIVE_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound of the per-vehicle speed jitter width (km/h)
const MAX_SPEED_JITTER_KMH: f64 = 0.2;

pub struct VehicleInstance<Ctx: TransitContext> {
    id: DeviceId,
    context: Arc<Ctx>,
    bus: Arc<EventBus>,
    manager: StateManager<Ctx>,
    signals: SharedSignals,
    config: SimConfig,
    profile: DriveProfile,
    speed_jitter_kmh: f64,

    /// Run-state channel shared by producers and helper tasks
    control: Mutex<Option<watch::Sender<RunState>>>,
}

impl<Ctx: TransitContext> VehicleInstance<Ctx> {
    /// Creates a stopped vehicle. The fusion core publishes under `id`.
    pub fn new(id: DeviceId, context: Arc<Ctx>, config: SimConfig) -> Result<Self, SimError> {
        config.validate()?;

        let mut config = config;
        config.fusion.device_id = id.to_string();

        let bus = Arc::new(EventBus::new());
        let manager = StateManager::new(context.clone(), bus.clone(), config.fusion.clone())?;

        let mut rng = ChaCha8Rng::seed_from_u64(context.seed());
        let profile = DriveProfile::random_urban(&mut rng);
        let speed_jitter_kmh = rng.gen_range(0.0..MAX_SPEED_JITTER_KMH);

        Ok(Self {
            id,
            context,
            bus,
            manager,
            signals: Arc::new(RwLock::new(VehicleSignals::default())),
            config,
            profile,
            speed_jitter_kmh,
            control: Mutex::new(None),
        })
    }

    /// Starts the fusion core, the four producers, the feedback tasks and
    /// the drive loop.
    pub fn start(&self) -> Result<(), SimError> {
        let mut control = self.control.lock();
        if control.is_some() {
            return Err(FusionError::AlreadyRunning.into());
        }

        self.manager.start()?;
        self.signals.write().profile_origin = self.context.now();

        let (sender, run) = watch::channel(RunState::Running);
        let seed = self.context.seed();
        let sensors = &self.config.sensors;

        self.spawn_producer("gps", GpsModel::new(sensors.gps.clone(), self.config.route.clone(), seed), &run);
        self.spawn_producer("mpu", MotionModel::new(sensors.motion.clone(), seed), &run);
        self.spawn_producer(
            "door",
            ProximityModel::new(
                sensors.proximity.clone(),
                self.config.fusion.thresholds.door_distance_mm,
                seed,
            ),
            &run,
        );
        self.spawn_producer("camera", CameraModel::new(sensors.camera.clone(), seed), &run);

        self.spawn_feedback("feedback-vehicle-state", EventKind::VehicleState, &run, |signals, payload| {
            if let EventPayload::VehicleState(state) = payload {
                signals.vehicle_stopped = state.is_stopped;
            }
        });
        self.spawn_feedback("feedback-door", EventKind::Proximity, &run, |signals, payload| {
            if let EventPayload::Proximity(sample) = payload {
                signals.door_open = sample.is_open;
            }
        });
        self.spawn_feedback("feedback-gps", EventKind::Position, &run, |signals, payload| {
            if let EventPayload::Position(sample) = payload {
                signals.reported_speed_kmh = sample.speed_kmh;
            }
        });

        self.context.spawn(
            "drive-profile",
            run_drive(
                self.context.clone(),
                self.profile.clone(),
                self.speed_jitter_kmh,
                self.signals.clone(),
                run,
            ),
        );

        *control = Some(sender);
        info!(device = %self.id, "vehicle started");
        Ok(())
    }

    /// Stops every task of this vehicle. Idempotent.
    pub fn stop(&self) {
        if let Some(sender) = self.control.lock().take() {
            sender.send_replace(RunState::Stopped);
            self.manager.stop();
            info!(device = %self.id, "vehicle stopped");
        }
    }

    pub fn pause(&self) {
        if let Some(sender) = self.control.lock().as_ref() {
            sender.send_replace(RunState::Paused);
            self.manager.pause();
        }
    }

    pub fn resume(&self) {
        if let Some(sender) = self.control.lock().as_ref() {
            sender.send_replace(RunState::Running);
            self.manager.resume();
        }
    }

    /// Resets the fusion core and restarts the drive profile from its
    /// first stage.
    pub fn reset(&self) {
        self.manager.reset();
        *self.signals.write() = VehicleSignals {
            profile_origin: self.context.now(),
            ..Default::default()
        };
        info!(device = %self.id, "vehicle reset");
    }

    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    pub fn manager(&self) -> &StateManager<Ctx> {
        &self.manager
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn signals(&self) -> VehicleSignals {
        self.signals.read().clone()
    }

    pub fn profile(&self) -> &DriveProfile {
        &self.profile
    }

    fn spawn_producer<M>(&self, name: &str, model: M, run: &watch::Receiver<RunState>)
    where
        M: SensorModel,
    {
        self.context.spawn(
            name,
            run_producer(
                self.context.clone(),
                self.bus.clone(),
                model,
                self.signals.clone(),
                run.clone(),
            ),
        );
    }

    fn spawn_feedback<F>(&self, name: &str, kind: EventKind, run: &watch::Receiver<RunState>, apply: F)
    where
        F: Fn(&mut VehicleSignals, &EventPayload) + Send + 'static,
    {
        // Subscribe before spawning so nothing published after start is missed
        let events = self.bus.subscribe(kind);
        self.context.spawn(
            name,
            run_feedback(events, self.signals.clone(), run.clone(), apply),
        );
    }
}

/// Applies every event of one kind to the shared signals until stopped.
async fn run_feedback<F>(
    mut events: Subscription,
    signals: SharedSignals,
    mut run: watch::Receiver<RunState>,
    apply: F,
) where
    F: Fn(&mut VehicleSignals, &EventPayload),
{
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => apply(&mut *signals.write(), event.payload()),
                None => break,
            },
            changed = run.changed() => {
                if changed.is_err() || *run.borrow() == RunState::Stopped {
                    break;
                }
            }
        }
    }
}

/// Sets the commanded speed from the drive profile once per interval.
///
/// Time spent paused is added to the profile origin so the vehicle resumes
/// in the stage it was paused in.
async fn run_drive<Ctx: TransitContext>(
    context: Arc<Ctx>,
    profile: DriveProfile,
    jitter_kmh: f64,
    signals: SharedSignals,
    mut run: watch::Receiver<RunState>,
) {
    let mut rng = ChaCha8Rng::seed_from_u64(context.seed() ^ 0x6472_6976);
    let mut last_stage = None;

    loop {
        let waiting_since = context.now();
        if !wait_until_running(&mut run).await {
            break;
        }
        let paused_for = context.now().saturating_sub(waiting_since);

        {
            let mut signals = signals.write();
            signals.profile_origin += paused_for;

            let elapsed = context.now().saturating_sub(signals.profile_origin);
            if let Some(stage) = profile.stage_at(elapsed) {
                let jitter = if jitter_kmh > 0.0 {
                    rng.gen_range(-jitter_kmh / 2.0..jitter_kmh / 2.0)
                } else {
                    0.0
                };
                signals.commanded_speed_kmh = if stage.speed_kmh > 0.0 {
                    (stage.speed_kmh + jitter).max(0.0)
                } else {
                    0.0
                };

                if last_stage != Some(stage.kind) {
                    debug!(stage = ?stage.kind, speed_kmh = stage.speed_kmh, "drive stage");
                    last_stage = Some(stage.kind);
                }
            }
        }

        tokio::select! {
            _ = context.sleep(DRIVE_INTERVAL) => {}
            changed = run.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}
