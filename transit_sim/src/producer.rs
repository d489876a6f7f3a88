//! Generic sensor producer loop and the signals models sample from.
//!
//! Each producer is an independent task on its own period. Models never talk
//! to each other; what they need to know about the vehicle (commanded speed,
//! stopped, door open) arrives through [`VehicleSignals`], which feedback
//! tasks update from events on the bus.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error};

use transit_core::{Event, EventBus, EventKind, EventPayload, RunState};
use transit_env::{Moment, TransitContext};

/// What the sensor models know about the vehicle.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleSignals {
    /// Speed requested by the drive profile (km/h)
    pub commanded_speed_kmh: f64,

    /// Latest speed reported by the GPS producer (km/h)
    pub reported_speed_kmh: f64,

    /// From the fused vehicle state
    pub vehicle_stopped: bool,

    /// From the latest proximity sample
    pub door_open: bool,

    /// Drive profile stages are measured from here
    pub profile_origin: Duration,
}

impl Default for VehicleSignals {
    fn default() -> Self {
        Self {
            commanded_speed_kmh: 0.0,
            reported_speed_kmh: 0.0,
            vehicle_stopped: false,
            door_open: false,
            profile_origin: Duration::ZERO,
        }
    }
}

pub type SharedSignals = Arc<RwLock<VehicleSignals>>;

/// A synthetic sensor.
pub trait SensorModel: Send + 'static {
    /// Kind of every payload this model produces.
    fn kind(&self) -> EventKind;

    fn frequency_hz(&self) -> f64;

    /// Produces one fully initialized sample.
    fn sample(&mut self, signals: &VehicleSignals, now: Moment) -> EventPayload;

    fn period(&self) -> Duration {
        Duration::from_nanos((1e9 / self.frequency_hz()).round() as u64)
    }
}

/// Waits until the run state is `Running`. Returns false once stopped.
pub async fn wait_until_running(run: &mut watch::Receiver<RunState>) -> bool {
    loop {
        let state = *run.borrow_and_update();
        match state {
            RunState::Running => return true,
            RunState::Stopped => return false,
            RunState::Paused => {
                if run.changed().await.is_err() {
                    return false;
                }
            }
        }
    }
}

/// Runs `model` until the run state goes to `Stopped`.
///
/// While paused the task blocks on the run-state channel instead of
/// polling. A payload that does not match `model.kind()` ends the task
/// without publishing it.
pub async fn run_producer<Ctx, M>(
    context: Arc<Ctx>,
    bus: Arc<EventBus>,
    mut model: M,
    signals: SharedSignals,
    mut run: watch::Receiver<RunState>,
) where
    Ctx: TransitContext,
    M: SensorModel,
{
    let kind = model.kind();
    let period = model.period();

    while wait_until_running(&mut run).await {
        tokio::select! {
            _ = context.sleep(period) => {}
            changed = run.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        }

        if *run.borrow() != RunState::Running {
            continue;
        }

        let now = context.moment();
        let snapshot = signals.read().clone();
        let payload = model.sample(&snapshot, now);
        match Event::tagged(kind, now.unix_ms, payload) {
            Ok(event) => {
                bus.publish(event);
            }
            Err(e) => {
                error!(kind = %kind, "sensor model is mis-wired, producer stopping: {}", e);
                break;
            }
        }
    }

    debug!(kind = %kind, "producer stopped");
}
