//! Transit Core - event correlation and state fusion for a transit vehicle
//!
//! This library turns independently timed sensor streams into one coherent
//! picture of a vehicle:
//! 1. **Motion**: hybrid GPS + inertial classification ([`VehicleStateCalculator`])
//! 2. **Door**: open/close confirmation with a safety timeout ([`DoorStateMachine`])
//! 3. **Passengers**: vision tracks reconciled against door windows ([`PassengerTracker`])
//!
//! Everything is wired by the [`StateManager`] over a drop-on-full
//! [`EventBus`]. All timers run on the injected [`transit_env::TransitContext`]
//! clock.

pub mod config;
pub mod door_state;
pub mod error;
pub mod event_bus;
pub mod events;
pub mod fusion_state;
pub mod passenger_tracker;
pub mod state_manager;
pub mod vehicle_state;

// Re-export key types for convenience
pub use config::{DoorTimings, FusionConfig, PassengerTimings, ThresholdsConfig, TimeoutsConfig};
pub use door_state::{DoorState, DoorStateMachine, DoorTransition};
pub use error::{ConfigError, FusionError};
pub use event_bus::{EventBus, Subscription, SUBSCRIBER_QUEUE_CAPACITY};
pub use events::{
    BoundingBox, Event, EventKind, EventPayload, MotionLabel, MotionSample, PassengerEvent,
    PassengerEventKind, PersonTrack, PositionSample, ProximitySample, TrackRef, VehicleState,
    VehicleStateLabel, VisionFrame,
};
pub use fusion_state::{FusionState, FusionTick};
pub use passenger_tracker::{PassengerStats, PassengerTracker, PendingEntry, PendingExit, TrackInfo};
pub use state_manager::{RunState, StateManager};
pub use vehicle_state::VehicleStateCalculator;
