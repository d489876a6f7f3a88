//! Transit Fleet Simulator
//!
//! Synthetic sensors and a headless fleet runner for the transit fusion
//! core. Each simulated vehicle is fully isolated: its own event bus,
//! producers, drive profile and [`transit_core::StateManager`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        FleetRunner                           │
//! │  ┌────────────────────┐   ┌────────────────────┐             │
//! │  │ VehicleInstance #1 │   │ VehicleInstance #2 │   ...       │
//! │  │  gps  mpu  door    │   │  gps  mpu  door    │             │
//! │  │  camera  drive     │   │  camera  drive     │             │
//! │  │  EventBus          │   │  EventBus          │             │
//! │  │  StateManager      │   │  StateManager      │             │
//! │  └─────────┬──────────┘   └─────────┬──────────┘             │
//! │            ▼                        ▼                        │
//! │       Recorder ──audit──▶ VehicleReport ──▶ RunExport        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Determinism
//!
//! Every noise generator derives from the vehicle's context seed, so with
//! Tokio's paused clock a run is reproducible from its master seed.
//!
//! # Usage
//!
//! ```ignore
//! use transit_sim::{FleetRunner, SimConfig};
//!
//! let result = FleetRunner::new(SimConfig::default(), 42)
//!     .with_instances(10)
//!     .with_duration(300.0)
//!     .run()
//!     .await?;
//! assert!(result.passed());
//! ```

pub mod camera;
pub mod config;
pub mod drive;
pub mod error;
pub mod exporter;
pub mod gps;
pub mod motion;
pub mod producer;
pub mod proximity;
pub mod runner;
pub mod vehicle;

pub use camera::CameraModel;
pub use config::{CameraConfig, GpsConfig, MotionConfig, ProximityConfig, RouteConfig, SensorsConfig, SimConfig};
pub use drive::{DriveProfile, DriveStage, DriveStageKind};
pub use error::SimError;
pub use exporter::{RunExport, VehicleExport};
pub use gps::GpsModel;
pub use motion::MotionModel;
pub use producer::{run_producer, SensorModel, SharedSignals, VehicleSignals};
pub use proximity::ProximityModel;
pub use runner::{FleetResult, FleetRunner, StateChange, VehicleReport};
pub use vehicle::VehicleInstance;
