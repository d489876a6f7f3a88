//! Simulator errors.

use transit_core::{ConfigError, FusionError};

/// Errors that can occur while configuring or running a simulation.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Fusion core error: {0}")]
    Fusion(#[from] FusionError),

    #[error("Invalid sensor configuration: {0}")]
    Sensor(String),
}
