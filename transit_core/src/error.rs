//! Error types for the fusion core.
//!
//! The core has no fallible I/O of its own. Insufficient data, sensor
//! disagreement and timeouts are absorbed locally; only contract violations
//! and misconfiguration reach the caller.

use crate::events::EventKind;

// ============================================================================
// ERRORS
// ============================================================================

/// Errors surfaced by the fusion core.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FusionError {
    /// A producer declared one event kind but supplied another payload.
    #[error("Payload mismatch: declared {declared}, payload is {actual}")]
    PayloadMismatch {
        declared: EventKind,
        actual: EventKind,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("State manager is already running")]
    AlreadyRunning,
}

/// Errors raised while loading or validating a [`FusionConfig`](crate::FusionConfig).
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("{field} must be positive (got {value})")]
    NonPositive { field: &'static str, value: f64 },

    #[error("entry_min ({entry_min}s) exceeds entry_max ({entry_max}s)")]
    EntryWindowInverted { entry_min: f64, entry_max: f64 },

    #[error("bulk_confidence must be within [0, 1] (got {0})")]
    ConfidenceOutOfRange(f64),
}
