//! JSON exporter for fleet runs.
//!
//! Writes one document per run: the run parameters, and per vehicle the
//! final counters, every recorded passenger event and classification change.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

use transit_core::{PassengerEvent, PassengerStats, VehicleStateLabel};
use transit_env::DeviceId;

use crate::error::SimError;
use crate::runner::{FleetResult, StateChange, VehicleReport};

/// One vehicle's section of the export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleExport {
    pub device_id: DeviceId,
    pub final_stats: PassengerStats,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_label: Option<VehicleStateLabel>,

    pub passenger_events: Vec<PassengerEvent>,
    pub state_changes: Vec<StateChange>,
    pub dropped_events: u64,
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl From<&VehicleReport> for VehicleExport {
    fn from(report: &VehicleReport) -> Self {
        Self {
            device_id: report.device_id.clone(),
            final_stats: report.final_stats,
            final_label: report.final_label,
            passenger_events: report.passenger_events.clone(),
            state_changes: report.state_changes.clone(),
            dropped_events: report.dropped_events,
            passed: report.passed,
            failure_reason: report.failure_reason.clone(),
        }
    }
}

/// Complete run export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunExport {
    /// Seed used
    pub seed: u64,

    /// Duration in seconds
    pub duration_sec: f64,

    pub instances: usize,
    pub total_entries: u32,
    pub total_exits: u32,
    pub passed: bool,
    pub vehicles: Vec<VehicleExport>,
}

impl RunExport {
    pub fn from_result(result: &FleetResult) -> Self {
        Self {
            seed: result.seed,
            duration_sec: result.duration_secs,
            instances: result.vehicles.len(),
            total_entries: result.total_entries(),
            total_exits: result.total_exits(),
            passed: result.passed(),
            vehicles: result.vehicles.iter().map(VehicleExport::from).collect(),
        }
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), SimError> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
