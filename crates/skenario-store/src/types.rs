//! Stored run header.

use serde::{Deserialize, Serialize};

use skenario_model::{RunReport, RunSummary, ScenarioConfig};

/// Origin recorded for runs submitted over HTTP.
pub const ORIGIN_WEB: &str = "skenario_web";
/// Origin recorded for runs started from the command line.
pub const ORIGIN_CLI: &str = "skenario_cli";

/// Everything about a run except its movement logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: u64,
    /// Unix seconds.
    pub recorded_at: u64,
    pub origin: String,
    pub traffic_pattern: String,
    /// Halt horizon in nanoseconds.
    pub ran_for: u64,
    pub config: ScenarioConfig,
    pub summary: RunSummary,
    pub completed_count: u64,
    pub ignored_count: u64,
    pub stale_count: u64,
}

impl RunRecord {
    /// Header for `report`; the id is assigned when it is stored.
    pub fn describe(
        origin: &str,
        config: &ScenarioConfig,
        report: &RunReport,
        recorded_at: u64,
    ) -> Self {
        Self {
            id: 0,
            recorded_at,
            origin: origin.to_string(),
            traffic_pattern: report.traffic_pattern.clone(),
            ran_for: report.ran_for,
            config: config.clone(),
            summary: report.summary.clone(),
            completed_count: report.completed.len() as u64,
            ignored_count: report.ignored.len() as u64,
            stale_count: report.stale.len() as u64,
        }
    }
}
