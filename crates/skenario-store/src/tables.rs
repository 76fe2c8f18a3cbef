//! redb table definitions for the run store.
//!
//! Run headers are keyed by numeric run id. Per-run logs use `&str` keys of
//! the form `{run_id:010}:{seq:010}` so a prefix range yields one run's
//! records in execution order.

use redb::TableDefinition;

/// Run headers keyed by run id.
pub const RUNS: TableDefinition<u64, &[u8]> = TableDefinition::new("runs");

/// Completed movements keyed by `{run_id}:{seq}`.
pub const COMPLETED: TableDefinition<&str, &[u8]> = TableDefinition::new("completed_movements");

/// Movements past the halt horizon keyed by `{run_id}:{seq}`.
pub const IGNORED: TableDefinition<&str, &[u8]> = TableDefinition::new("ignored_movements");

/// Spawn journal keyed by `{run_id}:{seq}`.
pub const SPAWNED: TableDefinition<&str, &[u8]> = TableDefinition::new("spawned_entities");

pub(crate) fn log_key(run_id: u64, seq: usize) -> String {
    format!("{run_id:010}:{seq:010}")
}

/// Half-open key range covering every log entry of `run_id`.
pub(crate) fn run_range(run_id: u64) -> (String, String) {
    // ';' sorts right after ':'.
    (format!("{run_id:010}:"), format!("{run_id:010};"))
}
