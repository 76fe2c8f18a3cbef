//! RunStore: redb-backed persistence for finished runs.
//!
//! A run is written in a single write transaction: header first, then every
//! log table. Readers therefore never observe a half-stored run.

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use skenario_model::{Projections, RunReport, ScenarioConfig};
use skenario_sim::{MovementRecord, SpawnRecord};

use crate::error::{StoreError, StoreResult};
use crate::tables::*;
use crate::types::RunRecord;

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

type LogTable = TableDefinition<'static, &'static str, &'static [u8]>;

#[derive(Clone)]
pub struct RunStore {
    db: Arc<Database>,
}

impl RunStore {
    /// Open (or create) a persistent run store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "run store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory run store.
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory run store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(RUNS).map_err(map_err!(Table))?;
        txn.open_table(COMPLETED).map_err(map_err!(Table))?;
        txn.open_table(IGNORED).map_err(map_err!(Table))?;
        txn.open_table(SPAWNED).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Persist `report` under a fresh run id and return the stored header.
    pub fn store_run(
        &self,
        origin: &str,
        config: &ScenarioConfig,
        report: &RunReport,
    ) -> StoreResult<RunRecord> {
        let recorded_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let mut record = RunRecord::describe(origin, config, report, recorded_at);

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut runs = txn.open_table(RUNS).map_err(map_err!(Table))?;
            let last = runs.last().map_err(map_err!(Read))?.map(|(k, _)| k.value());
            record.id = last.unwrap_or(0) + 1;
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            runs.insert(record.id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        write_log(&txn, COMPLETED, record.id, &report.completed)?;
        write_log(&txn, IGNORED, record.id, &report.ignored)?;
        write_log(&txn, SPAWNED, record.id, &report.spawned)?;
        txn.commit().map_err(map_err!(Transaction))?;

        info!(
            run_id = record.id,
            origin,
            completed = record.completed_count,
            ignored = record.ignored_count,
            "run stored"
        );
        Ok(record)
    }

    // ── Reads ──────────────────────────────────────────────────────

    pub fn get_run(&self, run_id: u64) -> StoreResult<Option<RunRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RUNS).map_err(map_err!(Table))?;
        match table.get(run_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: RunRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Every stored run header, oldest first.
    pub fn list_runs(&self) -> StoreResult<Vec<RunRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RUNS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: RunRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    pub fn completed_for_run(&self, run_id: u64) -> StoreResult<Vec<MovementRecord>> {
        self.read_log(COMPLETED, run_id)
    }

    pub fn ignored_for_run(&self, run_id: u64) -> StoreResult<Vec<MovementRecord>> {
        self.read_log(IGNORED, run_id)
    }

    pub fn spawned_for_run(&self, run_id: u64) -> StoreResult<Vec<SpawnRecord>> {
        self.read_log(SPAWNED, run_id)
    }

    /// Recompute the report projections of a stored run from its logs.
    pub fn projections_for_run(&self, run_id: u64) -> StoreResult<Projections> {
        if self.get_run(run_id)?.is_none() {
            return Err(StoreError::NotFound(format!("run {run_id}")));
        }
        let completed = self.completed_for_run(run_id)?;
        let spawned = self.spawned_for_run(run_id)?;
        Ok(Projections::from_log(&completed, &spawned))
    }

    fn read_log<T: DeserializeOwned>(&self, def: LogTable, run_id: u64) -> StoreResult<Vec<T>> {
        let (start, end) = run_range(run_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table
            .range(start.as_str()..end.as_str())
            .map_err(map_err!(Read))?
        {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let item: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(item);
        }
        Ok(results)
    }
}

fn write_log<T: Serialize>(
    txn: &WriteTransaction,
    def: LogTable,
    run_id: u64,
    items: &[T],
) -> StoreResult<()> {
    let mut table = txn.open_table(def).map_err(map_err!(Table))?;
    for (seq, item) in items.iter().enumerate() {
        let key = log_key(run_id, seq);
        let value = serde_json::to_vec(item).map_err(map_err!(Serialize))?;
        table
            .insert(key.as_str(), value.as_slice())
            .map_err(map_err!(Write))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use skenario_model::{Scenario, TrafficConfig};

    use crate::types::ORIGIN_WEB;

    fn small_config(requests: u32) -> ScenarioConfig {
        ScenarioConfig {
            run_for: Duration::from_secs(30),
            initial_replicas: 1,
            traffic: TrafficConfig::Uniform {
                number_of_requests: requests,
            },
            ..ScenarioConfig::default()
        }
    }

    fn simulate(config: &ScenarioConfig) -> RunReport {
        Scenario::build(config.clone()).unwrap().run().unwrap()
    }

    #[test]
    fn store_assigns_sequential_ids() {
        let store = RunStore::open_in_memory().unwrap();
        let config = small_config(10);
        let report = simulate(&config);

        let first = store.store_run(ORIGIN_WEB, &config, &report).unwrap();
        let second = store.store_run(ORIGIN_WEB, &config, &report).unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);

        let listed: Vec<u64> = store.list_runs().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(listed, vec![1, 2]);
    }

    #[test]
    fn get_nonexistent_run_returns_none() {
        let store = RunStore::open_in_memory().unwrap();
        assert!(store.get_run(42).unwrap().is_none());
        assert!(store.completed_for_run(42).unwrap().is_empty());
        assert!(matches!(
            store.projections_for_run(42),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn logs_come_back_in_execution_order() {
        let store = RunStore::open_in_memory().unwrap();
        let config = small_config(25);
        let report = simulate(&config);
        let record = store.store_run(ORIGIN_WEB, &config, &report).unwrap();

        assert_eq!(store.completed_for_run(record.id).unwrap(), report.completed);
        assert_eq!(store.ignored_for_run(record.id).unwrap(), report.ignored);
        assert_eq!(store.spawned_for_run(record.id).unwrap(), report.spawned);
        assert_eq!(record.completed_count, report.completed.len() as u64);
        assert_eq!(store.get_run(record.id).unwrap(), Some(record));
    }

    #[test]
    fn runs_do_not_bleed_into_each_other() {
        let store = RunStore::open_in_memory().unwrap();
        let small = small_config(3);
        let large = small_config(40);
        let a = store.store_run(ORIGIN_WEB, &small, &simulate(&small)).unwrap();
        let b = store.store_run(ORIGIN_WEB, &large, &simulate(&large)).unwrap();

        assert_eq!(
            store.completed_for_run(a.id).unwrap().len() as u64,
            a.completed_count
        );
        assert_eq!(
            store.completed_for_run(b.id).unwrap().len() as u64,
            b.completed_count
        );
    }

    #[test]
    fn stored_projections_match_live_ones() {
        let store = RunStore::open_in_memory().unwrap();
        let config = small_config(20);
        let report = simulate(&config);
        let record = store.store_run(ORIGIN_WEB, &config, &report).unwrap();

        assert_eq!(store.projections_for_run(record.id).unwrap(), report.projections());
    }

    #[test]
    fn on_disk_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.redb");
        let config = small_config(5);
        let report = simulate(&config);

        let id = {
            let store = RunStore::open(&path).unwrap();
            store.store_run(ORIGIN_WEB, &config, &report).unwrap().id
        };

        let store = RunStore::open(&path).unwrap();
        let record = store.get_run(id).unwrap().unwrap();
        assert_eq!(record.config, config);
        assert_eq!(record.origin, ORIGIN_WEB);
        assert_eq!(store.completed_for_run(id).unwrap(), report.completed);
    }
}
