//! Read-only projections over a run's movement log.
//!
//! Nothing here touches an environment: everything is derived from the
//! completed movements and the spawn journal, so a stored run can be
//! re-projected later.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use skenario_sim::{MovementRecord, SpawnRecord};

use crate::entities::{ARRIVE_AT_BUFFER, PROCESSING_COMPLETE};

/// Occupancy of one stock right after an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyLine {
    /// Nanoseconds since the start of the run.
    pub occurs_at: u64,
    pub stock_name: String,
    pub kind_stocked: String,
    pub tally: i64,
}

/// Arrival and completion of one served request, in nanoseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseTime {
    pub arrived_at: u64,
    pub completed_at: u64,
    pub response_time: u64,
}

/// Arrivals that fell in one whole second of the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestsPerSecond {
    pub second: u64,
    pub requests: u64,
}

/// All projections of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projections {
    pub tally_lines: Vec<TallyLine>,
    pub response_times: Vec<ResponseTime>,
    pub requests_per_second: Vec<RequestsPerSecond>,
}

impl Projections {
    pub fn from_log(completed: &[MovementRecord], spawned: &[SpawnRecord]) -> Self {
        Self {
            tally_lines: tally_lines(completed, spawned),
            response_times: response_times(completed),
            requests_per_second: requests_per_second(completed),
        }
    }
}

enum Event<'a> {
    Spawn(&'a SpawnRecord),
    Move(&'a MovementRecord),
}

/// Running per-stock occupancy. Spawns count as entries; self-loops change
/// nothing and are skipped; sources are never tallied.
pub fn tally_lines(completed: &[MovementRecord], spawned: &[SpawnRecord]) -> Vec<TallyLine> {
    let mut events: Vec<(u64, Event<'_>)> = spawned
        .iter()
        .map(|s| (s.occurs_at, Event::Spawn(s)))
        .chain(completed.iter().map(|m| (m.occurs_at, Event::Move(m))))
        .collect();
    // Stable: spawns stay ahead of movements at the same instant.
    events.sort_by_key(|(at, _)| *at);

    let mut tallies: HashMap<String, i64> = HashMap::new();
    let mut lines = Vec::new();
    let mut bump = |at: u64, stock: &str, kind: &str, delta: i64| {
        let tally = tallies.entry(stock.to_string()).or_insert(0);
        *tally += delta;
        lines.push(TallyLine {
            occurs_at: at,
            stock_name: stock.to_string(),
            kind_stocked: kind.to_string(),
            tally: *tally,
        });
    };

    for (at, event) in &events {
        match event {
            Event::Spawn(s) => bump(*at, &s.stock, &s.entity_kind, 1),
            Event::Move(m) => {
                if m.is_self_loop() {
                    continue;
                }
                if !m.from_source {
                    bump(*at, &m.from_stock, &m.entity_kind, -1);
                }
                bump(*at, &m.to_stock, &m.entity_kind, 1);
            }
        }
    }
    lines
}

/// One line per request that finished processing, in completion order.
pub fn response_times(completed: &[MovementRecord]) -> Vec<ResponseTime> {
    let mut arrivals: HashMap<u64, u64> = HashMap::new();
    let mut times = Vec::new();
    for record in completed {
        let Some(id) = record.entity_id else { continue };
        if record.kind == ARRIVE_AT_BUFFER.as_str() {
            arrivals.insert(id, record.occurs_at);
        } else if record.kind == PROCESSING_COMPLETE.as_str() {
            if let Some(arrived_at) = arrivals.get(&id) {
                times.push(ResponseTime {
                    arrived_at: *arrived_at,
                    completed_at: record.occurs_at,
                    response_time: record.occurs_at.saturating_sub(*arrived_at),
                });
            }
        }
    }
    times
}

/// Arrivals grouped by whole second, seconds without arrivals omitted.
pub fn requests_per_second(completed: &[MovementRecord]) -> Vec<RequestsPerSecond> {
    let mut per_second: BTreeMap<u64, u64> = BTreeMap::new();
    for record in completed {
        if record.kind == ARRIVE_AT_BUFFER.as_str() {
            *per_second.entry(record.occurs_at / 1_000_000_000).or_default() += 1;
        }
    }
    per_second
        .into_iter()
        .map(|(second, requests)| RequestsPerSecond { second, requests })
        .collect()
}
