//! Environment: the simulated-time authority for one run.
//!
//! Owns every stock and entity, the clock, the halt horizon and the pending
//! queue. The queue is a min-heap keyed by `(occurs_at, sequence)`, where
//! `sequence` is the insertion counter, so movements scheduled for the same
//! instant execute in the order they were scheduled.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::entity::{Entity, EntityId, EntityKind};
use crate::error::{SimError, SimResult};
use crate::movement::{Movement, MovementKind, MovementRecord, SpawnRecord};
use crate::stock::{Holding, Stock, StockHook, StockId, StockVariant, Synthesizer};

/// A movement waiting in the queue.
#[derive(Debug)]
struct Pending {
    sequence: u64,
    movement: Movement,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.movement.occurs_at() == other.movement.occurs_at() && self.sequence == other.sequence
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse for earliest-first.
        other
            .movement
            .occurs_at()
            .cmp(&self.movement.occurs_at())
            .then(other.sequence.cmp(&self.sequence))
    }
}

/// What a run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutcome {
    /// Executed movements, in execution order.
    pub completed: Vec<MovementRecord>,
    /// Movements scheduled beyond the halt horizon, earliest first.
    pub ignored: Vec<MovementRecord>,
    /// Targeted movements whose entity had already left the source stock.
    pub stale: Vec<MovementRecord>,
    /// Entities spawned since the previous run, including those spawned
    /// before it started.
    pub spawned: Vec<SpawnRecord>,
}

/// The simulated world: stocks, entities, clock and pending movements.
pub struct Environment<T> {
    current_time: Duration,
    halt_time: Duration,
    queue: BinaryHeap<Pending>,
    next_sequence: u64,
    stocks: Vec<Stock<T>>,
    entities: Vec<Entity<T>>,
    spawned: Vec<SpawnRecord>,
}

impl<T: 'static> Environment<T> {
    /// Create an environment whose clock starts at zero and halts after
    /// `run_for`.
    pub fn new(run_for: Duration) -> Self {
        Self {
            current_time: Duration::ZERO,
            halt_time: run_for,
            queue: BinaryHeap::new(),
            next_sequence: 0,
            stocks: Vec::new(),
            entities: Vec::new(),
            spawned: Vec::new(),
        }
    }

    pub fn current_time(&self) -> Duration {
        self.current_time
    }

    pub fn halt_time(&self) -> Duration {
        self.halt_time
    }

    // ── Stocks ─────────────────────────────────────────────────────

    /// Register a source stock that builds entities with `synth`.
    pub fn source_stock(
        &mut self,
        name: impl Into<String>,
        kind: EntityKind,
        synth: Synthesizer<T>,
    ) -> StockId {
        self.push_stock(Stock::new(
            name.into(),
            kind,
            Holding::Source { synth, drawn: 0 },
        ))
    }

    pub fn through_stock(&mut self, name: impl Into<String>, kind: EntityKind) -> StockId {
        self.push_stock(Stock::new(
            name.into(),
            kind,
            Holding::Through(VecDeque::new()),
        ))
    }

    pub fn sink_stock(&mut self, name: impl Into<String>, kind: EntityKind) -> StockId {
        self.push_stock(Stock::new(name.into(), kind, Holding::Sink(Vec::new())))
    }

    /// Attach domain logic to a through-stock or sink, replacing any hook it
    /// already had.
    pub fn decorate(
        &mut self,
        stock: StockId,
        hook: impl StockHook<T> + 'static,
    ) -> SimResult<()> {
        let target = &mut self.stocks[stock.0];
        if target.variant() == StockVariant::Source {
            return Err(SimError::DecorateSource(target.name().to_string()));
        }
        target.hook = Some(Box::new(hook));
        Ok(())
    }

    fn push_stock(&mut self, stock: Stock<T>) -> StockId {
        let id = StockId(self.stocks.len());
        debug!(
            stock = %stock.name(),
            kind = %stock.kind_stocked(),
            variant = ?stock.variant(),
            "stock registered"
        );
        self.stocks.push(stock);
        id
    }

    pub fn stock(&self, id: StockId) -> &Stock<T> {
        &self.stocks[id.0]
    }

    pub fn stocks(&self) -> impl Iterator<Item = (StockId, &Stock<T>)> {
        self.stocks.iter().enumerate().map(|(i, s)| (StockId(i), s))
    }

    // ── Entities ───────────────────────────────────────────────────

    pub fn entity(&self, id: EntityId) -> &Entity<T> {
        &self.entities[id.0]
    }

    pub fn entity_mut(&mut self, id: EntityId) -> &mut Entity<T> {
        &mut self.entities[id.0]
    }

    /// Number of entities created so far, by spawning or by drawing from a
    /// source.
    pub fn created_count(&self) -> u64 {
        self.entities.len() as u64
    }

    /// Sum of `count()` over every stock.
    pub fn stocked_count(&self) -> u64 {
        self.stocks.iter().map(Stock::count).sum()
    }

    /// Create an entity and place it in `stock`, running the stock's hook.
    pub fn spawn(&mut self, stock: StockId, entity: Entity<T>) -> SimResult<EntityId> {
        self.check_entity_kind(stock, entity.kind(), entity.name())?;
        let id = EntityId(self.entities.len());
        self.spawned.push(SpawnRecord {
            occurs_at: self.current_time.as_nanos() as u64,
            stock: self.stocks[stock.0].name().to_string(),
            entity_kind: entity.kind().to_string(),
            entity_id: id.0 as u64,
            entity_name: entity.name().to_string(),
        });
        self.entities.push(entity);
        self.add(stock, id)?;
        Ok(id)
    }

    // ── Stock operations ───────────────────────────────────────────

    /// Place an existing entity in `stock` and run its `on_add` hook.
    pub fn add(&mut self, stock: StockId, entity: EntityId) -> SimResult<()> {
        let e = &self.entities[entity.0];
        self.check_entity_kind(stock, e.kind(), e.name())?;
        self.stocks[stock.0].push(entity)?;
        self.with_hook(stock, |hook, env| hook.on_add(env, stock, entity))
    }

    /// Take the earliest entity out of `stock` (a source synthesizes one) and
    /// run its `on_remove` hook.
    pub fn remove(&mut self, stock: StockId) -> SimResult<EntityId> {
        let now = self.current_time;
        if let Holding::Source { synth, drawn } = &mut self.stocks[stock.0].holding {
            let fresh = synth(now, *drawn);
            *drawn += 1;
            let id = EntityId(self.entities.len());
            self.entities.push(fresh);
            return Ok(id);
        }
        let entity = self.stocks[stock.0].pop_front()?;
        self.with_hook(stock, |hook, env| hook.on_remove(env, stock, entity))?;
        Ok(entity)
    }

    /// Take a specific entity out of `stock`. Returns `false` when the entity
    /// is not held there.
    pub fn remove_entity(&mut self, stock: StockId, entity: EntityId) -> SimResult<bool> {
        if !self.stocks[stock.0].take(entity)? {
            return Ok(false);
        }
        self.with_hook(stock, |hook, env| hook.on_remove(env, stock, entity))?;
        Ok(true)
    }

    /// Run `f` with the stock's hook detached, then put the hook back.
    fn with_hook(
        &mut self,
        stock: StockId,
        f: impl FnOnce(&mut dyn StockHook<T>, &mut Self) -> SimResult<()>,
    ) -> SimResult<()> {
        let Some(mut hook) = self.stocks[stock.0].hook.take() else {
            return Ok(());
        };
        let result = f(hook.as_mut(), self);
        self.stocks[stock.0].hook = Some(hook);
        result
    }

    fn check_entity_kind(&self, stock: StockId, kind: EntityKind, name: &str) -> SimResult<()> {
        let target = &self.stocks[stock.0];
        if target.kind_stocked() != kind {
            return Err(SimError::EntityKindRejected {
                stock: target.name().to_string(),
                expected: target.kind_stocked().to_string(),
                found: kind.to_string(),
                entity: name.to_string(),
            });
        }
        Ok(())
    }

    // ── Scheduling ─────────────────────────────────────────────────

    /// Queue a movement. Rejects movements whose stocks (or targeted entity)
    /// disagree on kind.
    pub fn add_to_schedule(&mut self, movement: Movement) -> SimResult<()> {
        let from = &self.stocks[movement.from().0];
        let to = &self.stocks[movement.to().0];
        if from.kind_stocked() != to.kind_stocked() {
            return Err(SimError::KindMismatch {
                movement: movement.kind().to_string(),
                from: from.name().to_string(),
                from_kind: from.kind_stocked().to_string(),
                to: to.name().to_string(),
                to_kind: to.kind_stocked().to_string(),
            });
        }
        if let Some(entity) = movement.entity() {
            let e = &self.entities[entity.0];
            self.check_entity_kind(movement.from(), e.kind(), e.name())?;
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.queue.push(Pending { sequence, movement });
        Ok(())
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    /// Drop every pending movement of `kind` that targets `entity`. Returns
    /// how many were dropped.
    pub fn cancel_targeting(&mut self, entity: EntityId, kind: MovementKind) -> usize {
        let before = self.queue.len();
        self.queue
            .retain(|p| !(p.movement.entity() == Some(entity) && p.movement.kind() == kind));
        let cancelled = before - self.queue.len();
        if cancelled > 0 {
            debug!(%entity, %kind, cancelled, "pending movements cancelled");
        }
        cancelled
    }

    /// Pending movements in execution order.
    pub fn pending(&self) -> Vec<Movement> {
        let mut pending: Vec<&Pending> = self.queue.iter().collect();
        // Reverse of the heap order: earliest first.
        pending.sort_by(|a, b| b.cmp(a));
        pending.into_iter().map(|p| p.movement.clone()).collect()
    }

    // ── Execution ──────────────────────────────────────────────────

    /// Execute pending movements in `(time, sequence)` order until the queue
    /// drains or the next movement lies beyond the halt horizon.
    pub fn run(&mut self) -> SimResult<RunOutcome> {
        match self.run_collecting() {
            (outcome, None) => Ok(outcome),
            (_, Some(err)) => Err(err),
        }
    }

    /// Like [`run`](Self::run), but an aborting error is returned next to
    /// everything executed before it, so a failed run can still be read.
    /// The movement that failed is in neither list.
    pub fn run_collecting(&mut self) -> (RunOutcome, Option<SimError>) {
        info!(
            halt_ns = self.halt_time.as_nanos() as u64,
            pending = self.queue.len(),
            "simulation run starting"
        );
        let mut outcome = RunOutcome::default();
        let mut failure = None;

        while let Some(next) = self.queue.pop() {
            if next.movement.occurs_at() > self.halt_time {
                outcome.ignored.push(self.record(&next.movement, None));
                while let Some(rest) = self.queue.pop() {
                    outcome.ignored.push(self.record(&rest.movement, None));
                }
                break;
            }

            self.current_time = next.movement.occurs_at();
            match self.execute(&next.movement) {
                Ok(Some(entity)) => outcome
                    .completed
                    .push(self.record(&next.movement, Some(entity))),
                Ok(None) => {
                    debug!(
                        kind = %next.movement.kind(),
                        at_ns = next.movement.occurs_at().as_nanos() as u64,
                        "stale movement skipped"
                    );
                    outcome.stale.push(self.record(&next.movement, None));
                }
                Err(err) => {
                    warn!(
                        kind = %next.movement.kind(),
                        at_ns = next.movement.occurs_at().as_nanos() as u64,
                        completed = outcome.completed.len(),
                        error = %err,
                        "simulation run aborted"
                    );
                    failure = Some(err);
                    break;
                }
            }
        }

        outcome.spawned = std::mem::take(&mut self.spawned);
        info!(
            completed = outcome.completed.len(),
            ignored = outcome.ignored.len(),
            stale = outcome.stale.len(),
            entities = self.entities.len(),
            "simulation run finished"
        );
        (outcome, failure)
    }

    fn execute(&mut self, movement: &Movement) -> SimResult<Option<EntityId>> {
        let entity = match movement.entity() {
            Some(target) => {
                if !self.remove_entity(movement.from(), target)? {
                    return Ok(None);
                }
                target
            }
            None => self.remove(movement.from())?,
        };
        self.add(movement.to(), entity)?;
        Ok(Some(entity))
    }

    fn record(&self, movement: &Movement, moved: Option<EntityId>) -> MovementRecord {
        let from = &self.stocks[movement.from().0];
        let to = &self.stocks[movement.to().0];
        let entity = moved.or(movement.entity());
        MovementRecord {
            occurs_at: movement.occurs_at().as_nanos() as u64,
            kind: movement.kind().to_string(),
            from_stock: from.name().to_string(),
            to_stock: to.name().to_string(),
            from_source: from.variant() == StockVariant::Source,
            entity_kind: from.kind_stocked().to_string(),
            entity_id: entity.map(|e| e.0 as u64),
            entity_name: entity.map(|e| self.entities[e.0].name().to_string()),
        }
    }
}
