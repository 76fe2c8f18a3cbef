//! Stocks: ordered holding places for entities of one kind.
//!
//! Three variants share one contract (`name`, `kind_stocked`, `count`,
//! `entities_in_stock`; add/remove go through the
//! [`Environment`](crate::Environment) so hooks can run):
//!
//! - **source** synthesizes a fresh entity every time it is drawn from and
//!   never holds anything
//! - **through** holds entities in insertion order; removal pops the earliest
//! - **sink** accumulates entities forever; removal is an error
//!
//! Domain policy is layered on top by decorating a through-stock or sink with
//! a [`StockHook`]: the stock keeps its generic flow mechanics and the hook
//! reacts to every add (and optionally every remove).

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use crate::entity::{Entity, EntityId, EntityKind};
use crate::environment::Environment;
use crate::error::{SimError, SimResult};

/// Arena index of a stock inside its [`Environment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StockId(pub(crate) usize);

impl fmt::Display for StockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stock#{}", self.0)
    }
}

/// Which of the three stock variants a stock is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockVariant {
    Source,
    Through,
    Sink,
}

/// Builds the entity a source stock hands out. Receives the current
/// simulated time and the number of entities drawn before this one.
pub type Synthesizer<T> = Box<dyn FnMut(Duration, u64) -> Entity<T>>;

/// Domain logic attached to a stock.
///
/// Hooks run after the entity has been placed (`on_add`) or taken out
/// (`on_remove`). They receive the whole environment, so they can schedule
/// movements, spawn entities and inspect other stocks. While a hook runs it
/// is detached from its stock: nested adds to the same stock do not re-enter
/// it.
pub trait StockHook<T> {
    fn on_add(&mut self, env: &mut Environment<T>, stock: StockId, entity: EntityId)
        -> SimResult<()>;

    fn on_remove(
        &mut self,
        _env: &mut Environment<T>,
        _stock: StockId,
        _entity: EntityId,
    ) -> SimResult<()> {
        Ok(())
    }
}

impl<T, F> StockHook<T> for F
where
    F: FnMut(&mut Environment<T>, StockId, EntityId) -> SimResult<()>,
{
    fn on_add(
        &mut self,
        env: &mut Environment<T>,
        stock: StockId,
        entity: EntityId,
    ) -> SimResult<()> {
        self(env, stock, entity)
    }
}

pub(crate) enum Holding<T> {
    Source { synth: Synthesizer<T>, drawn: u64 },
    Through(VecDeque<EntityId>),
    Sink(Vec<EntityId>),
}

/// A named holding place for entities of a single kind.
pub struct Stock<T> {
    name: String,
    kind: EntityKind,
    pub(crate) holding: Holding<T>,
    pub(crate) hook: Option<Box<dyn StockHook<T>>>,
}

impl<T> Stock<T> {
    pub(crate) fn new(name: String, kind: EntityKind, holding: Holding<T>) -> Self {
        Self {
            name,
            kind,
            holding,
            hook: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind_stocked(&self) -> EntityKind {
        self.kind
    }

    pub fn variant(&self) -> StockVariant {
        match self.holding {
            Holding::Source { .. } => StockVariant::Source,
            Holding::Through(_) => StockVariant::Through,
            Holding::Sink(_) => StockVariant::Sink,
        }
    }

    /// Number of entities currently held. Always 0 for a source.
    pub fn count(&self) -> u64 {
        match &self.holding {
            Holding::Source { .. } => 0,
            Holding::Through(held) => held.len() as u64,
            Holding::Sink(held) => held.len() as u64,
        }
    }

    /// Snapshot of the held entities, earliest-added first.
    pub fn entities_in_stock(&self) -> Vec<EntityId> {
        match &self.holding {
            Holding::Source { .. } => Vec::new(),
            Holding::Through(held) => held.iter().copied().collect(),
            Holding::Sink(held) => held.clone(),
        }
    }

    /// Earliest-added entity, if any.
    pub fn first(&self) -> Option<EntityId> {
        match &self.holding {
            Holding::Source { .. } => None,
            Holding::Through(held) => held.front().copied(),
            Holding::Sink(held) => held.first().copied(),
        }
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        match &self.holding {
            Holding::Source { .. } => false,
            Holding::Through(held) => held.contains(&entity),
            Holding::Sink(held) => held.contains(&entity),
        }
    }

    pub fn is_decorated(&self) -> bool {
        self.hook.is_some()
    }

    pub(crate) fn push(&mut self, entity: EntityId) -> SimResult<()> {
        match &mut self.holding {
            Holding::Source { .. } => Err(SimError::AddToSource(self.name.clone())),
            Holding::Through(held) => {
                held.push_back(entity);
                Ok(())
            }
            Holding::Sink(held) => {
                held.push(entity);
                Ok(())
            }
        }
    }

    /// Pop the earliest entity of a through-stock. Sources never get here:
    /// the environment synthesizes from them because that needs the arena.
    pub(crate) fn pop_front(&mut self) -> SimResult<EntityId> {
        match &mut self.holding {
            Holding::Through(held) => held
                .pop_front()
                .ok_or_else(|| SimError::RemoveFromEmpty(self.name.clone())),
            Holding::Sink(_) => Err(SimError::RemoveFromSink(self.name.clone())),
            Holding::Source { .. } => Err(SimError::RemoveFromEmpty(self.name.clone())),
        }
    }

    /// Take a specific entity out. `Ok(false)` when it is not held here.
    pub(crate) fn take(&mut self, entity: EntityId) -> SimResult<bool> {
        match &mut self.holding {
            Holding::Through(held) => match held.iter().position(|e| *e == entity) {
                Some(pos) => {
                    held.remove(pos);
                    Ok(true)
                }
                None => Ok(false),
            },
            Holding::Sink(_) => Err(SimError::RemoveFromSink(self.name.clone())),
            Holding::Source { .. } => Ok(false),
        }
    }
}

impl<T> fmt::Debug for Stock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stock")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("variant", &self.variant())
            .field("count", &self.count())
            .field("decorated", &self.is_decorated())
            .finish()
    }
}
