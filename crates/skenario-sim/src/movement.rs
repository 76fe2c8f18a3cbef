//! Movements: scheduled, timestamped transfers between stocks.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::stock::StockId;

/// Label naming what a movement represents (`"launching -> active"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MovementKind(pub &'static str);

impl MovementKind {
    pub fn as_str(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for MovementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// An immutable instruction: move one entity from `from` to `to` at
/// `occurs_at`.
///
/// An untargeted movement takes whatever entity is earliest in `from` when it
/// executes (a source synthesizes one). A targeted movement names the entity;
/// if that entity has already left `from` by then, the movement is stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Movement {
    kind: MovementKind,
    occurs_at: Duration,
    from: StockId,
    to: StockId,
    entity: Option<EntityId>,
}

impl Movement {
    pub fn new(kind: MovementKind, occurs_at: Duration, from: StockId, to: StockId) -> Self {
        Self {
            kind,
            occurs_at,
            from,
            to,
            entity: None,
        }
    }

    /// Pin the movement to a specific entity.
    pub fn targeting(mut self, entity: EntityId) -> Self {
        self.entity = Some(entity);
        self
    }

    pub fn kind(&self) -> MovementKind {
        self.kind
    }

    pub fn occurs_at(&self) -> Duration {
        self.occurs_at
    }

    pub fn from(&self) -> StockId {
        self.from
    }

    pub fn to(&self) -> StockId {
        self.to
    }

    pub fn entity(&self) -> Option<EntityId> {
        self.entity
    }
}

/// Log entry for a movement, resolved against the environment's names.
///
/// Completed records always carry the entity that moved. Ignored and stale
/// records carry it only when the movement was targeted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecord {
    /// Nanoseconds since the start of the run.
    pub occurs_at: u64,
    pub kind: String,
    pub from_stock: String,
    pub to_stock: String,
    /// The source of the movement synthesizes entities rather than holding them.
    pub from_source: bool,
    pub entity_kind: String,
    pub entity_id: Option<u64>,
    pub entity_name: Option<String>,
}

impl MovementRecord {
    pub fn occurs_at(&self) -> Duration {
        Duration::from_nanos(self.occurs_at)
    }

    pub fn is_self_loop(&self) -> bool {
        self.from_stock == self.to_stock
    }
}

/// Log entry for an entity placed straight into a stock by `spawn`, rather
/// than drawn from a source by a movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnRecord {
    pub occurs_at: u64,
    pub stock: String,
    pub entity_kind: String,
    pub entity_id: u64,
    pub entity_name: String,
}

impl SpawnRecord {
    pub fn occurs_at(&self) -> Duration {
        Duration::from_nanos(self.occurs_at)
    }
}
