//! skenario-sim: discrete-event simulation kernel.
//!
//! A stock-and-flow model driven by a single time-ordered queue:
//!
//! - [`Entity`]: a typed, named token (a request, a replica, a tick process)
//! - [`Stock`]: an ordered holding place for entities of one kind
//!   (source, through or sink), optionally decorated with a [`StockHook`]
//! - [`Movement`]: a scheduled instruction to move one entity between two
//!   stocks at a simulated instant
//! - [`Environment`]: owns stocks, entities, the clock and the pending
//!   queue, and executes movements in `(time, insertion)` order
//!
//! # Execution
//!
//! ```text
//! Environment::run()
//!   loop:
//!     pop earliest (time, seq)
//!     time > halt      → it and everything left go to `ignored`
//!     target gone      → `stale`
//!     otherwise        → remove from source, add to destination,
//!                        hooks may schedule more movements → `completed`
//! ```
//!
//! The kernel is generic over the entity payload `T`, so it has no idea what
//! a replica or a request is. Domain behaviour lives in hooks.

pub mod entity;
pub mod environment;
pub mod error;
pub mod movement;
pub mod stock;

pub use entity::{Entity, EntityId, EntityKind};
pub use environment::{Environment, RunOutcome};
pub use error::{SimError, SimResult};
pub use movement::{Movement, MovementKind, MovementRecord, SpawnRecord};
pub use stock::{Stock, StockHook, StockId, StockVariant, Synthesizer};
