//! skenario-store: persistence for finished simulation runs.
//!
//! Backed by [redb](https://docs.rs/redb). A run is stored as one JSON header
//! in `runs` plus its completed movements, ignored movements and spawn
//! journal in per-run key ranges, so projections can be recomputed from a
//! stored run without re-simulating it.
//!
//! `RunStore` is `Clone + Send + Sync` (an `Arc<Database>`) and can be shared
//! across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use store::RunStore;
pub use types::{ORIGIN_CLI, ORIGIN_WEB, RunRecord};
