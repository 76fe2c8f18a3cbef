//! skenario-api: REST API for the simulator.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/run` | Simulate a scenario, store it, return projections |
//! | GET | `/api/v1/runs` | List stored runs |
//! | GET | `/api/v1/runs/{id}` | Stored run header with recomputed projections |

pub mod handlers;

use axum::Router;
use axum::routing::{get, post};
use skenario_store::RunStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: RunStore,
}

pub fn build_router(store: RunStore) -> Router {
    let api_state = ApiState { store };

    let api_routes = Router::new()
        .route("/run", post(handlers::run_scenario))
        .route("/runs", get(handlers::list_runs))
        .route("/runs/{id}", get(handlers::get_run))
        .with_state(api_state);

    Router::new().nest("/api/v1", api_routes)
}
