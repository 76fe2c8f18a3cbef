//! REST API handlers.
//!
//! Simulations are single-threaded and `!Send`, so each run is built and
//! executed entirely inside `spawn_blocking`.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;
use tracing::{info, warn};

use skenario_model::{ModelError, Projections, RunReport, Scenario, ScenarioConfig};
use skenario_store::{ORIGIN_WEB, RunRecord, StoreError};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// Body of a successful `POST /api/v1/run`.
#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub run_id: u64,
    pub ran_for: u64,
    pub traffic_pattern: String,
    #[serde(flatten)]
    pub projections: Projections,
}

/// Body of `GET /api/v1/runs/{id}`.
#[derive(Debug, Serialize)]
pub struct RunDetail {
    pub run: RunRecord,
    #[serde(flatten)]
    pub projections: Projections,
}

// ── Runs ───────────────────────────────────────────────────────

/// POST /api/v1/run
///
/// The body is decoded by hand so that an unknown traffic pattern or a
/// malformed duration is a 400 like any other invalid configuration.
pub async fn run_scenario(
    State(state): State<ApiState>,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    let config: ScenarioConfig = match serde_json::from_value(body) {
        Ok(config) => config,
        Err(e) => {
            return error_response(&format!("invalid scenario: {e}"), StatusCode::BAD_REQUEST)
                .into_response();
        }
    };
    if let Err(e) = config.validate() {
        return error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response();
    }

    let scenario = config.clone();
    let simulated =
        tokio::task::spawn_blocking(move || -> Result<RunReport, ModelError> {
            Scenario::build(scenario)?.run()
        })
        .await;

    let report = match simulated {
        Ok(Ok(report)) => report,
        Ok(Err(ModelError::Config(msg))) => {
            return error_response(&msg, StatusCode::BAD_REQUEST).into_response();
        }
        Ok(Err(e)) => {
            warn!(error = %e, "simulation failed");
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response();
        }
        Err(e) => {
            warn!(error = %e, "simulation task aborted");
            return error_response("simulation task aborted", StatusCode::INTERNAL_SERVER_ERROR)
                .into_response();
        }
    };

    let record = match state.store.store_run(ORIGIN_WEB, &config, &report) {
        Ok(record) => record,
        Err(e) => {
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response();
        }
    };
    info!(run_id = record.id, pattern = %record.traffic_pattern, "run served");

    ApiResponse::ok(RunResponse {
        run_id: record.id,
        ran_for: report.ran_for,
        traffic_pattern: report.traffic_pattern.clone(),
        projections: report.projections(),
    })
    .into_response()
}

/// GET /api/v1/runs
pub async fn list_runs(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_runs() {
        Ok(runs) => ApiResponse::ok(runs).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/runs/{id}
pub async fn get_run(State(state): State<ApiState>, Path(id): Path<u64>) -> impl IntoResponse {
    let run = match state.store.get_run(id) {
        Ok(Some(run)) => run,
        Ok(None) => return error_response("run not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => {
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response();
        }
    };
    match state.store.projections_for_run(id) {
        Ok(projections) => ApiResponse::ok(RunDetail { run, projections }).into_response(),
        Err(StoreError::NotFound(_)) => {
            error_response("run not found", StatusCode::NOT_FOUND).into_response()
        }
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skenario_store::RunStore;

    fn test_state() -> ApiState {
        ApiState {
            store: RunStore::open_in_memory().unwrap(),
        }
    }

    fn small_run() -> serde_json::Value {
        serde_json::json!({
            "run_for": "20s",
            "initial_replicas": 1,
            "traffic": { "pattern": "uniform", "number_of_requests": 15 }
        })
    }

    #[tokio::test]
    async fn list_runs_empty() {
        let state = test_state();
        let resp = list_runs(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn run_then_get() {
        let state = test_state();
        let resp = run_scenario(State(state.clone()), Json(small_run()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.store.list_runs().unwrap().len(), 1);

        let resp = get_run(State(state), Path(1)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn get_nonexistent_run() {
        let state = test_state();
        let resp = get_run(State(state), Path(7)).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn zero_tick_interval_is_bad_request() {
        let state = test_state();
        let body = serde_json::json!({ "autoscaler": { "tick_interval": "0s" } });
        let resp = run_scenario(State(state.clone()), Json(body))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(state.store.list_runs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_pattern_is_bad_request() {
        let state = test_state();
        let body = serde_json::json!({ "traffic": { "pattern": "sawtooth" } });
        let resp = run_scenario(State(state), Json(body)).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
