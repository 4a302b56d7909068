//! Probe, metrics and scheduler endpoints

use super::ApiState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use serde_json::json;

/// Health check response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub node_id: String,
}

/// Readiness check response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyResponse {
    pub ready: bool,
    pub node_id: String,
    pub shards_total: u32,
    pub shards_owned: usize,
    pub shards_ready: usize,
}

/// `GET /`: API identification
pub(super) async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "name": "Shard Manager API",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Health endpoint - always returns 200 if process is running
pub(super) async fn health_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        node_id: state.node_id.to_string(),
    })
}

/// Readiness endpoint - returns 200 once at least one worker is ready
pub(super) async fn ready_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let fleet = state.broadcaster.fleet();
    let shards_ready = fleet.ready_workers();

    let response = ReadyResponse {
        ready: shards_ready > 0,
        node_id: state.node_id.to_string(),
        shards_total: fleet.total_shards(),
        shards_owned: fleet.shard_count(),
        shards_ready,
    };

    if response.ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Metrics endpoint - returns Prometheus format metrics
pub(super) async fn metrics_handler(State(state): State<ApiState>) -> impl IntoResponse {
    state
        .metrics
        .set_workers_ready(state.broadcaster.fleet().ready_workers());

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.metrics.render(),
    )
}

/// `GET /jobs`: scheduler snapshot, empty when no scheduler runs on this node
pub(super) async fn jobs_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let jobs = state
        .scheduler
        .as_ref()
        .map(|s| s.tasks())
        .unwrap_or_default();
    Json(json!({ "jobs": jobs }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_response_serialization() {
        let response = ReadyResponse {
            ready: true,
            node_id: "node-a".to_string(),
            shards_total: 8,
            shards_owned: 4,
            shards_ready: 4,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"ready\":true"));
        assert!(json.contains("\"shardsOwned\":4"));
    }
}
