//! Control API
//!
//! HTTP surface over the fleet. Fleet endpoints require the shared secret in
//! the `Authorization` header; probes, metrics and build declarations do not.

mod builds;
mod fleet;
mod status;

pub use builds::{BuildRecord, BuildRequest};
pub use fleet::{PresenceRequest, ShardsResponse, ShardsStats};
pub use status::{HealthResponse, ReadyResponse};

use crate::broadcast::Broadcaster;
use crate::config::BuildNotificationConfig;
use crate::error::ManagerError;
use crate::jobs::JobScheduler;
use crate::metrics::ManagerMetrics;
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

/// Shared state for every handler
#[derive(Clone)]
pub struct ApiState {
    pub broadcaster: Broadcaster,
    pub scheduler: Option<JobScheduler>,
    pub metrics: Arc<ManagerMetrics>,
    pub secret: Arc<str>,
    pub build_notifications: Arc<BuildNotificationConfig>,
    pub node_id: Arc<str>,
}

/// Build the control API router
pub fn router(state: ApiState) -> Router {
    let protected = Router::new()
        .route("/guilds", get(fleet::guilds_handler))
        .route("/shards", get(fleet::shards_handler))
        .route("/shards/presence", put(fleet::presence_handler))
        .route("/jobs", get(status::jobs_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_secret));

    Router::new()
        .route("/", get(status::root_handler))
        .route("/health", get(status::health_handler))
        .route("/ready", get(status::ready_handler))
        .route("/metrics", get(status::metrics_handler))
        .route("/builds", post(builds::declare_build_handler))
        .merge(protected)
        .with_state(state)
}

/// Reject requests whose `Authorization` header does not equal the secret
async fn require_secret(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    if presented != Some(&*state.secret) {
        warn!(path = %request.uri().path(), "Rejected request with invalid credentials");
        return ApiError::unauthorized().into_response();
    }

    next.run(request).await
}

/// Error body `{ "error": message }` with a status code
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "invalid or missing Authorization header")
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<ManagerError> for ApiError {
    fn from(err: ManagerError) -> Self {
        let status = match &err {
            e if e.is_validation() => StatusCode::BAD_REQUEST,
            ManagerError::NotificationsUnconfigured => StatusCode::SERVICE_UNAVAILABLE,
            ManagerError::WorkerTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}
