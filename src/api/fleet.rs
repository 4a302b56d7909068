//! Fleet endpoints: guilds, shards, presence

use super::{ApiError, ApiState};
use crate::error::ManagerError;
use crate::shard::{ActivityKind, Presence, ShardHealth};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

/// Longest presence name Discord displays
const MAX_PRESENCE_NAME: usize = 128;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardsStats {
    pub shard_count: usize,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct ShardsResponse {
    pub shards: Vec<ShardHealth>,
    pub stats: ShardsStats,
}

/// Body of `PUT /shards/presence`
#[derive(Debug, Clone, Deserialize)]
pub struct PresenceRequest {
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
}

impl PresenceRequest {
    /// Check field constraints and convert into a worker presence
    pub fn validate(self) -> Result<Presence, ManagerError> {
        let length = self.name.chars().count();
        if length == 0 || length > MAX_PRESENCE_NAME {
            return Err(ManagerError::Validation {
                field: "name",
                reason: format!("must be between 1 and {MAX_PRESENCE_NAME} characters"),
            });
        }

        if let Some(url) = &self.url {
            url::Url::parse(url).map_err(|e| ManagerError::Validation {
                field: "url",
                reason: format!("must be a valid URL ({e})"),
            })?;
        }

        Ok(Presence {
            kind: self.kind,
            name: self.name,
            url: self.url,
        })
    }
}

/// `GET /guilds`: distinct guild ids across the fleet
pub(super) async fn guilds_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let guilds = state.broadcaster.guild_ids().await;
    Json(json!({ "guilds": guilds }))
}

/// `GET /shards`: one entry per worker plus process stats
pub(super) async fn shards_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let shards = state.broadcaster.health_report().await;
    let fleet = state.broadcaster.fleet();

    Json(ShardsResponse {
        stats: ShardsStats {
            shard_count: shards.len(),
            uptime_secs: fleet.uptime().as_secs(),
        },
        shards,
    })
}

/// `PUT /shards/presence`: best-effort presence update on every worker
pub(super) async fn presence_handler(
    State(state): State<ApiState>,
    payload: Result<Json<PresenceRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let presence = request.validate()?;

    let kind = presence.kind;
    let targeted = state.broadcaster.set_presence(presence);
    info!(?kind, targeted, "Presence update dispatched");

    Ok(StatusCode::OK)
}
