//! Build declarations
//!
//! A declared build is acknowledged immediately; the channel notification
//! that follows is best-effort.

use super::{ApiError, ApiState};
use crate::error::ManagerError;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

/// Validated body of `POST /builds`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub url: String,
    pub message: String,
    pub filename: String,
}

impl BuildRequest {
    /// Validate a raw JSON body field by field, trimming every value
    pub fn from_json(body: &Value) -> Result<Self, ManagerError> {
        let url = required_string(body, "url")?;
        let message = required_string(body, "message")?;
        let filename = required_string(body, "filename")?;

        url::Url::parse(&url).map_err(|_| ManagerError::Validation {
            field: "url",
            reason: "must be a valid URL".to_string(),
        })?;

        Ok(Self {
            url,
            message,
            filename,
        })
    }
}

fn required_string(body: &Value, field: &'static str) -> Result<String, ManagerError> {
    body.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ManagerError::Validation {
            field,
            reason: "is required and must be a non-empty string".to_string(),
        })
}

/// Acknowledged build
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRecord {
    /// Creation time in milliseconds since the epoch
    pub id: i64,
    pub url: String,
    pub message: String,
    pub filename: String,
    pub created_at: String,
}

impl BuildRecord {
    pub fn new(request: BuildRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: now.timestamp_millis(),
            url: request.url,
            message: request.message,
            filename: request.filename,
            created_at: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    /// Channel message announcing the build
    pub fn notification(&self, now: DateTime<Utc>) -> String {
        format!(
            "**🔨 New Build Available**\n{}\n📄 File: `{}`\n🔗 URL: <{}>\n⏰ Created at: <t:{}:F>",
            self.message,
            self.filename,
            self.url,
            now.timestamp()
        )
    }
}

/// `POST /builds`
pub(super) async fn declare_build_handler(
    State(state): State<ApiState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let request = BuildRequest::from_json(&body)?;

    let notifications = &state.build_notifications;
    if notifications.enabled && notifications.channel_ids.is_empty() {
        return Err(ManagerError::NotificationsUnconfigured.into());
    }

    let now = Utc::now();
    let record = BuildRecord::new(request, now);
    info!(build_id = record.id, filename = %record.filename, "Build declared");

    if notifications.enabled {
        let content = record.notification(now);
        for &channel_id in &notifications.channel_ids {
            let targeted = state.broadcaster.announce(channel_id, content.clone());
            if targeted == 0 {
                warn!(channel_id = %channel_id, "No worker available for build notification");
            }
        }
    }

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Build declared successfully",
            "data": record,
        })),
    ))
}
