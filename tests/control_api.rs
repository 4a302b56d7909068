//! Control API integration tests
//!
//! Drive the real router with `tower::ServiceExt::oneshot` against fake workers.

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use common::{api_state, channel_of, eventually, fleet, Behavior, FakeLauncher, SECRET};
use serde_json::{json, Value};
use shard_manager::api;
use shard_manager::config::BuildNotificationConfig;
use shard_manager::shard::ActivityKind;
use tower::ServiceExt;

async fn app(launcher: &FakeLauncher, shards: u32) -> Router {
    app_with(launcher, shards, BuildNotificationConfig::default()).await
}

async fn app_with(
    launcher: &FakeLauncher,
    shards: u32,
    notifications: BuildNotificationConfig,
) -> Router {
    api::router(api_state(fleet(launcher, shards).await, notifications))
}

async fn send(
    app: Router,
    method: Method,
    uri: &str,
    secret: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(secret) = secret {
        builder = builder.header(header::AUTHORIZATION, secret);
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

#[tokio::test]
async fn shards_report_keeps_failed_worker_in_place() {
    let launcher = FakeLauncher::new().with(1, Behavior::Hanging);
    let app = app(&launcher, 3).await;

    let (status, body) = send(app, Method::GET, "/shards", Some(SECRET), None).await;
    assert_eq!(status, StatusCode::OK);

    let shards = body["shards"].as_array().unwrap();
    assert_eq!(shards.len(), 3);

    assert_eq!(shards[0]["id"], 0);
    assert_eq!(shards[0]["error"], false);
    assert_eq!(shards[0]["ready"], true);
    assert_eq!(shards[0]["uptimeSecs"], 0);

    assert_eq!(shards[1]["id"], 1);
    assert_eq!(shards[1]["error"], true);
    assert!(shards[1].get("uptimeSecs").is_none());

    assert_eq!(shards[2]["error"], false);
    assert_eq!(shards[2]["uptimeSecs"], 20);

    assert_eq!(body["stats"]["shardCount"], 3);
    assert!(body["stats"]["uptimeSecs"].is_u64());
}

#[tokio::test]
async fn shards_report_includes_workers_that_never_launched() {
    let launcher = FakeLauncher::new().with(0, Behavior::FailLaunch);
    let app = app(&launcher, 2).await;

    let (status, body) = send(app, Method::GET, "/shards", Some(SECRET), None).await;
    assert_eq!(status, StatusCode::OK);

    let shards = body["shards"].as_array().unwrap();
    assert_eq!(shards.len(), 2);
    assert_eq!(shards[0]["error"], true);
    assert_eq!(shards[0]["ready"], false);
    assert_eq!(shards[1]["uptimeSecs"], 10);
}

#[tokio::test]
async fn guilds_are_deduplicated_across_workers() {
    let launcher = FakeLauncher::new().with(2, Behavior::Hanging);
    let app = app(&launcher, 4).await;

    let (status, body) = send(app, Method::GET, "/guilds", Some(SECRET), None).await;
    assert_eq!(status, StatusCode::OK);

    let mut guilds: Vec<String> = body["guilds"]
        .as_array()
        .unwrap()
        .iter()
        .map(|g| g.as_str().unwrap().to_string())
        .collect();
    guilds.sort();
    // {1,2} ∪ {2,3} ∪ {4,5}; shard 2 never answers
    assert_eq!(guilds, vec!["1", "2", "3", "4", "5"]);
}

#[tokio::test]
async fn fleet_endpoints_require_the_secret() {
    let launcher = FakeLauncher::new();
    let app = app(&launcher, 1).await;

    let routes = [
        (Method::GET, "/guilds"),
        (Method::GET, "/shards"),
        (Method::PUT, "/shards/presence"),
        (Method::GET, "/jobs"),
    ];

    for (method, uri) in routes {
        for secret in [None, Some("wrong")] {
            let (status, body) = send(app.clone(), method.clone(), uri, secret, None).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{method} {uri}");
            assert!(body["error"].is_string());
        }
    }

    assert!(launcher.presences().is_empty());
}

#[tokio::test]
async fn open_endpoints_need_no_secret() {
    let launcher = FakeLauncher::new();
    let app = app(&launcher, 2).await;

    let (status, body) = send(app.clone(), Method::GET, "/", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["name"].is_string());
    assert!(body["version"].is_string());

    let (status, body) = send(app.clone(), Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = send(app, Method::GET, "/ready", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["shardsReady"], 2);
}

#[tokio::test]
async fn ready_is_unavailable_without_ready_workers() {
    let launcher = FakeLauncher::new().with(0, Behavior::Hanging);
    let app = app(&launcher, 1).await;

    let (status, body) = send(app, Method::GET, "/ready", None, None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["ready"], false);
}

#[tokio::test]
async fn jobs_endpoint_is_empty_without_scheduler() {
    let launcher = FakeLauncher::new();
    let app = app(&launcher, 1).await;

    let (status, body) = send(app, Method::GET, "/jobs", Some(SECRET), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["jobs"], json!([]));
}

#[tokio::test]
async fn presence_schema_violations_are_rejected() {
    let launcher = FakeLauncher::new();
    let app = app(&launcher, 2).await;

    let invalid = [
        json!({ "name": "with the fleet" }),
        json!({ "type": "Playing" }),
        json!({ "type": "Sleeping", "name": "x" }),
        json!({ "type": "Playing", "name": "" }),
        json!({ "type": "Streaming", "name": "live", "url": "nope" }),
    ];

    for body in invalid {
        let (status, response) = send(
            app.clone(),
            Method::PUT,
            "/shards/presence",
            Some(SECRET),
            Some(body.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
        assert!(response["error"].is_string(), "{body}");
    }

    assert!(launcher.presences().is_empty());
}

#[tokio::test]
async fn presence_reaches_every_healthy_worker() {
    let launcher = FakeLauncher::new().with(1, Behavior::Hanging);
    let app = app(&launcher, 3).await;

    let (status, body) = send(
        app,
        Method::PUT,
        "/shards/presence",
        Some(SECRET),
        Some(json!({ "type": "Watching", "name": "the shards" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::Null);

    assert!(eventually(|| launcher.presences().len() == 2).await);
    let mut shards: Vec<u32> = launcher.presences().iter().map(|(id, _)| *id).collect();
    shards.sort();
    assert_eq!(shards, vec![0, 2]);
    assert!(launcher
        .presences()
        .iter()
        .all(|(_, p)| p.kind == ActivityKind::Watching && p.name == "the shards"));
}

#[tokio::test]
async fn build_without_filename_is_rejected() {
    let launcher = FakeLauncher::new();
    let app = app(&launcher, 1).await;

    let (status, body) = send(
        app,
        Method::POST,
        "/builds",
        None,
        Some(json!({ "url": "https://example.com/build.zip", "message": "nightly" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("filename"));
    assert!(body.get("data").is_none());
}

#[tokio::test]
async fn build_with_invalid_url_is_rejected() {
    let launcher = FakeLauncher::new();
    let app = app(&launcher, 1).await;

    let (status, body) = send(
        app,
        Method::POST,
        "/builds",
        None,
        Some(json!({ "url": "example", "message": "nightly", "filename": "a.zip" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("url"));
}

#[tokio::test]
async fn build_is_acknowledged_with_trimmed_data() {
    let launcher = FakeLauncher::new();
    let app = app(&launcher, 1).await;

    let (status, body) = send(
        app,
        Method::POST,
        "/builds",
        None,
        Some(json!({
            "url": " https://example.com/build.zip ",
            "message": " nightly ",
            "filename": "build.zip  ",
        })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert!(body["message"].is_string());

    let data = &body["data"];
    assert!(data["id"].as_i64().unwrap() > 0);
    assert_eq!(data["url"], "https://example.com/build.zip");
    assert_eq!(data["message"], "nightly");
    assert_eq!(data["filename"], "build.zip");
    assert!(data["createdAt"].as_str().unwrap().ends_with('Z'));

    // Notifications are disabled by default
    assert!(launcher.announcements().is_empty());
}

#[tokio::test]
async fn build_notifications_need_a_channel() {
    let launcher = FakeLauncher::new();
    let app = app_with(
        &launcher,
        1,
        BuildNotificationConfig {
            enabled: true,
            channel_ids: Vec::new(),
        },
    )
    .await;

    let (status, body) = send(
        app,
        Method::POST,
        "/builds",
        None,
        Some(json!({ "url": "https://example.com/a", "message": "m", "filename": "f" })),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn build_notification_is_posted_by_owning_worker() {
    let launcher = FakeLauncher::new().with(0, Behavior::Hanging);
    let app = app_with(
        &launcher,
        3,
        BuildNotificationConfig {
            enabled: true,
            channel_ids: vec![channel_of(2)],
        },
    )
    .await;

    let (status, _) = send(
        app,
        Method::POST,
        "/builds",
        None,
        Some(json!({
            "url": "https://example.com/a.zip",
            "message": "release candidate",
            "filename": "a.zip",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    assert!(eventually(|| !launcher.announcements().is_empty()).await);
    let announcements = launcher.announcements();
    assert_eq!(announcements.len(), 1);
    assert_eq!(announcements[0].0, 2);
    assert_eq!(announcements[0].1, channel_of(2));
    assert!(announcements[0].2.contains("release candidate"));
}
