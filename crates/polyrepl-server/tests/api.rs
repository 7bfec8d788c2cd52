//! Router-level tests driving the full HTTP surface in memory.

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use polyrepl_backend::{CalcBackend, CalcCodec};
use polyrepl_coordinator::{Coordinator, CoordinatorConfig};
use polyrepl_core::SessionStore;
use polyrepl_server::{AppState, Config, router};
use polyrepl_store::MemoryStore;
use serde_json::{Value, json};
use tower::ServiceExt;

fn test_config() -> Config {
    Config {
        port: 0,
        database_url: None,
        environment: "development".to_string(),
        cors_origins: Vec::new(),
        implicit_sessions: false,
        exec_timeout: Duration::from_secs(5),
    }
}

fn app() -> Router {
    let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::new(false));
    let coordinator = Arc::new(Coordinator::new(
        Arc::clone(&store),
        Arc::new(CalcBackend::new()),
        Arc::new(CalcCodec),
        CoordinatorConfig {
            exec_timeout: Duration::from_secs(5),
            implicit_sessions: false,
        },
    ));
    router(AppState { store, coordinator }, &test_config())
}

async fn request(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create_session(app: &Router, language: &str) -> String {
    let (status, body) = request(
        app,
        "POST",
        "/sessions",
        Some(json!({ "language": language })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_reports_language() {
    let app = app();
    let (status, body) = request(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["language"], "calc");
    assert_eq!(body["stateless"], true);
}

#[tokio::test]
async fn session_lifecycle() {
    let app = app();

    let (status, created) = request(&app, "POST", "/sessions", Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["name"], "Session 1");
    assert_eq!(created["language"], "calc");
    let id = created["id"].as_str().unwrap().to_string();

    let (status, listed) = request(&app, "GET", "/sessions", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["total"], 1);

    let (status, _) = request(
        &app,
        "PUT",
        &format!("/sessions/{id}/rename"),
        Some(json!({ "name": "scratchpad" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, fetched) = request(&app, "GET", &format!("/sessions/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["name"], "scratchpad");

    let (status, _) = request(&app, "DELETE", &format!("/sessions/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = request(&app, "GET", &format!("/sessions/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn execute_reset_scenario() {
    let app = app();
    let id = create_session(&app, "calc").await;

    let (status, body) = request(
        &app,
        "POST",
        &format!("/execute/{id}"),
        Some(json!({ "code": "a = 21" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["output"], "");
    assert_eq!(body["error"], Value::Null);

    let (status, body) = request(
        &app,
        "POST",
        &format!("/execute/{id}"),
        Some(json!({ "code": "a * 2" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["output"], "42\n");

    let (status, body) = request(&app, "POST", &format!("/reset/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].is_string());

    // The binding is gone but the session and its history survive.
    let (status, body) = request(
        &app,
        "POST",
        &format!("/execute/{id}"),
        Some(json!({ "code": "a" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["error"], "name 'a' is not defined");

    let (status, history) = request(&app, "GET", &format!("/sessions/{id}/history"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(history["count"].as_u64().unwrap() >= 3);
}

#[tokio::test]
async fn blank_code_is_rejected_without_history() {
    let app = app();
    let id = create_session(&app, "calc").await;

    let (status, body) = request(
        &app,
        "POST",
        &format!("/execute/{id}"),
        Some(json!({ "code": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].is_string());

    let (_, history) = request(&app, "GET", &format!("/sessions/{id}/history"), None).await;
    assert_eq!(history["count"], 0);
    let (status, _) = request(&app, "GET", &format!("/sessions/{id}/environment"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bound_language_is_enforced() {
    let app = app();
    let id = create_session(&app, "python").await;

    let (status, body) = request(
        &app,
        "POST",
        &format!("/execute/{id}"),
        Some(json!({ "code": "1 + 1" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("configured for"));
}

#[tokio::test]
async fn unknown_session_is_404() {
    let app = app();
    let (status, _) = request(
        &app,
        "POST",
        "/execute/00000000-0000-0000-0000-000000000000",
        Some(json!({ "code": "1" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn sessions_are_isolated() {
    let app = app();
    let first = create_session(&app, "calc").await;
    let second = create_session(&app, "calc").await;

    request(
        &app,
        "POST",
        &format!("/execute/{first}"),
        Some(json!({ "code": "x = 1" })),
    )
    .await;

    let (status, body) = request(
        &app,
        "POST",
        &format!("/execute/{second}"),
        Some(json!({ "code": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["error"], "name 'x' is not defined");
}

#[tokio::test]
async fn streaming_emits_sse_frames() {
    let app = app();
    let id = create_session(&app, "calc").await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/execute-stream/{id}"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({ "code": "x = 2\nx * 21" }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/event-stream"));

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(body.contains(r#"{"type":"output","content":"42\n"}"#));
    assert!(body.contains(r#"{"type":"complete","returnCode":0}"#));

    // Streamed output is reconciled into durable history.
    let (_, history) = request(&app, "GET", &format!("/sessions/{id}/history"), None).await;
    assert_eq!(history["count"], 2);
    assert_eq!(history["history"][1]["type"], "output");
    assert_eq!(history["history"][1]["content"], "42\n");
}

#[tokio::test]
async fn history_and_environment_endpoints() {
    let app = app();
    let id = create_session(&app, "calc").await;

    let (status, entry) = request(
        &app,
        "POST",
        &format!("/sessions/{id}/history"),
        Some(json!({ "type": "input", "content": "x = 1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let entry_id = entry["id"].as_str().unwrap().to_string();

    let (status, _) = request(
        &app,
        "PUT",
        &format!("/sessions/{id}/history/{entry_id}"),
        Some(json!({ "content": "x = 2" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, history) = request(&app, "GET", &format!("/sessions/{id}/history"), None).await;
    assert_eq!(history["history"][0]["content"], "x = 2");

    let (status, _) = request(
        &app,
        "PUT",
        &format!("/sessions/{id}/history/not-an-entry"),
        Some(json!({ "content": "y" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = request(&app, "DELETE", &format!("/sessions/{id}/history"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, history) = request(&app, "GET", &format!("/sessions/{id}/history"), None).await;
    assert_eq!(history["count"], 0);

    let (status, _) = request(
        &app,
        "PUT",
        &format!("/sessions/{id}/environment"),
        Some(json!({ "language": "calc", "serialized_data": "eyJiaW5kaW5ncyI6e319" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, env) = request(&app, "GET", &format!("/sessions/{id}/environment"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(env["language"], "calc");
    assert_eq!(env["serialized_data"], "eyJiaW5kaW5ncyI6e319");

    let (status, _) = request(&app, "DELETE", &format!("/sessions/{id}/environment"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = request(&app, "GET", &format!("/sessions/{id}/environment"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn activity_endpoint_enforces_language() {
    let app = app();
    let id = create_session(&app, "calc").await;

    let (status, _) = request(
        &app,
        "PUT",
        &format!("/sessions/{id}/activity?language=calc"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = request(
        &app,
        "PUT",
        &format!("/sessions/{id}/activity?language=python"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, session) = request(&app, "GET", &format!("/sessions/{id}"), None).await;
    assert_eq!(session["execution_count"], 1);
}
