//! Gateway proxy routes against in-process echo servers.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use http_body_util::BodyExt;
use hubgate_core::{InMemoryRegistry, NewServerRegistration, TransportConfig};
use serde_json::json;

use common::TestApp;

fn app() -> TestApp {
    let registry = InMemoryRegistry::with_registrations(vec![
        NewServerRegistration::new(TransportConfig::stdio("echo", vec![]))
            .into_registration("echo"),
    ]);
    TestApp::new(Arc::new(registry))
}

/// Read body frames until `needle` shows up in the accumulated text.
async fn read_until(body: &mut axum::body::Body, needle: &str) -> String {
    let mut text = String::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !text.contains(needle) {
            let Some(frame) = body.frame().await else {
                break;
            };
            if let Ok(data) = frame.unwrap().into_data() {
                text.push_str(&String::from_utf8_lossy(&data));
            }
        }
    })
    .await
    .unwrap();
    text
}

#[tokio::test]
async fn health_endpoint_returns_ok() {
    let app = app();
    let response = app.request("GET", "/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"OK");
}

#[tokio::test]
async fn tool_call_returns_content() {
    let app = app();
    let (status, body) = app
        .json(
            "POST",
            "/gateway/echo/tools/echo",
            Some(json!({"arguments": {"message": "hi"}})),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tool"], "echo");
    assert_eq!(body["isError"], false);
    assert!(body["content"][0]["text"].as_str().unwrap().contains("hi"));
}

#[tokio::test]
async fn unknown_tool_is_reported_as_tool_error() {
    let app = app();
    let (status, body) = app
        .json("POST", "/gateway/echo/tools/nope", Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isError"], true);
}

#[tokio::test]
async fn unsupported_method_is_returned_and_session_stays_ready() {
    let app = app();
    let (status, body) = app
        .json(
            "POST",
            "/gateway/echo/message",
            Some(json!({"jsonrpc": "2.0", "id": 7, "method": "unsupported/thing"})),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], 7);
    assert_eq!(body["error"]["code"], -32601);

    let (_, status) = app.json("GET", "/gateway/echo/status", None).await;
    assert_eq!(status["state"], "ready");
    assert_eq!(status["serverId"], "echo");
}

#[tokio::test]
async fn notifications_are_accepted() {
    let app = app();
    let response = app
        .request(
            "POST",
            "/gateway/echo/message",
            Some(json!({"jsonrpc": "2.0", "method": "notifications/ping"})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn message_without_method_is_bad_request() {
    let app = app();
    let (status, body) = app
        .json("POST", "/gateway/echo/message", Some(json!({"id": 1})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["type"], "INVALID_REQUEST");
    assert_eq!(app.factory.opens(), 0);
}

#[tokio::test]
async fn unregistered_server_is_not_found() {
    let app = app();
    let (status, body) = app
        .json("POST", "/gateway/ghost/tools/echo", Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["type"], "SERVER_NOT_REGISTERED");
    assert_eq!(body["status"], 404);
}

#[tokio::test]
async fn transport_failure_is_service_unavailable() {
    let app = app();
    app.factory.fail_next_opens(1);
    let (status, body) = app
        .json("POST", "/gateway/echo/tools/echo", Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["type"], "TRANSPORT_ERROR");

    let (_, status) = app.json("GET", "/gateway/echo/status", None).await;
    assert_eq!(status["state"], "closed");
    assert!(status["error"].as_str().is_some());
}

#[tokio::test]
async fn status_and_health_never_open_sessions() {
    let app = app();
    let (status, body) = app.json("GET", "/gateway/echo/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "closed");

    let (status, body) = app.json("GET", "/gateway/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["total"], 0);
    assert_eq!(app.factory.opens(), 0);
}

#[tokio::test]
async fn health_counts_live_sessions() {
    let app = app();
    app.json("POST", "/gateway/echo/tools/echo", Some(json!({})))
        .await;

    let (_, body) = app.json("GET", "/gateway/health", None).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["active"], 1);
    assert_eq!(body["failed"], 0);
    assert_eq!(body["servers"]["echo"]["state"], "ready");
}

#[tokio::test]
async fn resources_and_prompts() {
    let app = app();
    let (status, body) = app
        .json(
            "POST",
            "/gateway/echo/resources/read",
            Some(json!({"uri": "file://config.json"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["uri"], "file://config.json");
    assert_eq!(body["mimeType"], "application/json");
    assert_eq!(body["contents"].as_array().unwrap().len(), 1);

    let (status, body) = app
        .json(
            "POST",
            "/gateway/echo/resources/read",
            Some(json!({"uri": "file://missing"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["type"], "PROTOCOL_ERROR");
    assert_eq!(body["metadata"]["code"], -32002);

    let (status, body) = app
        .json(
            "POST",
            "/gateway/echo/prompts/get",
            Some(json!({"name": "summarize", "arguments": {"text": "long story"}})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "summarize");
    assert_eq!(
        body["messages"][0]["content"]["text"],
        "Summarize: long story"
    );
}

#[tokio::test]
async fn sse_stream_connects_and_ends_with_error_when_server_dies() {
    let app = app();
    let response = app.request("GET", "/gateway/echo/sse", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    let mut body = response.into_body();
    let text = read_until(&mut body, "event: connected").await;
    assert!(text.contains("\"serverId\":\"echo\""));

    app.factory.kill_all();

    let text = read_until(&mut body, "event: error").await;
    assert!(text.contains("event: error"));
}

#[tokio::test]
async fn dropping_the_sse_client_leaves_the_session_alone() {
    let app = app();
    let response = app.request("GET", "/gateway/echo/sse", None).await;
    let mut body = response.into_body();
    read_until(&mut body, "event: connected").await;
    drop(body);

    let (status, _) = app
        .json("POST", "/gateway/echo/tools/echo", Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.factory.opens(), 1);
}

#[tokio::test]
async fn lifecycle_events_are_streamed() {
    let app = app();
    let response = app.request("GET", "/gateway/events", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    app.json("POST", "/gateway/echo/tools/echo", Some(json!({})))
        .await;

    let mut body = response.into_body();
    let text = read_until(&mut body, "capabilities_discovered").await;
    assert!(text.contains("session_opened"));
}
