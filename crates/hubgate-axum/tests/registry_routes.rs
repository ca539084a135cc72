//! Registry routes backed by an in-memory `SQLite` registry.

mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use hubgate_db::{SqliteRegistry, setup_test_database};
use serde_json::{Value, json};

use common::TestApp;

async fn app() -> TestApp {
    let pool = setup_test_database().await.unwrap();
    TestApp::new(Arc::new(SqliteRegistry::new(pool)))
}

async fn register(app: &TestApp, body: Value) -> Value {
    let (status, body) = app.json("POST", "/mcp/servers/register", Some(body)).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body
}

fn stdio(description: &str) -> Value {
    json!({
        "type": "stdio",
        "description": description,
        "command": "echo-server",
        "args": ["--quiet"],
        "env": {"API_KEY": "secret"}
    })
}

#[tokio::test]
async fn register_discovers_capabilities() {
    let app = app().await;
    let body = register(&app, stdio("Echo")).await;

    assert_eq!(body["type"], "stdio");
    assert_eq!(body["status"], "active");
    assert_eq!(body["description"], "Echo");
    assert_eq!(body["config"]["command"], "echo-server");
    assert_eq!(body["config"]["env"]["API_KEY"], "secret");
    assert!(body["last_verified"].is_string());
    let tools = body["capabilities"]["tools"].as_array().unwrap();
    assert!(tools.iter().any(|t| t["name"] == "echo"));

    // Discovery session is not kept around
    assert_eq!(app.context.manager().session_count().await, 0);
}

#[tokio::test]
async fn register_keeps_unreachable_servers_with_error_status() {
    let app = app().await;
    app.factory.fail_next_opens(1);
    let body = register(&app, stdio("Down")).await;
    assert_eq!(body["status"], "error");

    let id = body["id"].as_str().unwrap();
    let (status, fetched) = app.json("GET", &format!("/mcp/servers/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["status"], "error");
}

#[tokio::test]
async fn register_rejects_incomplete_bodies() {
    let app = app().await;
    let (status, body) = app
        .json("POST", "/mcp/servers/register", Some(json!({"type": "stdio"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], 400);

    let (status, _) = app
        .json("POST", "/mcp/servers/register", Some(json!({"type": "http"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.json("GET", "/mcp/servers", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn list_filters_by_type_and_status() {
    let app = app().await;
    register(&app, stdio("first")).await;
    register(&app, stdio("second")).await;
    register(&app, json!({"type": "http", "url": "http://localhost:9/mcp"})).await;

    let (status, all) = app.json("GET", "/mcp/servers", None).await;
    assert_eq!(status, StatusCode::OK);
    let all = all.as_array().unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0]["type"], "http");
    assert_eq!(all[1]["description"], "second");

    let (_, stdio_only) = app.json("GET", "/mcp/servers?server_type=stdio", None).await;
    assert_eq!(stdio_only.as_array().unwrap().len(), 2);

    let (_, errored) = app.json("GET", "/mcp/servers?status=error", None).await;
    assert!(errored.as_array().unwrap().is_empty());

    let (status, _) = app.json("GET", "/mcp/servers?server_type=ftp", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_registration_is_not_found() {
    let app = app().await;
    let (status, body) = app.json("GET", "/mcp/servers/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "MCP server not found: missing");

    let (status, _) = app.json("DELETE", "/mcp/servers/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.json("POST", "/mcp/servers/missing/verify", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn verify_updates_status() {
    let app = app().await;
    let id = register(&app, stdio("Echo")).await["id"]
        .as_str()
        .unwrap()
        .to_string();

    let (status, body) = app
        .json("POST", &format!("/mcp/servers/{id}/verify"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["server_id"], id.as_str());
    assert_eq!(body["status"], "active");
    assert!(!body["capabilities"]["tools"].as_array().unwrap().is_empty());

    app.factory.fail_next_opens(1);
    let (status, body) = app
        .json("POST", &format!("/mcp/servers/{id}/verify"), None)
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .starts_with("Server verification failed")
    );

    let (_, fetched) = app.json("GET", &format!("/mcp/servers/{id}"), None).await;
    assert_eq!(fetched["status"], "error");
}

#[tokio::test]
async fn search_matches_cached_capabilities() {
    let app = app().await;
    let id = register(&app, stdio("Echo")).await["id"]
        .as_str()
        .unwrap()
        .to_string();

    let (status, results) = app.json("GET", "/mcp/search?query=echo", None).await;
    assert_eq!(status, StatusCode::OK);
    let results = results.as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["server_id"], id.as_str());
    assert_eq!(results[0]["server_type"], "stdio");
    assert!(
        results[0]["matched_tools"]
            .as_array()
            .unwrap()
            .iter()
            .any(|t| t["name"] == "echo")
    );

    let (_, results) = app
        .json("GET", "/mcp/search?query=sample&capability_type=resource", None)
        .await;
    let results = results.as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0]["matched_tools"].as_array().unwrap().is_empty());
    assert_eq!(results[0]["matched_resources"].as_array().unwrap().len(), 1);

    let (_, results) = app.json("GET", "/mcp/search?server_type=http", None).await;
    assert!(results.as_array().unwrap().is_empty());

    let (status, _) = app.json("GET", "/mcp/search?capability_type=widget", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.json("GET", "/mcp/search?limit=0", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn search_skips_servers_in_error() {
    let app = app().await;
    app.factory.fail_next_opens(1);
    register(&app, stdio("Down")).await;

    let (_, results) = app.json("GET", "/mcp/search?query=echo", None).await;
    assert!(results.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn delete_removes_registration_and_live_session() {
    let app = app().await;
    let id = register(&app, stdio("Echo")).await["id"]
        .as_str()
        .unwrap()
        .to_string();

    let (status, _) = app
        .json(
            "POST",
            &format!("/gateway/{id}/tools/echo"),
            Some(json!({"arguments": {"message": "hi"}})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.context.manager().session_count().await, 1);

    let (status, body) = app.json("DELETE", &format!("/mcp/servers/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);
    assert_eq!(app.context.manager().session_count().await, 0);

    let (status, _) = app.json("GET", &format!("/mcp/servers/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .json("POST", &format!("/gateway/{id}/tools/echo"), Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["type"], "SERVER_NOT_REGISTERED");
}
