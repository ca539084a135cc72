//! Gateway proxy handlers.
//!
//! Thin translations between HTTP and the transport-agnostic `Gateway`
//! service. None of these hold a session beyond the request, except the
//! SSE stream, which holds a subscription until the client disconnects.

use std::convert::Infallible;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::stream::Stream;
use hubgate_core::{GatewayHealth, SessionStatus};
use hubgate_mcp::{ProxyReply, PromptMessages, ResourceContents, ToolCallResponse};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::dto::{PromptGetBody, ResourceReadBody, ToolCallBody};
use crate::error::HttpError;
use crate::state::AppState;

/// Forward one JSON-RPC message and return the server's response verbatim.
///
/// Notifications (no `id`) are answered with `202 Accepted`.
pub async fn message(
    State(state): State<AppState>,
    Path(server_id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Response, HttpError> {
    match state.gateway.forward_message(&server_id, body).await? {
        ProxyReply::Response(response) => Ok(Json(response).into_response()),
        ProxyReply::Accepted => Ok(StatusCode::ACCEPTED.into_response()),
    }
}

/// Stream the session's inbound messages.
///
/// The forwarding task is cancelled when the client goes away and the
/// response stream is dropped.
pub async fn sse(
    State(state): State<AppState>,
    Path(server_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>> + Send + 'static>, HttpError> {
    let cancel = CancellationToken::new();
    let mut events = state.gateway.subscribe(&server_id, cancel.clone()).await?;
    let guard = cancel.drop_guard();

    let stream = async_stream::stream! {
        let _guard = guard;
        while let Some(event) = events.recv().await {
            match Event::default().event(event.kind.as_str()).json_data(&event) {
                Ok(sse_event) => yield Ok::<_, Infallible>(sse_event),
                Err(e) => tracing::warn!(server_id = %event.server_id, error = %e, "failed to serialize stream event"),
            }
        }
    };

    Ok(Sse::new(stream))
}

pub async fn call_tool(
    State(state): State<AppState>,
    Path((server_id, tool)): Path<(String, String)>,
    Json(body): Json<ToolCallBody>,
) -> Result<Json<ToolCallResponse>, HttpError> {
    Ok(Json(
        state
            .gateway
            .call_tool(&server_id, &tool, body.arguments)
            .await?,
    ))
}

pub async fn read_resource(
    State(state): State<AppState>,
    Path(server_id): Path<String>,
    Json(body): Json<ResourceReadBody>,
) -> Result<Json<ResourceContents>, HttpError> {
    Ok(Json(state.gateway.read_resource(&server_id, &body.uri).await?))
}

pub async fn get_prompt(
    State(state): State<AppState>,
    Path(server_id): Path<String>,
    Json(body): Json<PromptGetBody>,
) -> Result<Json<PromptMessages>, HttpError> {
    let arguments = body
        .arguments
        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
    Ok(Json(
        state
            .gateway
            .get_prompt(&server_id, &body.name, arguments)
            .await?,
    ))
}

/// Read-only; never opens a session.
pub async fn status(
    State(state): State<AppState>,
    Path(server_id): Path<String>,
) -> Json<SessionStatus> {
    Json(state.gateway.status(&server_id).await)
}

pub async fn health(State(state): State<AppState>) -> Json<GatewayHealth> {
    Json(state.gateway.health().await)
}
