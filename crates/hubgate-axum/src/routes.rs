//! Route definitions and router construction.

use axum::Router;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::bootstrap::CorsConfig;
use crate::handlers;
use crate::state::AppState;

fn build_cors_layer(config: &CorsConfig) -> CorsLayer {
    match config {
        CorsConfig::AllowAll => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
        CorsConfig::AllowOrigins(origins) => {
            let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            CorsLayer::new()
                .allow_origin(allowed)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    }
}

/// Gateway proxy routes.
fn gateway_routes() -> Router<AppState> {
    Router::new()
        .route("/gateway/health", get(handlers::gateway::health))
        .route("/gateway/events", get(handlers::events::stream))
        .route("/gateway/{id}/message", post(handlers::gateway::message))
        .route("/gateway/{id}/sse", get(handlers::gateway::sse))
        .route(
            "/gateway/{id}/tools/{name}",
            post(handlers::gateway::call_tool),
        )
        .route(
            "/gateway/{id}/resources/read",
            post(handlers::gateway::read_resource),
        )
        .route(
            "/gateway/{id}/prompts/get",
            post(handlers::gateway::get_prompt),
        )
        .route("/gateway/{id}/status", get(handlers::gateway::status))
}

/// Registry management routes.
fn registry_routes() -> Router<AppState> {
    Router::new()
        .route("/mcp/servers", get(handlers::registry::list))
        .route("/mcp/servers/register", post(handlers::registry::register))
        .route(
            "/mcp/servers/{id}",
            get(handlers::registry::get).delete(handlers::registry::remove),
        )
        .route("/mcp/servers/{id}/verify", post(handlers::registry::verify))
        .route("/mcp/search", get(handlers::registry::search))
}

/// Build the complete router.
pub fn create_router(state: AppState, cors: &CorsConfig) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .merge(gateway_routes())
        .merge(registry_routes())
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(cors))
        .with_state(state)
}
