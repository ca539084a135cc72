//! HTTP handlers, grouped by surface.

pub mod events;
pub mod gateway;
pub mod registry;

/// Liveness check for the web server itself.
pub async fn health() -> &'static str {
    "OK"
}
