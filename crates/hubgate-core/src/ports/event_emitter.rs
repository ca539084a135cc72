//! Event emitter trait for gateway lifecycle events.
//!
//! Implementations handle transport details (broadcast channels, SSE, logs).

use crate::events::GatewayEvent;

/// Trait for emitting gateway events.
///
/// # Implementations
///
/// - `NoopEmitter` - For tests and CLI contexts that don't need events
/// - `SseBroadcaster` in the HTTP adapter
pub trait GatewayEventEmitter: Send + Sync {
    /// Emit an event. Must not block.
    fn emit(&self, event: GatewayEvent);

    /// Clone this emitter into a boxed trait object.
    fn clone_box(&self) -> Box<dyn GatewayEventEmitter>;
}

/// Discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopEmitter;

impl NoopEmitter {
    pub const fn new() -> Self {
        Self
    }
}

impl GatewayEventEmitter for NoopEmitter {
    fn emit(&self, _event: GatewayEvent) {}

    fn clone_box(&self) -> Box<dyn GatewayEventEmitter> {
        Box::new(self.clone())
    }
}
