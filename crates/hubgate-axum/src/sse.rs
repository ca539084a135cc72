//! SSE broadcaster for gateway lifecycle events.
//!
//! Implements the core `GatewayEventEmitter` port so the connection manager
//! can publish session events that are streamed to connected web clients.

use std::convert::Infallible;
use std::sync::Arc;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::Stream;
use hubgate_core::{GatewayEvent, GatewayEventEmitter};
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

/// Default number of buffered events per subscriber.
pub const DEFAULT_CAPACITY: usize = 256;

/// Fans gateway events out to every connected client.
///
/// Slow clients that fall more than the channel capacity behind skip the
/// events they missed.
#[derive(Debug, Clone)]
pub struct SseBroadcaster {
    sender: broadcast::Sender<GatewayEvent>,
}

impl SseBroadcaster {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    /// SSE response for a new client, with a keep-alive comment every 30s.
    pub fn subscribe(
        self: Arc<Self>,
    ) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send + 'static> {
        let receiver = self.sender.subscribe();
        let stream = BroadcastStream::new(receiver).filter_map(|result| match result {
            Ok(event) => match Event::default().json_data(&event) {
                Ok(sse_event) => Some(Ok(sse_event)),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to serialize gateway event");
                    None
                }
            },
            Err(e) => {
                tracing::debug!(error = %e, "gateway event stream lagged");
                None
            }
        });

        Sse::new(stream).keep_alive(
            KeepAlive::new()
                .interval(std::time::Duration::from_secs(30))
                .text("ping"),
        )
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    #[cfg(test)]
    fn receiver(&self) -> broadcast::Receiver<GatewayEvent> {
        self.sender.subscribe()
    }
}

impl GatewayEventEmitter for SseBroadcaster {
    fn emit(&self, event: GatewayEvent) {
        tracing::debug!(server_id = %event.server_id(), "gateway event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    fn clone_box(&self) -> Box<dyn GatewayEventEmitter> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcaster_creation() {
        let broadcaster = SseBroadcaster::with_defaults();
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_emit_without_subscribers() {
        let broadcaster = SseBroadcaster::with_defaults();
        broadcaster.emit(GatewayEvent::session_reconnected("s1"));
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let broadcaster = SseBroadcaster::with_defaults();
        let mut receiver = broadcaster.receiver();

        broadcaster.emit(GatewayEvent::session_closed("s1", "idle"));

        match receiver.recv().await.unwrap() {
            GatewayEvent::SessionClosed { server_id, reason } => {
                assert_eq!(server_id, "s1");
                assert_eq!(reason, "idle");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
