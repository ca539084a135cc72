#![doc = include_str!("../README.md")]
#![deny(unused_crate_dependencies)]

pub mod echo;
pub mod gateway;
pub mod handshake;
pub mod manager;
pub mod protocol;
pub mod session;
pub mod supervisor;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod transport;

pub use gateway::{
    Gateway, ProxyReply, PromptMessages, ResourceContents, StreamEvent, StreamEventKind,
    ToolCallResponse,
};
pub use handshake::{DeclaredGroups, HandshakeInfo};
pub use manager::{ConnectionManager, SweepReport};
pub use protocol::{JsonRpcError, JsonRpcId, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse};
pub use session::{Session, SessionSubscription};
pub use supervisor::SweepSupervisor;
pub use transport::{
    DefaultTransportFactory, Transport, TransportError, TransportFactory, TransportOptions,
};

// Used only by the integration tests
#[cfg(test)]
use axum as _;
