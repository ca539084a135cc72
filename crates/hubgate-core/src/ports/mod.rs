//! Port definitions: the traits adapters implement and the errors they share.

mod error;
mod event_emitter;
mod registry;

pub use error::GatewayError;
pub use event_emitter::{GatewayEventEmitter, NoopEmitter};
pub use registry::{InMemoryRegistry, RegistryError, RegistryFilter, RegistryStore};
