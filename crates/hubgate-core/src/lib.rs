#![doc = include_str!("../README.md")]
#![deny(unused_crate_dependencies)]

pub mod config;
pub mod domain;
pub mod events;
pub mod paths;
pub mod ports;

// Re-export commonly used types for convenience
pub use config::GatewayConfig;
pub use domain::{
    CapabilityKind, CapabilitySnapshot, GatewayHealth, HealthStatus, NewServerRegistration,
    PromptArgument, PromptCapability, RegistrationStatus, ResourceCapability, SearchQuery,
    SearchResult, ServerRegistration, SessionState, SessionStatus, ToolCapability, TransportConfig,
    TransportKind, search_capabilities,
};
pub use events::GatewayEvent;
pub use paths::{PathError, data_root, database_path};
pub use ports::{
    GatewayError, GatewayEventEmitter, InMemoryRegistry, NoopEmitter, RegistryError,
    RegistryFilter, RegistryStore,
};
