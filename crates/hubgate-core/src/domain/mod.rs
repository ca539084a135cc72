//! Domain types for the gateway.

mod capability;
mod registration;
mod search;
mod session;

pub use capability::{
    CapabilityKind, CapabilitySnapshot, PromptArgument, PromptCapability, ResourceCapability,
    ToolCapability,
};
pub use registration::{
    NewServerRegistration, RegistrationStatus, ServerRegistration, TransportConfig, TransportKind,
};
pub use search::{
    DEFAULT_SEARCH_LIMIT, MAX_SEARCH_LIMIT, SearchQuery, SearchResult, search_capabilities,
};
pub use session::{GatewayHealth, HealthStatus, SessionState, SessionStatus};
