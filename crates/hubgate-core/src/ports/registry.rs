//! Registry store port.
//!
//! The registry owns server registrations and the cached capability
//! snapshots used for search. The gateway reads registrations through
//! `get_registration` and reports discoveries through `record_capabilities`.

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::{
    CapabilitySnapshot, NewServerRegistration, RegistrationStatus, ServerRegistration,
    TransportKind,
};

/// Storage-agnostic registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No registration with this id.
    #[error("MCP server not found: {0}")]
    NotFound(String),

    /// A registration with this id already exists.
    #[error("MCP server already exists: {0}")]
    Conflict(String),

    /// Storage backend error (database, etc.).
    #[error("Storage error: {0}")]
    Internal(String),
}

/// Optional list filters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryFilter {
    pub server_type: Option<TransportKind>,
    pub status: Option<RegistrationStatus>,
}

impl RegistryFilter {
    pub fn matches(&self, registration: &ServerRegistration) -> bool {
        self.server_type.is_none_or(|t| t == registration.kind())
            && self.status.is_none_or(|s| s == registration.status)
    }
}

/// Persistence for capability server registrations.
///
/// `list` returns newest registrations first.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Store a new registration under a freshly assigned id.
    async fn insert(
        &self,
        registration: NewServerRegistration,
    ) -> Result<ServerRegistration, RegistryError>;

    /// Look up one registration.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the id is unknown
    async fn get_registration(&self, id: &str) -> Result<ServerRegistration, RegistryError>;

    async fn list(&self, filter: RegistryFilter) -> Result<Vec<ServerRegistration>, RegistryError>;

    async fn delete(&self, id: &str) -> Result<(), RegistryError>;

    /// Replace the cached capability snapshot for a server.
    async fn record_capabilities(
        &self,
        id: &str,
        capabilities: &CapabilitySnapshot,
    ) -> Result<(), RegistryError>;

    /// Set the verification status and stamp `last_verified` with now.
    async fn update_status(&self, id: &str, status: RegistrationStatus)
    -> Result<(), RegistryError>;
}

/// Registry kept in process memory.
///
/// Used by tests and by embedders that manage registrations themselves.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    entries: RwLock<Vec<ServerRegistration>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the registry with pre-built registrations.
    pub fn with_registrations(registrations: Vec<ServerRegistration>) -> Self {
        Self {
            entries: RwLock::new(registrations),
        }
    }

    async fn modify<F>(&self, id: &str, f: F) -> Result<(), RegistryError>
    where
        F: FnOnce(&mut ServerRegistration) + Send,
    {
        let mut entries = self.entries.write().await;
        let entry = entries
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        f(entry);
        Ok(())
    }
}

#[async_trait]
impl RegistryStore for InMemoryRegistry {
    async fn insert(
        &self,
        registration: NewServerRegistration,
    ) -> Result<ServerRegistration, RegistryError> {
        let stored = registration.into_registration(uuid::Uuid::new_v4().to_string());
        self.entries.write().await.push(stored.clone());
        Ok(stored)
    }

    async fn get_registration(&self, id: &str) -> Result<ServerRegistration, RegistryError> {
        self.entries
            .read()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    async fn list(&self, filter: RegistryFilter) -> Result<Vec<ServerRegistration>, RegistryError> {
        let mut matched: Vec<ServerRegistration> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched)
    }

    async fn delete(&self, id: &str) -> Result<(), RegistryError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|r| r.id != id);
        if entries.len() == before {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn record_capabilities(
        &self,
        id: &str,
        capabilities: &CapabilitySnapshot,
    ) -> Result<(), RegistryError> {
        let capabilities = capabilities.clone();
        self.modify(id, move |r| r.capabilities = capabilities).await
    }

    async fn update_status(
        &self,
        id: &str,
        status: RegistrationStatus,
    ) -> Result<(), RegistryError> {
        self.modify(id, move |r| {
            r.status = status;
            r.last_verified = Some(Utc::now());
        })
        .await
    }
}
