//! `SQLite` implementation of the registry store.
//!
//! Stdio environment variables and HTTP headers are stored in a separate
//! table, base64-encoded (not encrypted). The rest of the transport config
//! and the cached capability snapshot are stored as JSON text.

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::SqlitePool;

use hubgate_core::{
    CapabilitySnapshot, NewServerRegistration, RegistrationStatus, RegistryError, RegistryFilter,
    RegistryStore, ServerRegistration, TransportConfig, TransportKind,
};

/// Transport config fields that hold secret maps.
const SECRET_KINDS: [&str; 2] = ["env", "headers"];

/// `SQLite`-backed [`RegistryStore`].
#[derive(Debug, Clone)]
pub struct SqliteRegistry {
    pool: SqlitePool,
}

impl SqliteRegistry {
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal row types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct ServerRow {
    id: String,
    description: Option<String>,
    config: String,
    capabilities: String,
    status: String,
    created_at: DateTime<Utc>,
    last_verified: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct SecretRow {
    kind: String,
    key: String,
    value: String,
}

struct Secret {
    kind: &'static str,
    key: String,
    value: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Helper functions
// ─────────────────────────────────────────────────────────────────────────────

fn internal(context: &str, e: impl std::fmt::Display) -> RegistryError {
    RegistryError::Internal(format!("{context}: {e}"))
}

fn map_sqlx_error(e: sqlx::Error) -> RegistryError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return RegistryError::Conflict(db.message().to_string());
        }
    }
    RegistryError::Internal(e.to_string())
}

fn encode_value(value: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(value.as_bytes())
}

fn decode_value(encoded: &str) -> Result<String, RegistryError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| internal("Failed to decode stored secret", e))?;
    String::from_utf8(bytes).map_err(|e| internal("Invalid UTF-8 in stored secret", e))
}

/// Serialize a transport config with its secret maps taken out.
fn split_config(transport: &TransportConfig) -> Result<(String, Vec<Secret>), RegistryError> {
    let mut value =
        serde_json::to_value(transport).map_err(|e| internal("Failed to encode config", e))?;
    let mut secrets = Vec::new();
    if let Value::Object(map) = &mut value {
        for kind in SECRET_KINDS {
            let Some(Value::Object(entries)) = map.remove(kind) else {
                continue;
            };
            for (key, entry) in entries {
                if let Value::String(value) = entry {
                    secrets.push(Secret { kind, key, value });
                }
            }
        }
    }
    Ok((value.to_string(), secrets))
}

/// Rebuild a transport config from its stored JSON and secret rows.
fn join_config(config: &str, secrets: Vec<SecretRow>) -> Result<TransportConfig, RegistryError> {
    let mut value: Value =
        serde_json::from_str(config).map_err(|e| internal("Malformed stored config", e))?;

    let mut grouped: BTreeMap<String, serde_json::Map<String, Value>> = BTreeMap::new();
    for row in secrets {
        let decoded = decode_value(&row.value)?;
        grouped
            .entry(row.kind)
            .or_default()
            .insert(row.key, Value::String(decoded));
    }
    if let Value::Object(map) = &mut value {
        for (kind, entries) in grouped {
            map.insert(kind, Value::Object(entries));
        }
    }

    serde_json::from_value(value).map_err(|e| internal("Malformed stored config", e))
}

fn row_to_registration(
    row: ServerRow,
    secrets: Vec<SecretRow>,
) -> Result<ServerRegistration, RegistryError> {
    let transport = join_config(&row.config, secrets)?;
    let capabilities: CapabilitySnapshot = serde_json::from_str(&row.capabilities)
        .map_err(|e| internal("Malformed stored capabilities", e))?;
    let status = row
        .status
        .parse::<RegistrationStatus>()
        .map_err(RegistryError::Internal)?;

    Ok(ServerRegistration {
        id: row.id,
        description: row.description,
        transport,
        capabilities,
        status,
        created_at: row.created_at,
        last_verified: row.last_verified,
    })
}

const SELECT_SERVER: &str = r"
    SELECT id, description, config, capabilities, status, created_at, last_verified
    FROM mcp_servers
";

impl SqliteRegistry {
    async fn fetch_secrets(&self, id: &str) -> Result<Vec<SecretRow>, RegistryError> {
        sqlx::query_as::<_, SecretRow>(
            "SELECT kind, key, value FROM mcp_server_secrets WHERE server_id = ? ORDER BY key",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)
    }

    async fn hydrate(&self, row: ServerRow) -> Result<ServerRegistration, RegistryError> {
        let secrets = self.fetch_secrets(&row.id).await?;
        row_to_registration(row, secrets)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store implementation
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl RegistryStore for SqliteRegistry {
    async fn insert(
        &self,
        registration: NewServerRegistration,
    ) -> Result<ServerRegistration, RegistryError> {
        let stored = registration.into_registration(uuid::Uuid::new_v4().to_string());
        let (config, secrets) = split_config(&stored.transport)?;
        let capabilities = serde_json::to_string(&stored.capabilities)
            .map_err(|e| internal("Failed to encode capabilities", e))?;

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        sqlx::query(
            r"
            INSERT INTO mcp_servers (id, type, description, config, capabilities, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&stored.id)
        .bind(stored.kind().as_str())
        .bind(&stored.description)
        .bind(&config)
        .bind(&capabilities)
        .bind(stored.status.as_str())
        .bind(stored.created_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        for secret in &secrets {
            sqlx::query(
                "INSERT INTO mcp_server_secrets (server_id, kind, key, value) VALUES (?, ?, ?, ?)",
            )
            .bind(&stored.id)
            .bind(secret.kind)
            .bind(&secret.key)
            .bind(encode_value(&secret.value))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;

        tracing::debug!(server_id = %stored.id, transport = %stored.kind(), "registration stored");
        Ok(stored)
    }

    async fn get_registration(&self, id: &str) -> Result<ServerRegistration, RegistryError> {
        let row = sqlx::query_as::<_, ServerRow>(&format!("{SELECT_SERVER} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        self.hydrate(row).await
    }

    async fn list(&self, filter: RegistryFilter) -> Result<Vec<ServerRegistration>, RegistryError> {
        let rows = sqlx::query_as::<_, ServerRow>(&format!(
            "{SELECT_SERVER} WHERE (?1 IS NULL OR type = ?1) AND (?2 IS NULL OR status = ?2) \
             ORDER BY rowid DESC"
        ))
        .bind(filter.server_type.map(TransportKind::as_str))
        .bind(filter.status.map(RegistrationStatus::as_str))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let mut registrations = Vec::with_capacity(rows.len());
        for row in rows {
            registrations.push(self.hydrate(row).await?);
        }
        Ok(registrations)
    }

    async fn delete(&self, id: &str) -> Result<(), RegistryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        sqlx::query("DELETE FROM mcp_server_secrets WHERE server_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        let result = sqlx::query("DELETE FROM mcp_servers WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn record_capabilities(
        &self,
        id: &str,
        capabilities: &CapabilitySnapshot,
    ) -> Result<(), RegistryError> {
        let encoded = serde_json::to_string(capabilities)
            .map_err(|e| internal("Failed to encode capabilities", e))?;

        let result = sqlx::query("UPDATE mcp_servers SET capabilities = ? WHERE id = ?")
            .bind(&encoded)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn update_status(
        &self,
        id: &str,
        status: RegistrationStatus,
    ) -> Result<(), RegistryError> {
        let result =
            sqlx::query("UPDATE mcp_servers SET status = ?, last_verified = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(Utc::now())
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        Ok(())
    }
}
