//! Registry handlers - register, inspect, verify and search servers.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use hubgate_core::{
    GatewayError, RegistrationStatus, RegistryFilter, SearchResult, search_capabilities,
};

use crate::dto::{
    ListServersParams, RegisterServerRequest, SearchParams, ServerResponse, VerifyResponse,
};
use crate::error::HttpError;
use crate::state::AppState;

/// Store a new server and discover its capabilities.
///
/// The registration is kept even when discovery fails; its status is then
/// `error` and `verify` can be retried later.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterServerRequest>,
) -> Result<(StatusCode, Json<ServerResponse>), HttpError> {
    let new = req.into_registration().map_err(HttpError::BadRequest)?;
    let stored = state.registry.insert(new).await?;

    let status = match state.manager().discover(&stored).await {
        Ok(info) => {
            state
                .registry
                .record_capabilities(&stored.id, &info.capabilities)
                .await?;
            tracing::info!(
                server_id = %stored.id,
                transport = %stored.kind(),
                tools = info.capabilities.tools.len(),
                "server registered"
            );
            RegistrationStatus::Active
        }
        Err(e) => {
            tracing::warn!(server_id = %stored.id, error = %e, "discovery failed during registration");
            RegistrationStatus::Error
        }
    };
    state.registry.update_status(&stored.id, status).await?;

    let registration = state.registry.get_registration(&stored.id).await?;
    Ok((StatusCode::CREATED, Json(registration.into())))
}

pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListServersParams>,
) -> Result<Json<Vec<ServerResponse>>, HttpError> {
    let filter = params.into_filter().map_err(HttpError::BadRequest)?;
    let registrations = state.registry.list(filter).await?;
    Ok(Json(registrations.into_iter().map(Into::into).collect()))
}

pub async fn get(
    State(state): State<AppState>,
    Path(server_id): Path<String>,
) -> Result<Json<ServerResponse>, HttpError> {
    Ok(Json(state.registry.get_registration(&server_id).await?.into()))
}

/// Delete a registration and tear down its live session, if any.
pub async fn remove(
    State(state): State<AppState>,
    Path(server_id): Path<String>,
) -> Result<StatusCode, HttpError> {
    state.registry.delete(&server_id).await?;
    state
        .manager()
        .invalidate(&server_id, "registration deleted")
        .await;
    Ok(StatusCode::NO_CONTENT)
}

/// Re-run discovery and update status and cached capabilities.
pub async fn verify(
    State(state): State<AppState>,
    Path(server_id): Path<String>,
) -> Result<Json<VerifyResponse>, HttpError> {
    match state.manager().verify(&server_id).await {
        Ok(capabilities) => Ok(Json(VerifyResponse {
            server_id,
            status: RegistrationStatus::Active,
            message: "Server is reachable and responding".to_string(),
            capabilities,
        })),
        Err(e @ (GatewayError::ServerNotRegistered(_) | GatewayError::Registry(_))) => {
            Err(e.into())
        }
        Err(e) => Err(HttpError::ServiceUnavailable(format!(
            "Server verification failed: {e}"
        ))),
    }
}

/// Search cached capabilities of active servers.
pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<SearchResult>>, HttpError> {
    let query = params.into_query().map_err(HttpError::BadRequest)?;
    let registrations = state
        .registry
        .list(RegistryFilter {
            server_type: query.server_type,
            status: Some(RegistrationStatus::Active),
        })
        .await?;
    Ok(Json(search_capabilities(&registrations, &query)))
}
