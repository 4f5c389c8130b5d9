//! Static host handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use gatehouse_host::{Host, HostCatalog, Options};
use gatehouse_store::{Backend, Context};
use serde::Deserialize;

use super::{ListQuery, ListResponse, UpdateRequest, stale_update};
use crate::{
    AppState,
    error::{HandlerError, not_found_error},
};

#[derive(Debug, Default, Deserialize)]
pub struct CreateHostRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub address: String,
}

async fn owning_catalog<B: Backend>(
    state: &AppState<B>,
    ctx: &Context,
    catalog_id: &str,
) -> Result<HostCatalog, HandlerError> {
    let catalog = state
        .repo
        .lookup_catalog(ctx, catalog_id)
        .await?
        .ok_or_else(|| not_found_error(format!("Host catalog {catalog_id} not found")))?;
    Ok(catalog)
}

async fn existing_host<B: Backend>(
    state: &AppState<B>,
    ctx: &Context,
    id: &str,
) -> Result<Host, HandlerError> {
    let host = state
        .repo
        .lookup_host(ctx, id)
        .await?
        .ok_or_else(|| not_found_error(format!("Host {id} not found")))?;
    Ok(host)
}

/// Create a host in a catalog
///
/// # Request Body
/// ```json
/// {
///   "name": "web-1",
///   "address": "10.0.0.1"
/// }
/// ```
///
/// # Errors
/// - 400 Bad Request: name already used in the catalog
/// - 404 Not Found: the catalog does not exist
/// - 500 Internal Server Error: invalid address
#[tracing::instrument(skip(state))]
pub async fn create_host<B: Backend>(
    State(state): State<AppState<B>>,
    Path(catalog_id): Path<String>,
    Json(request): Json<CreateHostRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let ctx = state.context();
    let catalog = owning_catalog(&state, &ctx, &catalog_id).await?;

    let mut host = Host::new(catalog.public_id, request.address);
    host.name = request.name;
    host.description = request.description;
    let created = state.repo.create_host(&ctx, &catalog.scope_id, host, Options::new()).await?;

    tracing::info!(host_id = %created.public_id, catalog_id = %created.catalog_id, "Host created");
    Ok((StatusCode::CREATED, Json(created)))
}

#[tracing::instrument(skip(state))]
pub async fn list_hosts<B: Backend>(
    State(state): State<AppState<B>>,
    Path(catalog_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse<Host>>, HandlerError> {
    let items = state.repo.list_hosts(&state.context(), &catalog_id, query.options()).await?;
    Ok(Json(ListResponse { items }))
}

#[tracing::instrument(skip(state))]
pub async fn get_host<B: Backend>(
    State(state): State<AppState<B>>,
    Path(id): Path<String>,
) -> Result<Json<Host>, HandlerError> {
    let host = existing_host(&state, &state.context(), &id).await?;
    Ok(Json(host))
}

#[tracing::instrument(skip(state))]
pub async fn update_host<B: Backend>(
    State(state): State<AppState<B>>,
    Path(id): Path<String>,
    Json(request): Json<UpdateRequest>,
) -> Result<Json<Host>, HandlerError> {
    let ctx = state.context();
    let version = request.require_version()?;
    let current = existing_host(&state, &ctx, &id).await?;
    let catalog = owning_catalog(&state, &ctx, &current.catalog_id).await?;

    let mut host = Host::new(current.catalog_id, request.address.unwrap_or_default());
    host.public_id = current.public_id;
    host.name = request.name;
    host.description = request.description;

    let (updated, _) =
        state.repo.update_host(&ctx, &catalog.scope_id, host, version, &request.update_mask).await?;
    match updated {
        Some(updated) => {
            tracing::info!(host_id = %updated.public_id, version = updated.version, "Host updated");
            Ok(Json(updated))
        },
        None => {
            let exists = state.repo.lookup_host(&ctx, &id).await?.is_some();
            Err(stale_update(exists, "api.update_host"))
        },
    }
}

#[tracing::instrument(skip(state))]
pub async fn delete_host<B: Backend>(
    State(state): State<AppState<B>>,
    Path(id): Path<String>,
) -> Result<StatusCode, HandlerError> {
    let ctx = state.context();
    let host = existing_host(&state, &ctx, &id).await?;
    let catalog = owning_catalog(&state, &ctx, &host.catalog_id).await?;

    let rows = state.repo.delete_host(&ctx, &catalog.scope_id, &id).await?;
    if rows == 0 {
        return Err(not_found_error(format!("Host {id} not found")).into());
    }

    tracing::info!(host_id = %id, "Host deleted");
    Ok(StatusCode::NO_CONTENT)
}
