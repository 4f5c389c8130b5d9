//! Host catalog handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use gatehouse_host::{HostCatalog, Options};
use gatehouse_store::Backend;
use serde::Deserialize;

use super::{ListQuery, ListResponse, UpdateRequest, stale_update};
use crate::{
    AppState,
    error::{HandlerError, not_found_error},
};

#[derive(Debug, Default, Deserialize)]
pub struct CreateCatalogRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Create a host catalog in a scope
///
/// # Response (201 Created)
/// ```json
/// {
///   "public_id": "hcst_1234567890",
///   "scope_id": "o_1234567890",
///   "name": "datacenter",
///   "version": 1
/// }
/// ```
///
/// # Errors
/// - 400 Bad Request: name already used in the scope
#[tracing::instrument(skip(state))]
pub async fn create_catalog<B: Backend>(
    State(state): State<AppState<B>>,
    Path(scope_id): Path<String>,
    Json(request): Json<CreateCatalogRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let mut catalog = HostCatalog::new(scope_id);
    catalog.name = request.name;
    catalog.description = request.description;

    let created = state.repo.create_catalog(&state.context(), catalog, Options::new()).await?;

    tracing::info!(
        catalog_id = %created.public_id,
        scope_id = %created.scope_id,
        "Host catalog created"
    );
    Ok((StatusCode::CREATED, Json(created)))
}

#[tracing::instrument(skip(state))]
pub async fn list_catalogs<B: Backend>(
    State(state): State<AppState<B>>,
    Path(scope_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse<HostCatalog>>, HandlerError> {
    let items = state.repo.list_catalogs(&state.context(), &scope_id, query.options()).await?;
    Ok(Json(ListResponse { items }))
}

#[tracing::instrument(skip(state))]
pub async fn get_catalog<B: Backend>(
    State(state): State<AppState<B>>,
    Path(id): Path<String>,
) -> Result<Json<HostCatalog>, HandlerError> {
    let catalog = state
        .repo
        .lookup_catalog(&state.context(), &id)
        .await?
        .ok_or_else(|| not_found_error(format!("Host catalog {id} not found")))?;
    Ok(Json(catalog))
}

/// Update the masked fields of a host catalog
///
/// # Errors
/// - 400 Bad Request: missing version, bad mask or stale version
/// - 404 Not Found: the catalog does not exist
#[tracing::instrument(skip(state))]
pub async fn update_catalog<B: Backend>(
    State(state): State<AppState<B>>,
    Path(id): Path<String>,
    Json(request): Json<UpdateRequest>,
) -> Result<Json<HostCatalog>, HandlerError> {
    let ctx = state.context();
    let version = request.require_version()?;
    let current = state
        .repo
        .lookup_catalog(&ctx, &id)
        .await?
        .ok_or_else(|| not_found_error(format!("Host catalog {id} not found")))?;

    let mut catalog = HostCatalog::new(current.scope_id);
    catalog.public_id = current.public_id;
    catalog.name = request.name;
    catalog.description = request.description;

    let (updated, _) =
        state.repo.update_catalog(&ctx, catalog, version, &request.update_mask).await?;
    match updated {
        Some(updated) => {
            tracing::info!(
                catalog_id = %updated.public_id,
                version = updated.version,
                "Host catalog updated"
            );
            Ok(Json(updated))
        },
        None => {
            let exists = state.repo.lookup_catalog(&ctx, &id).await?.is_some();
            Err(stale_update(exists, "api.update_catalog"))
        },
    }
}

#[tracing::instrument(skip(state))]
pub async fn delete_catalog<B: Backend>(
    State(state): State<AppState<B>>,
    Path(id): Path<String>,
) -> Result<StatusCode, HandlerError> {
    let rows = state.repo.delete_catalog(&state.context(), &id).await?;
    if rows == 0 {
        return Err(not_found_error(format!("Host catalog {id} not found")).into());
    }

    tracing::info!(catalog_id = %id, "Host catalog deleted");
    Ok(StatusCode::NO_CONTENT)
}
