//! Host set handlers, including the membership actions.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use gatehouse_host::{Host, HostSet, Options};
use gatehouse_store::Backend;
use serde::{Deserialize, Serialize};

use crate::{
    AppState,
    error::{HandlerError, RouteNotMatched, not_found_error},
};

#[derive(Debug, Default, Deserialize)]
pub struct CreateSetRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Body of the `:add-hosts`, `:set-hosts` and `:remove-hosts` actions.
#[derive(Debug, Default, Deserialize)]
pub struct SetHostsRequest {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub host_ids: Vec<String>,
}

/// A host set together with the ids of its member hosts.
#[derive(Debug, Serialize, Deserialize)]
pub struct HostSetView {
    #[serde(flatten)]
    pub set: HostSet,
    #[serde(default)]
    pub host_ids: Vec<String>,
}

impl HostSetView {
    fn new(set: HostSet, hosts: Vec<Host>) -> Self {
        Self { set, host_ids: hosts.into_iter().map(|h| h.public_id).collect() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetAction {
    Add,
    Set,
    Remove,
}

/// Split `hsst_1234567890:add-hosts` into the set id and its action.
fn parse_action(segment: &str) -> Option<(&str, SetAction)> {
    let (id, action) = segment.split_once(':')?;
    let action = match action {
        "add-hosts" => SetAction::Add,
        "set-hosts" => SetAction::Set,
        "remove-hosts" => SetAction::Remove,
        _ => return None,
    };
    Some((id, action))
}

#[tracing::instrument(skip(state))]
pub async fn create_set<B: Backend>(
    State(state): State<AppState<B>>,
    Path(catalog_id): Path<String>,
    Json(request): Json<CreateSetRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let ctx = state.context();
    let catalog = state
        .repo
        .lookup_catalog(&ctx, &catalog_id)
        .await?
        .ok_or_else(|| not_found_error(format!("Host catalog {catalog_id} not found")))?;

    let mut set = HostSet::new(catalog.public_id);
    set.name = request.name;
    set.description = request.description;
    let created = state.repo.create_set(&ctx, &catalog.scope_id, set, Options::new()).await?;

    tracing::info!(
        set_id = %created.public_id,
        catalog_id = %created.catalog_id,
        "Host set created"
    );
    Ok((StatusCode::CREATED, Json(HostSetView::new(created, Vec::new()))))
}

#[tracing::instrument(skip(state))]
pub async fn get_set<B: Backend>(
    State(state): State<AppState<B>>,
    Path(id): Path<String>,
) -> Result<Json<HostSetView>, HandlerError> {
    let ctx = state.context();
    let set = state
        .repo
        .lookup_set(&ctx, &id)
        .await?
        .ok_or_else(|| not_found_error(format!("Host set {id} not found")))?;
    let hosts = state.repo.list_set_members(&ctx, &id).await?;
    Ok(Json(HostSetView::new(set, hosts)))
}

/// Change the membership of a host set
///
/// The path segment names the set and the action, for example
/// `/v1/host-sets/hsst_1234567890:set-hosts`. The response carries the set
/// at its new version and its members after the change.
///
/// # Errors
/// - 404 Not Found: unknown action or set
/// - 500 Internal Server Error: stale version or hosts from another catalog
#[tracing::instrument(skip(state))]
pub async fn set_action<B: Backend>(
    State(state): State<AppState<B>>,
    Path(segment): Path<String>,
    Json(request): Json<SetHostsRequest>,
) -> Result<Json<HostSetView>, HandlerError> {
    let (id, action) = parse_action(&segment).ok_or(RouteNotMatched)?;
    let ctx = state.context();
    let set = state
        .repo
        .lookup_set(&ctx, id)
        .await?
        .ok_or_else(|| not_found_error(format!("Host set {id} not found")))?;
    let catalog = state
        .repo
        .lookup_catalog(&ctx, &set.catalog_id)
        .await?
        .ok_or_else(|| not_found_error(format!("Host catalog {} not found", set.catalog_id)))?;
    let scope_id = catalog.scope_id.as_str();

    let hosts = match action {
        SetAction::Add => {
            state
                .repo
                .add_set_members(&ctx, scope_id, id, request.version, &request.host_ids)
                .await?
        },
        SetAction::Remove => {
            state
                .repo
                .delete_set_members(&ctx, scope_id, id, request.version, &request.host_ids)
                .await?;
            state.repo.list_set_members(&ctx, id).await?
        },
        SetAction::Set => {
            let (hosts, changed) = state
                .repo
                .set_set_members(&ctx, scope_id, id, request.version, &request.host_ids)
                .await?;
            tracing::debug!(set_id = %id, changed, "Host set membership replaced");
            hosts
        },
    };

    let set = state
        .repo
        .lookup_set(&ctx, id)
        .await?
        .ok_or_else(|| not_found_error(format!("Host set {id} not found")))?;
    tracing::info!(
        set_id = %id,
        action = ?action,
        version = set.version,
        "Host set membership changed"
    );
    Ok(Json(HostSetView::new(set, hosts)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_action() {
        assert_eq!(parse_action("hsst_1:add-hosts"), Some(("hsst_1", SetAction::Add)));
        assert_eq!(parse_action("hsst_1:set-hosts"), Some(("hsst_1", SetAction::Set)));
        assert_eq!(parse_action("hsst_1:remove-hosts"), Some(("hsst_1", SetAction::Remove)));
        assert_eq!(parse_action("hsst_1:drop-hosts"), None);
        assert_eq!(parse_action("hsst_1"), None);
    }
}
