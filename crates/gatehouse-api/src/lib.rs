//! # Gatehouse API
//!
//! REST surface over the static host repository. Every handler returns a
//! [`HandlerError`] on failure, and every failure is rendered by
//! [`handle_error`] so clients only ever see the [`ApiError`] wire object.

#![deny(unsafe_code)]

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    http::{Method, Uri},
    routing::{get, post},
};
use gatehouse_host::Repository;
use gatehouse_store::{Backend, Context};

pub mod error;
pub mod handlers;

pub use error::{
    ApiError, ErrorCode, ErrorDetails, FieldError, GENERIC_NOT_FOUND_MSG, GENERIC_UNIQUENESS_MSG,
    HandlerError, RequestError, RouteNotMatched, handle_error, invalid_argument_error,
    not_found_error,
};

/// Shared state handed to every handler.
pub struct AppState<B: Backend> {
    pub repo: Arc<Repository<B>>,
    /// Deadline applied to the context of each request.
    pub request_timeout: Option<Duration>,
}

impl<B: Backend> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self { repo: Arc::clone(&self.repo), request_timeout: self.request_timeout }
    }
}

impl<B: Backend> AppState<B> {
    pub fn new(repo: Repository<B>) -> Self {
        Self { repo: Arc::new(repo), request_timeout: None }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub(crate) fn context(&self) -> Context {
        let ctx = Context::background();
        match self.request_timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx,
        }
    }
}

/// Build the application router.
///
/// Host set membership actions share the `/v1/host-sets/{id}` path and are
/// selected by the `:add-hosts`, `:set-hosts` or `:remove-hosts` suffix.
pub fn create_router<B: Backend>(state: AppState<B>) -> Router {
    use handlers::{catalogs, hosts, sets};

    Router::new()
        .route(
            "/v1/scopes/{scope_id}/host-catalogs",
            post(catalogs::create_catalog::<B>).get(catalogs::list_catalogs::<B>),
        )
        .route(
            "/v1/host-catalogs/{id}",
            get(catalogs::get_catalog::<B>)
                .patch(catalogs::update_catalog::<B>)
                .delete(catalogs::delete_catalog::<B>),
        )
        .route(
            "/v1/host-catalogs/{id}/hosts",
            post(hosts::create_host::<B>).get(hosts::list_hosts::<B>),
        )
        .route(
            "/v1/hosts/{id}",
            get(hosts::get_host::<B>)
                .patch(hosts::update_host::<B>)
                .delete(hosts::delete_host::<B>),
        )
        .route("/v1/host-catalogs/{id}/host-sets", post(sets::create_set::<B>))
        .route("/v1/host-sets/{id}", get(sets::get_set::<B>).post(sets::set_action::<B>))
        .method_not_allowed_fallback(method_not_allowed)
        .fallback(route_not_matched)
        .with_state(state)
}

async fn route_not_matched() -> HandlerError {
    HandlerError::from(RouteNotMatched)
}

async fn method_not_allowed(method: Method, uri: Uri) -> HandlerError {
    HandlerError::from(tonic::Status::unimplemented(format!(
        "method {method} is not supported on {}",
        uri.path()
    )))
}
