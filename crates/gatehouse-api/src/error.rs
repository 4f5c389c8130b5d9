//! Transport error handling.
//!
//! Every error that leaves a handler is rendered by [`handle_error`] into an
//! [`ApiError`]. The mapping is ordered and the first match wins: unmatched
//! routes, explicit request errors, unimplemented gRPC statuses, the
//! outermost domain error in the chain, and finally an opaque internal error
//! carrying a fresh correlation id.

use std::{collections::BTreeMap, error::Error as StdError, fmt};

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use gatehouse_errors::{BoxError, Code, chain, domain};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message returned when a write would violate a uniqueness constraint.
pub const GENERIC_UNIQUENESS_MSG: &str = "Invalid request.  Request attempted to make second \
     resource with the same field value that must be unique.";

/// Message returned when a repository reports a missing record.
pub const GENERIC_NOT_FOUND_MSG: &str = "Unable to find requested resource.";

/// Transport-level status code carried in [`ApiError::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    NotFound,
    InvalidArgument,
    Unimplemented,
    Internal,
}

impl ErrorCode {
    pub fn http_status(self) -> StatusCode {
        match self {
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::InvalidArgument => StatusCode::BAD_REQUEST,
            ErrorCode::Unimplemented => StatusCode::METHOD_NOT_ALLOWED,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A single request field that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetails {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub request_fields: Vec<FieldError>,
    /// Correlation id for internal errors. Matches the id in the server log.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_id: String,
}

/// Error body returned to API clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub status: u16,
    pub code: ErrorCode,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
}

impl ApiError {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { status: code.http_status().as_u16(), code, message: message.into(), details: None }
    }

    fn with_fields(mut self, fields: impl IntoIterator<Item = (String, String)>) -> Self {
        let request_fields: Vec<FieldError> = fields
            .into_iter()
            .map(|(name, description)| FieldError { name, description })
            .collect();
        if !request_fields.is_empty() {
            self.details.get_or_insert_with(ErrorDetails::default).request_fields = request_fields;
        }
        self
    }

    fn internal(error_id: String) -> Self {
        let mut err = Self::new(ErrorCode::Internal, String::new());
        err.details = Some(ErrorDetails { request_fields: Vec::new(), error_id });
        err
    }

    /// Correlation id of an internal error, if any.
    pub fn error_id(&self) -> Option<&str> {
        self.details.as_ref().map(|d| d.error_id.as_str()).filter(|id| !id.is_empty())
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.status, self.code)?;
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

impl From<ApiError> for tonic::Status {
    fn from(err: ApiError) -> Self {
        let code = match err.code {
            ErrorCode::NotFound => tonic::Code::NotFound,
            ErrorCode::InvalidArgument => tonic::Code::InvalidArgument,
            ErrorCode::Unimplemented => tonic::Code::Unimplemented,
            ErrorCode::Internal => tonic::Code::Internal,
        };
        let message = match err.error_id() {
            Some(id) if err.message.is_empty() => format!("internal error, id: {id}"),
            _ => err.message.clone(),
        };
        tonic::Status::new(code, message)
    }
}

/// Errors raised directly by request handlers.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("{0}")]
    NotFound(String),

    #[error("{msg}")]
    InvalidArgument { msg: String, fields: BTreeMap<String, String> },
}

/// A 404 with a caller-supplied message.
pub fn not_found_error(msg: impl Into<String>) -> RequestError {
    RequestError::NotFound(msg.into())
}

/// A 400 naming the offending request fields. Fields are reported sorted by
/// name.
pub fn invalid_argument_error(
    msg: impl Into<String>,
    fields: BTreeMap<String, String>,
) -> RequestError {
    RequestError::InvalidArgument { msg: msg.into(), fields }
}

/// No route matched the request path.
#[derive(Debug, Clone, Copy, Error)]
#[error("route not matched")]
pub struct RouteNotMatched;

/// Render any error into its transport form.
///
/// Only the internal branch logs. It records the full error and the
/// correlation id so the response can be traced back to the server log.
pub fn handle_error(err: &(dyn StdError + 'static)) -> ApiError {
    if chain(err).any(|e| e.is::<RouteNotMatched>()) {
        return ApiError::new(ErrorCode::NotFound, "Not Found");
    }

    if let Some(request) = chain(err).find_map(|e| e.downcast_ref::<RequestError>()) {
        return match request {
            RequestError::NotFound(msg) => ApiError::new(ErrorCode::NotFound, msg.clone()),
            RequestError::InvalidArgument { msg, fields } => {
                ApiError::new(ErrorCode::InvalidArgument, msg.clone()).with_fields(fields.clone())
            },
        };
    }

    if let Some(status) = chain(err).find_map(|e| e.downcast_ref::<tonic::Status>()) {
        if status.code() == tonic::Code::Unimplemented {
            return ApiError::new(ErrorCode::Unimplemented, status.message());
        }
    }

    if let Some(domain) = domain(err) {
        match domain.code() {
            Code::InvalidFieldMask | Code::EmptyFieldMask => {
                return ApiError::new(ErrorCode::InvalidArgument, "Error in provided request")
                    .with_fields([(
                        "update_mask".to_string(),
                        "Invalid update mask provided.".to_string(),
                    )]);
            },
            Code::NotUnique => {
                return ApiError::new(ErrorCode::InvalidArgument, GENERIC_UNIQUENESS_MSG);
            },
            Code::RecordNotFound => {
                return ApiError::new(ErrorCode::NotFound, GENERIC_NOT_FOUND_MSG);
            },
            _ => {},
        }
    }

    let error_id = format!("e_{}", uuid::Uuid::new_v4().simple());
    tracing::error!(error_id = %error_id, error = %err, "Internal error");
    ApiError::internal(error_id)
}

/// Error type returned by handlers. Rendered through [`handle_error`].
#[derive(Debug)]
pub struct HandlerError(BoxError);

impl HandlerError {
    pub fn into_inner(self) -> BoxError {
        self.0
    }
}

impl<E> From<E> for HandlerError
where
    E: StdError + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self(Box::new(err))
    }
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        handle_error(self.0.as_ref()).into_response()
    }
}
