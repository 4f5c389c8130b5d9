//! Request handlers and the request/response bodies they exchange.

use std::collections::BTreeMap;

use gatehouse_errors::{Code, Error};
use gatehouse_host::Options;
use serde::{Deserialize, Serialize};

use crate::error::{HandlerError, RequestError, invalid_argument_error};

pub mod catalogs;
pub mod hosts;
pub mod sets;

/// Query parameters accepted by list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Maximum number of items. `0` or absent uses the server default,
    /// negative means unlimited.
    #[serde(default)]
    pub limit: Option<i64>,
}

impl ListQuery {
    pub(crate) fn options(&self) -> Options {
        match self.limit {
            Some(limit) => Options::new().with_limit(limit),
            None => Options::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
}

/// Body of a partial update.
///
/// Only the fields named in `update_mask` are applied. A masked field that
/// is absent here is set to null.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateRequest {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub update_mask: Vec<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

impl UpdateRequest {
    pub(crate) fn require_version(&self) -> Result<u32, RequestError> {
        if self.version == 0 {
            return Err(field_error("version", "Required field."));
        }
        Ok(self.version)
    }
}

fn field_error(name: &str, description: &str) -> RequestError {
    let mut fields = BTreeMap::new();
    fields.insert(name.to_string(), description.to_string());
    invalid_argument_error("Error in provided request", fields)
}

/// Explain why an update touched no rows.
///
/// `exists` reports whether the entity is still present. A vanished entity
/// answers as a missing record, a surviving one as a stale version.
pub(crate) fn stale_update(exists: bool, op: &'static str) -> HandlerError {
    if exists {
        HandlerError::from(field_error(
            "version",
            "Provided version does not match the current version.",
        ))
    } else {
        let err = Error::new(Code::RecordNotFound, op).with_msg("resource no longer exists");
        HandlerError::from(err)
    }
}
