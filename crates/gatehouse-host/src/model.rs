//! Static host domain records.

use chrono::{DateTime, Utc};
use gatehouse_store::{
    Metadata, OpType, Record,
    oplog::{OP_TYPE, RESOURCE_PUBLIC_ID, RESOURCE_TYPE, SCOPE_ID},
};
use serde::{Deserialize, Serialize};

use crate::schema::{HOST_CATALOG_TABLE, HOST_SET_MEMBER_TABLE, HOST_SET_TABLE, HOST_TABLE};

/// Public id prefix of host catalogs.
pub const HOST_CATALOG_PREFIX: &str = "hcst";
/// Public id prefix of hosts.
pub const HOST_PREFIX: &str = "hst";
/// Public id prefix of host sets.
pub const HOST_SET_PREFIX: &str = "hsst";

/// Shortest accepted host address, after trimming.
pub const MIN_HOST_ADDRESS_LENGTH: usize = 3;
/// Longest accepted host address, after trimming.
pub const MAX_HOST_ADDRESS_LENGTH: usize = 255;

/// A scope-owned container of static hosts and host sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCatalog {
    #[serde(default)]
    pub public_id: String,
    pub scope_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub update_time: Option<DateTime<Utc>>,
}

impl HostCatalog {
    pub fn new(scope_id: impl Into<String>) -> Self {
        Self { scope_id: scope_id.into(), ..Self::default() }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub(crate) fn oplog(&self, op: OpType) -> Metadata {
        Metadata::new()
            .with(RESOURCE_PUBLIC_ID, self.public_id.as_str())
            .with(RESOURCE_TYPE, "static host catalog")
            .with(OP_TYPE, op.as_str())
            .with(SCOPE_ID, self.scope_id.as_str())
    }
}

impl Record for HostCatalog {
    const TABLE: &'static str = HOST_CATALOG_TABLE;
}

/// A static address inside a catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    #[serde(default)]
    pub public_id: String,
    pub catalog_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub update_time: Option<DateTime<Utc>>,
}

impl Host {
    pub fn new(catalog_id: impl Into<String>, address: impl Into<String>) -> Self {
        Self { catalog_id: catalog_id.into(), address: address.into(), ..Self::default() }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub(crate) fn oplog(&self, op: OpType, scope_id: &str) -> Metadata {
        Metadata::new()
            .with(RESOURCE_PUBLIC_ID, self.public_id.as_str())
            .with(RESOURCE_TYPE, "static host")
            .with(OP_TYPE, op.as_str())
            .with(SCOPE_ID, scope_id)
    }
}

impl Record for Host {
    const TABLE: &'static str = HOST_TABLE;
}

/// A named collection of hosts of one catalog.
///
/// Its `version` guards membership changes as well as its own attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSet {
    #[serde(default)]
    pub public_id: String,
    pub catalog_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub update_time: Option<DateTime<Utc>>,
}

impl HostSet {
    pub fn new(catalog_id: impl Into<String>) -> Self {
        Self { catalog_id: catalog_id.into(), ..Self::default() }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl Record for HostSet {
    const TABLE: &'static str = HOST_SET_TABLE;
}

pub(crate) fn set_oplog(set_id: &str, op: OpType, scope_id: &str) -> Metadata {
    Metadata::new()
        .with(RESOURCE_PUBLIC_ID, set_id)
        .with(RESOURCE_TYPE, "static host set")
        .with(OP_TYPE, op.as_str())
        .with(SCOPE_ID, scope_id)
}

/// Membership of one host in one set.
///
/// `catalog_id` is copied from the set so the store can reject hosts of
/// other catalogs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSetMember {
    pub set_id: String,
    pub host_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub catalog_id: String,
}

impl HostSetMember {
    pub fn new(set_id: impl Into<String>, host_id: impl Into<String>) -> Self {
        Self { set_id: set_id.into(), host_id: host_id.into(), catalog_id: String::new() }
    }
}

impl Record for HostSetMember {
    const TABLE: &'static str = HOST_SET_MEMBER_TABLE;
}

/// Maps an empty optional string to `None`.
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
