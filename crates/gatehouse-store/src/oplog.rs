//! Oplog types: the append-only record of committed mutations.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Row, kms::SealedBlob};

/// Metadata key holding the public id of the mutated resource.
pub const RESOURCE_PUBLIC_ID: &str = "resource-public-id";
/// Metadata key holding the resource type marker.
pub const RESOURCE_TYPE: &str = "resource-type";
/// Metadata key holding one or more operation type tags.
pub const OP_TYPE: &str = "op-type";
/// Metadata key holding the scope the resource belongs to.
pub const SCOPE_ID: &str = "scope-id";

/// Kind of row mutation recorded in a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpType {
    #[serde(rename = "OP_TYPE_CREATE")]
    Create,
    #[serde(rename = "OP_TYPE_UPDATE")]
    Update,
    #[serde(rename = "OP_TYPE_DELETE")]
    Delete,
}

impl OpType {
    pub const fn as_str(self) -> &'static str {
        match self {
            OpType::Create => "OP_TYPE_CREATE",
            OpType::Update => "OP_TYPE_UPDATE",
            OpType::Delete => "OP_TYPE_DELETE",
        }
    }
}

impl std::fmt::Display for OpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Multi-valued, ordered metadata attached to an oplog entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata(BTreeMap<String, Vec<String>>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces all values of `key`.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), vec![value.into()]);
        self
    }

    /// Appends `value` to the values of `key`, keeping insertion order.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.entry(key.into()).or_default().push(value.into());
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.0.get(key).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn op_types(&self) -> &[String] {
        self.get(OP_TYPE).unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }
}

/// One row mutation inside an oplog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Table the row belongs to.
    pub type_name: String,
    pub op_type: OpType,
    /// Row image after the mutation, or the deleted row.
    pub row: Row,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub field_mask: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub null_fields: Vec<String>,
}

impl Message {
    pub fn new(type_name: impl Into<String>, op_type: OpType, row: Row) -> Self {
        Self {
            type_name: type_name.into(),
            op_type,
            row,
            field_mask: Vec::new(),
            null_fields: Vec::new(),
        }
    }
}

/// Handle attributing an oplog entry to a table.
///
/// Tickets for a table are issued with strictly increasing versions inside
/// the writing transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub name: String,
    pub version: u64,
}

/// A committed oplog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OplogEntry {
    /// Position in the log, starting at 1.
    pub id: u64,
    pub ticket: Ticket,
    pub metadata: Metadata,
    pub messages: Vec<Message>,
    /// Seal over the serialized metadata and messages.
    pub sealed: SealedBlob,
    pub create_time: DateTime<Utc>,
}

impl OplogEntry {
    /// Bytes covered by the seal.
    pub fn payload(metadata: &Metadata, messages: &[Message]) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&(metadata, messages))
    }
}
