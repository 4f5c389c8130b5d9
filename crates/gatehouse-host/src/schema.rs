//! Table definitions of the static host subsystem.

use gatehouse_store::{
    MemoryBackend, Row, TableSchema,
    schema::{Check, ForeignKey, OnDelete, Unique, column},
};
use serde_json::Value;

use crate::model::{MAX_HOST_ADDRESS_LENGTH, MIN_HOST_ADDRESS_LENGTH};

pub const HOST_CATALOG_TABLE: &str = "static_host_catalog";
pub const HOST_TABLE: &str = "static_host";
pub const HOST_SET_TABLE: &str = "static_host_set";
pub const HOST_SET_MEMBER_TABLE: &str = "static_host_set_member";

fn address_length_holds(row: &Row) -> bool {
    match column(row, "address") {
        Value::String(address) => {
            let len = address.chars().count();
            (MIN_HOST_ADDRESS_LENGTH..=MAX_HOST_ADDRESS_LENGTH).contains(&len)
        },
        _ => false,
    }
}

fn address_trimmed_holds(row: &Row) -> bool {
    match column(row, "address") {
        Value::String(address) => address.trim() == address,
        _ => false,
    }
}

pub static HOST_CATALOG: TableSchema = TableSchema {
    name: HOST_CATALOG_TABLE,
    primary_key: &["public_id"],
    public_id: Some("public_id"),
    unique: &[Unique {
        name: "static_host_catalog_scope_id_name_key",
        columns: &["scope_id", "name"],
    }],
    not_null: &["scope_id"],
    foreign_keys: &[],
    checks: &[],
    immutable: &["scope_id", "create_time"],
    versioned: true,
};

pub static HOST: TableSchema = TableSchema {
    name: HOST_TABLE,
    primary_key: &["public_id"],
    public_id: Some("public_id"),
    unique: &[
        Unique { name: "static_host_catalog_id_name_key", columns: &["catalog_id", "name"] },
        Unique {
            name: "static_host_catalog_id_public_id_key",
            columns: &["catalog_id", "public_id"],
        },
    ],
    not_null: &["catalog_id", "address"],
    foreign_keys: &[ForeignKey {
        name: "static_host_catalog_id_fkey",
        columns: &["catalog_id"],
        references: HOST_CATALOG_TABLE,
        referenced_columns: &["public_id"],
        on_delete: OnDelete::Cascade,
    }],
    checks: &[
        Check { name: "address_must_be_between_3_and_255_characters", holds: address_length_holds },
        Check { name: "address_must_not_be_padded", holds: address_trimmed_holds },
    ],
    immutable: &["catalog_id", "create_time"],
    versioned: true,
};

pub static HOST_SET: TableSchema = TableSchema {
    name: HOST_SET_TABLE,
    primary_key: &["public_id"],
    public_id: Some("public_id"),
    unique: &[
        Unique { name: "static_host_set_catalog_id_name_key", columns: &["catalog_id", "name"] },
        Unique {
            name: "static_host_set_catalog_id_public_id_key",
            columns: &["catalog_id", "public_id"],
        },
    ],
    not_null: &["catalog_id"],
    foreign_keys: &[ForeignKey {
        name: "static_host_set_catalog_id_fkey",
        columns: &["catalog_id"],
        references: HOST_CATALOG_TABLE,
        referenced_columns: &["public_id"],
        on_delete: OnDelete::Cascade,
    }],
    checks: &[],
    immutable: &["catalog_id", "create_time"],
    versioned: true,
};

/// Members carry the catalog of their set. The two composite references
/// only resolve when the host lives in that same catalog.
pub static HOST_SET_MEMBER: TableSchema = TableSchema {
    name: HOST_SET_MEMBER_TABLE,
    primary_key: &["set_id", "host_id"],
    public_id: None,
    unique: &[],
    not_null: &["set_id", "host_id", "catalog_id"],
    foreign_keys: &[
        ForeignKey {
            name: "static_host_set_member_set_id_catalog_id_fkey",
            columns: &["set_id", "catalog_id"],
            references: HOST_SET_TABLE,
            referenced_columns: &["public_id", "catalog_id"],
            on_delete: OnDelete::Cascade,
        },
        ForeignKey {
            name: "static_host_set_member_host_id_catalog_id_fkey",
            columns: &["host_id", "catalog_id"],
            references: HOST_TABLE,
            referenced_columns: &["public_id", "catalog_id"],
            on_delete: OnDelete::Cascade,
        },
    ],
    checks: &[],
    immutable: &["catalog_id"],
    versioned: false,
};

/// Every table of the subsystem, referenced tables first.
pub static ALL: [&TableSchema; 4] = [&HOST_CATALOG, &HOST, &HOST_SET, &HOST_SET_MEMBER];

/// An empty in-memory store with the static host tables installed.
pub fn memory_backend() -> MemoryBackend {
    MemoryBackend::with_schemas(ALL)
}
