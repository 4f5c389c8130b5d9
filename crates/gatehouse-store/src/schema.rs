//! Static table definitions enforced by store backends.
//!
//! Domain crates describe their tables once as `static` [`TableSchema`]s and
//! hand them to the backend. The backend enforces every constraint listed
//! here and reports violations as driver errors carrying the matching
//! SQLSTATE, so domain code classifies them through
//! [`gatehouse_errors::convert`] exactly as it would for a relational store.

use serde_json::Value;

use crate::Row;

/// Column holding the optimistic concurrency token.
pub const VERSION: &str = "version";
/// Column set once when a row is created.
pub const CREATE_TIME: &str = "create_time";
/// Column refreshed on every update.
pub const UPDATE_TIME: &str = "update_time";

/// What happens to referencing rows when a referenced row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDelete {
    Cascade,
    Restrict,
}

/// A set of columns whose values must be unique across the table.
///
/// Rows where any of the columns is null are exempt, as in SQL.
#[derive(Debug)]
pub struct Unique {
    pub name: &'static str,
    pub columns: &'static [&'static str],
}

/// A reference from `columns` to `referenced_columns` of `references`.
#[derive(Debug)]
pub struct ForeignKey {
    pub name: &'static str,
    pub columns: &'static [&'static str],
    pub references: &'static str,
    pub referenced_columns: &'static [&'static str],
    pub on_delete: OnDelete,
}

/// A row predicate that must hold after every write.
#[derive(Debug)]
pub struct Check {
    pub name: &'static str,
    pub holds: fn(&Row) -> bool,
}

/// Definition of one table.
#[derive(Debug)]
pub struct TableSchema {
    pub name: &'static str,
    pub primary_key: &'static [&'static str],
    /// Column used by `lookup_by_public_id`, if the table has one.
    pub public_id: Option<&'static str>,
    pub unique: &'static [Unique],
    pub not_null: &'static [&'static str],
    pub foreign_keys: &'static [ForeignKey],
    pub checks: &'static [Check],
    /// Columns that may never change after insert.
    pub immutable: &'static [&'static str],
    /// Maintains `version`, `create_time` and `update_time`.
    pub versioned: bool,
}

impl TableSchema {
    pub fn is_immutable(&self, column: &str) -> bool {
        self.primary_key.contains(&column) || self.immutable.contains(&column)
    }
}

/// Reads `column` from `row`, treating a missing column as null.
pub fn column<'a>(row: &'a Row, column: &str) -> &'a Value {
    row.get(column).unwrap_or(&Value::Null)
}

/// Renders a column value the way drivers print it in error details.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}
