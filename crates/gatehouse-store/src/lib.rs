//! # Gatehouse store
//!
//! Transactional storage abstraction used by the gatehouse repositories.
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                Repository Layer                  │
//! │        (validation, field masks, oplog)          │
//! ├──────────────────────────────────────────────────┤
//! │       do_tx  (retry, backoff, cancellation)      │
//! ├──────────────────────────────────────────────────┤
//! │    Backend ─ begin() ─▶ Transaction              │
//! │    Reader (lookup, search, member changes)       │
//! │    Writer (create, update, delete, oplog)        │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! Rows are JSON objects keyed by column name. Domain types convert to and
//! from rows through serde via the [`Record`] trait and the typed helpers
//! in [`ReaderExt`].
//!
//! Every write can carry [`WriteOptions`]: an expected `version` turns the
//! write into a compare-and-swap on the row's version column, and an oplog
//! wrapper makes the writer append one sealed oplog entry for the write in
//! the same transaction, but only when the write affected a row.

#![deny(unsafe_code)]

use std::sync::Arc;

use async_trait::async_trait;
use gatehouse_errors::{Error, Result};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

pub mod context;
pub mod id;
pub mod kms;
pub mod memory;
pub mod oplog;
pub mod retry;
pub mod schema;

pub use context::Context;
pub use id::new_public_id;
pub use kms::{KeyManager, KeyPurpose, MemoryKms, SealedBlob, Wrapper};
pub use memory::MemoryBackend;
pub use oplog::{Message, Metadata, OpType, OplogEntry, Ticket};
pub use retry::{Backoff, RetryPolicy, do_tx};
pub use schema::TableSchema;

/// A stored row: column name to value.
pub type Row = serde_json::Map<String, Value>;

/// Conjunction of column equality predicates.
///
/// A `null` value matches rows where the column is null or absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((column.into(), value.into()));
        self
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.conditions.iter().all(|(column, value)| schema::column(row, column) == value)
    }
}

/// Oplog settings for a single write.
#[derive(Debug, Clone)]
pub struct OplogOptions {
    pub wrapper: Arc<dyn Wrapper>,
    pub metadata: Metadata,
}

/// Options accepted by [`Writer`] methods.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub oplog: Option<OplogOptions>,
    pub version: Option<u32>,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an oplog entry sealed with `wrapper` when the write affects
    /// at least one row.
    #[must_use]
    pub fn with_oplog(mut self, wrapper: Arc<dyn Wrapper>, metadata: Metadata) -> Self {
        self.oplog = Some(OplogOptions { wrapper, metadata });
        self
    }

    /// Only writes when the stored version equals `version`.
    #[must_use]
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }
}

/// Outcome of a write: the number of rows touched and the oplog messages
/// describing them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Affected {
    pub rows: usize,
    pub messages: Vec<Message>,
}

impl Affected {
    /// Row image of the first touched row.
    pub fn row(&self) -> Option<&Row> {
        self.messages.first().map(|m| &m.row)
    }
}

/// Whether a member must be added to or removed from a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeAction {
    Add,
    Delete,
}

/// One row of a membership delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberChange {
    pub member_id: String,
    pub action: ChangeAction,
}

/// Input of [`Reader::member_changes`].
///
/// Compares the members currently joined to `parent_id` in `table` with
/// `targets`.
#[derive(Debug, Clone, Copy)]
pub struct MemberChangeQuery<'a> {
    pub table: &'a str,
    pub parent_column: &'a str,
    pub parent_id: &'a str,
    pub member_column: &'a str,
    pub targets: &'a [String],
}

/// Read capabilities shared by backends and transactions.
#[async_trait]
pub trait Reader: Send + Sync {
    /// Fetches one row by public id.
    ///
    /// Fails with a `RecordNotFound` error when no row matches.
    async fn lookup_by_public_id(&self, table: &str, public_id: &str) -> Result<Row>;

    /// Returns rows matching `filter` in primary key order. `None` means no
    /// limit.
    async fn search_where(
        &self,
        table: &str,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Result<Vec<Row>>;

    /// Computes the symmetric difference between current membership and
    /// the query targets, deletions first.
    async fn member_changes(&self, query: &MemberChangeQuery<'_>) -> Result<Vec<MemberChange>>;
}

/// Write capabilities of a transaction.
#[async_trait]
pub trait Writer: Send {
    async fn create(&mut self, table: &str, row: Row, opts: WriteOptions) -> Result<Affected>;

    /// Overwrites the `field_mask` columns with the values in `row` and
    /// nulls the `null_fields` columns of the row identified by the primary
    /// key in `row`. Reports 0 rows when the row is missing or its version
    /// differs from `opts.version`.
    ///
    /// On versioned tables the stored version is incremented from its
    /// current value, so masking `version` alone just bumps it.
    async fn update(
        &mut self,
        table: &str,
        row: Row,
        field_mask: &[String],
        null_fields: &[String],
        opts: WriteOptions,
    ) -> Result<Affected>;

    async fn delete(&mut self, table: &str, row: Row, opts: WriteOptions) -> Result<Affected>;

    async fn create_items(&mut self, table: &str, rows: Vec<Row>) -> Result<Affected>;

    /// Deletes every row that exists; missing rows are skipped and not
    /// counted.
    async fn delete_items(&mut self, table: &str, rows: Vec<Row>) -> Result<Affected>;

    async fn get_ticket(&mut self, table: &str) -> Result<Ticket>;

    async fn write_oplog_entry_with(
        &mut self,
        wrapper: &dyn Wrapper,
        ticket: Ticket,
        metadata: Metadata,
        messages: Vec<Message>,
    ) -> Result<()>;
}

/// A unit of work. Dropping it without committing discards its writes.
#[async_trait]
pub trait Transaction: Reader + Writer {
    async fn commit(self) -> Result<()>;

    async fn rollback(self);
}

/// A store that can open transactions and serve reads outside of them.
#[async_trait]
pub trait Backend: Reader + Clone + 'static {
    type Tx: Transaction + 'static;

    async fn begin(&self) -> Result<Self::Tx>;
}

/// A domain type stored as one row of [`Record::TABLE`].
pub trait Record: Serialize + DeserializeOwned + Send {
    const TABLE: &'static str;

    fn to_row(&self) -> Result<Row> {
        match serde_json::to_value(self) {
            Ok(Value::Object(row)) => Ok(row),
            Ok(other) => Err(Error::new(gatehouse_errors::Code::Unknown, "store.to_row")
                .with_msg(format!("{} did not serialize to an object: {other}", Self::TABLE))),
            Err(e) => Err(Error::wrap(e, "store.to_row")),
        }
    }

    fn from_row(row: Row) -> Result<Self> {
        serde_json::from_value(Value::Object(row)).map_err(|e| Error::wrap(e, "store.from_row"))
    }
}

/// Typed reads over any [`Reader`].
#[async_trait]
pub trait ReaderExt: Reader {
    /// Looks up a record, mapping not-found to `None`.
    async fn lookup<T: Record>(&self, public_id: &str) -> Result<Option<T>> {
        match self.lookup_by_public_id(T::TABLE, public_id).await {
            Ok(row) => T::from_row(row).map(Some),
            Err(e) if gatehouse_errors::is(&e, &gatehouse_errors::sentinel::record_not_found()) => {
                Ok(None)
            },
            Err(e) => Err(e),
        }
    }

    async fn search<T: Record>(&self, filter: &Filter, limit: Option<usize>) -> Result<Vec<T>> {
        self.search_where(T::TABLE, filter, limit).await?.into_iter().map(T::from_row).collect()
    }
}

impl<R: Reader + ?Sized> ReaderExt for R {}
