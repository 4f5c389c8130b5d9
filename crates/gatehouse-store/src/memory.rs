//! In-memory storage backend for testing and development

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use gatehouse_errors::{Code, DbError, Error, Result, SqlState, sentinel};
use serde_json::{Value, json};
use tokio::sync::RwLock;

use crate::{
    Affected, Backend, ChangeAction, Filter, MemberChange, MemberChangeQuery, Reader, Row,
    Transaction, WriteOptions, Writer,
    kms::{SealedBlob, Wrapper},
    oplog::{Message, Metadata, OpType, OplogEntry, Ticket},
    schema::{self, OnDelete, TableSchema, column, display_value},
};

/// Raised when an update touches a column that may not change.
const IMMUTABLE_COLUMN: SqlState = SqlState::from_static("23601");

type Key = Vec<String>;
type Schemas = HashMap<&'static str, &'static TableSchema>;

/// Rows removed by one delete statement, in removal order.
type Journal = Vec<(&'static str, Key, Row)>;

/// Table contents plus ticket counters. Transactions work on a private copy.
#[derive(Debug, Clone, Default)]
struct Tables {
    rows: HashMap<String, BTreeMap<Key, Row>>,
    tickets: HashMap<String, u64>,
}

struct MemoryStore {
    state: Tables,
    /// Bumped by every committed write transaction.
    commit_seq: u64,
    oplog: Vec<OplogEntry>,
    injected_failures: u32,
}

/// In-memory store with snapshot transactions and optimistic commits.
///
/// A transaction copies the committed state when it begins. Its commit
/// fails with SQLSTATE 40001 if another write transaction committed in the
/// meantime, which [`crate::do_tx`] treats as retryable.
#[derive(Clone)]
pub struct MemoryBackend {
    data: Arc<RwLock<MemoryStore>>,
    schemas: Arc<Schemas>,
}

impl MemoryBackend {
    /// A backend without tables. Every table access fails as undefined.
    pub fn new() -> Self {
        Self::with_schemas([])
    }

    pub fn with_schemas(schemas: impl IntoIterator<Item = &'static TableSchema>) -> Self {
        let schemas = schemas.into_iter().map(|s| (s.name, s)).collect();
        Self {
            data: Arc::new(RwLock::new(MemoryStore {
                state: Tables::default(),
                commit_seq: 0,
                oplog: Vec::new(),
                injected_failures: 0,
            })),
            schemas: Arc::new(schemas),
        }
    }

    /// Committed oplog entries, oldest first.
    pub async fn oplog_entries(&self) -> Vec<OplogEntry> {
        self.data.read().await.oplog.clone()
    }

    /// Makes the next `count` commits fail with a serialization failure.
    pub async fn inject_commit_failures(&self, count: u32) {
        self.data.write().await.injected_failures = count;
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn now() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
}

fn schema_for(schemas: &Schemas, table: &str, op: &str) -> Result<&'static TableSchema> {
    schemas.get(table).copied().ok_or_else(|| {
        Error::wrap(
            DbError::new(SqlState::UNDEFINED_TABLE, format!("relation \"{table}\" does not exist"))
                .with_table(table),
            op,
        )
    })
}

fn not_null_violation(schema: &TableSchema, col: &str) -> DbError {
    DbError::new(
        SqlState::NOT_NULL_VIOLATION,
        format!(
            "null value in column \"{col}\" of relation \"{}\" violates not-null constraint",
            schema.name
        ),
    )
    .with_table(schema.name)
    .with_column(col)
}

fn key_of(schema: &TableSchema, row: &Row) -> std::result::Result<Key, DbError> {
    schema
        .primary_key
        .iter()
        .map(|col| match column(row, col) {
            Value::Null => Err(not_null_violation(schema, col)),
            value => Ok(display_value(value)),
        })
        .collect()
}

fn key_detail(columns: &[&str], values: &[&Value]) -> String {
    let values: Vec<String> = values.iter().map(|v| display_value(v)).collect();
    format!("Key ({})=({})", columns.join(", "), values.join(", "))
}

fn serialization_failure() -> DbError {
    DbError::new(
        SqlState::SERIALIZATION_FAILURE,
        "could not serialize access due to concurrent update",
    )
}

impl Tables {
    fn lookup(&self, schemas: &Schemas, table: &str, public_id: &str) -> Result<Row> {
        const OP: &str = "store.lookup_by_public_id";
        let schema = schema_for(schemas, table, OP)?;
        let Some(id_column) = schema.public_id else {
            return Err(Error::new(Code::InvalidParameter, OP)
                .with_msg(format!("{table} has no public id")));
        };
        if public_id.is_empty() {
            return Err(Error::new(Code::InvalidParameter, OP).with_msg("missing public id"));
        }

        self.rows
            .get(table)
            .and_then(|rows| {
                rows.values().find(|r| r.get(id_column).and_then(Value::as_str) == Some(public_id))
            })
            .cloned()
            .ok_or_else(|| {
                Error::wrap(sentinel::record_not_found(), OP)
                    .with_msg(format!("{table} {public_id} not found"))
            })
    }

    fn search(
        &self,
        schemas: &Schemas,
        table: &str,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Result<Vec<Row>> {
        schema_for(schemas, table, "store.search_where")?;
        Ok(self
            .rows
            .get(table)
            .into_iter()
            .flat_map(BTreeMap::values)
            .filter(|r| filter.matches(r))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    fn member_changes(
        &self,
        schemas: &Schemas,
        query: &MemberChangeQuery<'_>,
    ) -> Result<Vec<MemberChange>> {
        schema_for(schemas, query.table, "store.member_changes")?;
        let current: BTreeSet<&str> = self
            .rows
            .get(query.table)
            .into_iter()
            .flat_map(BTreeMap::values)
            .filter(|r| r.get(query.parent_column).and_then(Value::as_str) == Some(query.parent_id))
            .filter_map(|r| r.get(query.member_column).and_then(Value::as_str))
            .collect();
        let targets: BTreeSet<&str> = query.targets.iter().map(String::as_str).collect();

        let deletions = current
            .difference(&targets)
            .map(|id| MemberChange { member_id: (*id).to_string(), action: ChangeAction::Delete });
        let additions = targets
            .difference(&current)
            .map(|id| MemberChange { member_id: (*id).to_string(), action: ChangeAction::Add });
        Ok(deletions.chain(additions).collect())
    }

    /// Enforces the table constraints on `row`. `own_key` excludes the row
    /// being updated from uniqueness checks.
    fn validate(
        &self,
        schemas: &Schemas,
        schema: &TableSchema,
        row: &Row,
        own_key: Option<&Key>,
    ) -> std::result::Result<(), DbError> {
        for col in schema.not_null {
            if column(row, col).is_null() {
                return Err(not_null_violation(schema, col));
            }
        }

        for check in schema.checks {
            if !(check.holds)(row) {
                return Err(DbError::new(
                    SqlState::CHECK_VIOLATION,
                    format!(
                        "new row for relation \"{}\" violates check constraint \"{}\"",
                        schema.name, check.name
                    ),
                )
                .with_table(schema.name)
                .with_constraint(check.name));
            }
        }

        let existing = self.rows.get(schema.name);
        for unique in schema.unique {
            let values: Vec<&Value> = unique.columns.iter().map(|c| column(row, c)).collect();
            if values.iter().any(|v| v.is_null()) {
                continue;
            }
            let taken = existing.is_some_and(|rows| {
                rows.iter().any(|(key, other)| {
                    Some(key) != own_key
                        && unique.columns.iter().zip(&values).all(|(c, v)| column(other, c) == *v)
                })
            });
            if taken {
                return Err(DbError::new(
                    SqlState::UNIQUE_VIOLATION,
                    format!("duplicate key value violates unique constraint \"{}\"", unique.name),
                )
                .with_detail(format!("{} already exists.", key_detail(unique.columns, &values)))
                .with_table(schema.name)
                .with_constraint(unique.name));
            }
        }

        for fk in schema.foreign_keys {
            let values: Vec<&Value> = fk.columns.iter().map(|c| column(row, c)).collect();
            if values.iter().any(|v| v.is_null()) {
                continue;
            }
            if !schemas.contains_key(fk.references) {
                return Err(DbError::new(
                    SqlState::UNDEFINED_TABLE,
                    format!("relation \"{}\" does not exist", fk.references),
                )
                .with_table(fk.references));
            }
            let present = self.rows.get(fk.references).is_some_and(|rows| {
                rows.values().any(|target| {
                    fk.referenced_columns.iter().zip(&values).all(|(c, v)| column(target, c) == *v)
                })
            });
            if !present {
                return Err(DbError::new(
                    SqlState::FOREIGN_KEY_VIOLATION,
                    format!(
                        "insert or update on table \"{}\" violates foreign key constraint \"{}\"",
                        schema.name, fk.name
                    ),
                )
                .with_detail(format!(
                    "{} is not present in table \"{}\".",
                    key_detail(fk.columns, &values),
                    fk.references
                ))
                .with_table(schema.name)
                .with_constraint(fk.name));
            }
        }

        Ok(())
    }

    /// Removes the row at `key` and applies the `ON DELETE` rule of every
    /// foreign key referencing it. Each removed row is recorded in `journal`.
    fn remove(
        &mut self,
        schemas: &Schemas,
        schema: &TableSchema,
        key: &Key,
        journal: &mut Journal,
    ) -> std::result::Result<Option<Row>, DbError> {
        let Some(removed) = self.rows.get_mut(schema.name).and_then(|rows| rows.remove(key))
        else {
            return Ok(None);
        };
        journal.push((schema.name, key.clone(), removed.clone()));

        for referencing in schemas.values() {
            for fk in referencing.foreign_keys.iter().filter(|fk| fk.references == schema.name) {
                let values: Vec<&Value> =
                    fk.referenced_columns.iter().map(|c| column(&removed, c)).collect();
                let keys: Vec<Key> = self
                    .rows
                    .get(referencing.name)
                    .into_iter()
                    .flat_map(|rows| rows.iter())
                    .filter(|(_, r)| {
                        fk.columns.iter().zip(&values).all(|(c, v)| column(r, c) == *v)
                    })
                    .map(|(k, _)| k.clone())
                    .collect();
                if keys.is_empty() {
                    continue;
                }
                match fk.on_delete {
                    OnDelete::Restrict => {
                        return Err(DbError::new(
                            SqlState::FOREIGN_KEY_VIOLATION,
                            format!(
                                "update or delete on table \"{}\" violates foreign key \
                                 constraint \"{}\" on table \"{}\"",
                                schema.name, fk.name, referencing.name
                            ),
                        )
                        .with_detail(format!(
                            "{} is still referenced from table \"{}\".",
                            key_detail(fk.referenced_columns, &values),
                            referencing.name
                        ))
                        .with_table(referencing.name)
                        .with_constraint(fk.name));
                    },
                    OnDelete::Cascade => {
                        for k in keys {
                            self.remove(schemas, referencing, &k, journal)?;
                        }
                    },
                }
            }
        }

        Ok(Some(removed))
    }

    /// Puts back the rows a failed statement removed.
    fn restore(&mut self, journal: Journal) {
        for (table, key, row) in journal.into_iter().rev() {
            self.rows.entry(table.to_string()).or_default().insert(key, row);
        }
    }
}

struct PendingEntry {
    ticket: Ticket,
    metadata: Metadata,
    messages: Vec<Message>,
    sealed: SealedBlob,
}

/// A transaction on a [`MemoryBackend`].
pub struct MemoryTx {
    backend: MemoryBackend,
    base_seq: u64,
    state: Tables,
    pending: Vec<PendingEntry>,
    dirty: bool,
}

impl MemoryTx {
    fn schema(&self, table: &str, op: &str) -> Result<&'static TableSchema> {
        schema_for(&self.backend.schemas, table, op)
    }

    fn insert_row(&mut self, table: &str, mut row: Row) -> Result<Message> {
        const OP: &str = "store.create";
        let schema = self.schema(table, OP)?;
        if schema.versioned {
            let now = now();
            row.insert(schema::VERSION.to_string(), json!(1));
            row.insert(schema::CREATE_TIME.to_string(), now.clone());
            row.insert(schema::UPDATE_TIME.to_string(), now);
        }

        let key = key_of(schema, &row).map_err(|e| Error::wrap(e, OP))?;
        if self.state.rows.get(table).is_some_and(|rows| rows.contains_key(&key)) {
            let values: Vec<&Value> = schema.primary_key.iter().map(|c| column(&row, c)).collect();
            let constraint = format!("{table}_pkey");
            let db = DbError::new(
                SqlState::UNIQUE_VIOLATION,
                format!("duplicate key value violates unique constraint \"{constraint}\""),
            )
            .with_detail(format!("{} already exists.", key_detail(schema.primary_key, &values)))
            .with_table(table)
            .with_constraint(constraint);
            return Err(Error::wrap(db, OP));
        }
        self.state
            .validate(&self.backend.schemas, schema, &row, None)
            .map_err(|e| Error::wrap(e, OP))?;

        self.state.rows.entry(table.to_string()).or_default().insert(key, row.clone());
        self.dirty = true;
        Ok(Message::new(table, OpType::Create, row))
    }

    fn remove_row(
        &mut self,
        table: &str,
        row: &Row,
        version: Option<u32>,
        journal: &mut Journal,
    ) -> Result<Option<Message>> {
        const OP: &str = "store.delete";
        let schema = self.schema(table, OP)?;
        let key = key_of(schema, row).map_err(|e| Error::wrap(e, OP))?;
        let Some(existing) = self.state.rows.get(table).and_then(|rows| rows.get(&key)) else {
            return Ok(None);
        };
        let current = column(existing, schema::VERSION).as_u64();
        if version.is_some_and(|v| current != Some(u64::from(v))) {
            return Ok(None);
        }

        let schemas = Arc::clone(&self.backend.schemas);
        let removed =
            self.state.remove(&schemas, schema, &key, journal).map_err(|e| Error::wrap(e, OP))?;
        Ok(removed.map(|row| Message::new(table, OpType::Delete, row)))
    }

    /// Deletes `rows` as one statement. A failure puts back every row the
    /// statement removed, cascades included.
    fn remove_rows(
        &mut self,
        table: &str,
        rows: &[Row],
        version: Option<u32>,
    ) -> Result<Vec<Message>> {
        let mut journal = Journal::new();
        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            match self.remove_row(table, row, version, &mut journal) {
                Ok(Some(message)) => messages.push(message),
                Ok(None) => {},
                Err(e) => {
                    self.state.restore(journal);
                    return Err(e);
                },
            }
        }
        if !messages.is_empty() {
            self.dirty = true;
        }
        Ok(messages)
    }

    fn issue_ticket(&mut self, table: &str) -> Result<Ticket> {
        self.schema(table, "store.get_ticket")?;
        let version = self.state.tickets.entry(table.to_string()).or_insert(0);
        *version += 1;
        self.dirty = true;
        Ok(Ticket { name: table.to_string(), version: *version })
    }

    fn append_entry(
        &mut self,
        wrapper: &dyn Wrapper,
        ticket: Ticket,
        metadata: Metadata,
        messages: Vec<Message>,
    ) -> Result<()> {
        const OP: &str = "store.write_oplog_entry_with";
        if messages.is_empty() {
            return Err(Error::new(Code::InvalidParameter, OP).with_msg("missing messages"));
        }
        if metadata.is_empty() {
            return Err(Error::new(Code::InvalidParameter, OP).with_msg("missing metadata"));
        }
        if self.state.tickets.get(&ticket.name) != Some(&ticket.version) {
            return Err(Error::new(Code::InvalidParameter, OP)
                .with_msg(format!("ticket {} was not issued by this transaction", ticket.name)));
        }

        let payload =
            OplogEntry::payload(&metadata, &messages).map_err(|e| Error::wrap(e, OP))?;
        let sealed = wrapper.seal(&payload)?;
        self.pending.push(PendingEntry { ticket, metadata, messages, sealed });
        self.dirty = true;
        Ok(())
    }

    /// Writes the oplog entry requested through `opts` once a write touched
    /// rows.
    fn finish(
        &mut self,
        table: &str,
        opts: WriteOptions,
        messages: Vec<Message>,
    ) -> Result<Affected> {
        let rows = messages.len();
        if let Some(oplog) = opts.oplog.filter(|_| rows > 0) {
            let ticket = self.issue_ticket(table)?;
            self.append_entry(oplog.wrapper.as_ref(), ticket, oplog.metadata, messages.clone())?;
        }
        Ok(Affected { rows, messages })
    }
}

#[async_trait]
impl Reader for MemoryTx {
    async fn lookup_by_public_id(&self, table: &str, public_id: &str) -> Result<Row> {
        self.state.lookup(&self.backend.schemas, table, public_id)
    }

    async fn search_where(
        &self,
        table: &str,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Result<Vec<Row>> {
        self.state.search(&self.backend.schemas, table, filter, limit)
    }

    async fn member_changes(&self, query: &MemberChangeQuery<'_>) -> Result<Vec<MemberChange>> {
        self.state.member_changes(&self.backend.schemas, query)
    }
}

#[async_trait]
impl Writer for MemoryTx {
    async fn create(&mut self, table: &str, row: Row, opts: WriteOptions) -> Result<Affected> {
        let message = self.insert_row(table, row)?;
        self.finish(table, opts, vec![message])
    }

    async fn update(
        &mut self,
        table: &str,
        row: Row,
        field_mask: &[String],
        null_fields: &[String],
        opts: WriteOptions,
    ) -> Result<Affected> {
        const OP: &str = "store.update";
        let schema = self.schema(table, OP)?;
        if field_mask.is_empty() && null_fields.is_empty() {
            return Err(Error::new(Code::InvalidParameter, OP)
                .with_msg("both field mask and null fields are missing"));
        }
        if let Some(col) = field_mask.iter().chain(null_fields).find(|c| schema.is_immutable(c)) {
            let db = DbError::new(IMMUTABLE_COLUMN, format!("immutable column: {table}.{col}"))
                .with_table(table)
                .with_column(col.as_str());
            return Err(Error::wrap(db, OP));
        }

        let key = key_of(schema, &row).map_err(|e| Error::wrap(e, OP))?;
        let Some(existing) = self.state.rows.get(table).and_then(|rows| rows.get(&key)) else {
            return Ok(Affected::default());
        };
        if opts
            .version
            .is_some_and(|v| column(existing, schema::VERSION).as_u64() != Some(u64::from(v)))
        {
            return Ok(Affected::default());
        }

        let next_version = column(existing, schema::VERSION).as_u64().unwrap_or(0) + 1;
        let mut updated = existing.clone();
        for col in field_mask {
            updated.insert(col.clone(), column(&row, col).clone());
        }
        for col in null_fields {
            updated.insert(col.clone(), Value::Null);
        }
        if schema.versioned {
            updated.insert(schema::VERSION.to_string(), json!(next_version));
            updated.insert(schema::UPDATE_TIME.to_string(), now());
        }
        self.state
            .validate(&self.backend.schemas, schema, &updated, Some(&key))
            .map_err(|e| Error::wrap(e, OP))?;

        self.state.rows.entry(table.to_string()).or_default().insert(key, updated.clone());
        self.dirty = true;

        let mut message = Message::new(table, OpType::Update, updated);
        message.field_mask = field_mask.to_vec();
        message.null_fields = null_fields.to_vec();
        self.finish(table, opts, vec![message])
    }

    async fn delete(&mut self, table: &str, row: Row, opts: WriteOptions) -> Result<Affected> {
        let messages = self.remove_rows(table, std::slice::from_ref(&row), opts.version)?;
        self.finish(table, opts, messages)
    }

    async fn create_items(&mut self, table: &str, rows: Vec<Row>) -> Result<Affected> {
        if rows.is_empty() {
            return Err(Error::new(Code::InvalidParameter, "store.create_items")
                .with_msg("missing items"));
        }
        let messages = rows
            .into_iter()
            .map(|row| self.insert_row(table, row))
            .collect::<Result<Vec<_>>>()?;
        Ok(Affected { rows: messages.len(), messages })
    }

    async fn delete_items(&mut self, table: &str, rows: Vec<Row>) -> Result<Affected> {
        if rows.is_empty() {
            return Err(Error::new(Code::InvalidParameter, "store.delete_items")
                .with_msg("missing items"));
        }
        let messages = self.remove_rows(table, &rows, None)?;
        Ok(Affected { rows: messages.len(), messages })
    }

    async fn get_ticket(&mut self, table: &str) -> Result<Ticket> {
        self.issue_ticket(table)
    }

    async fn write_oplog_entry_with(
        &mut self,
        wrapper: &dyn Wrapper,
        ticket: Ticket,
        metadata: Metadata,
        messages: Vec<Message>,
    ) -> Result<()> {
        self.append_entry(wrapper, ticket, metadata, messages)
    }
}

#[async_trait]
impl Transaction for MemoryTx {
    async fn commit(self) -> Result<()> {
        const OP: &str = "store.commit";
        let mut store = self.backend.data.write().await;

        if store.injected_failures > 0 {
            store.injected_failures -= 1;
            return Err(Error::wrap(serialization_failure(), OP));
        }
        if !self.dirty {
            return Ok(());
        }
        if store.commit_seq != self.base_seq {
            return Err(Error::wrap(serialization_failure(), OP));
        }

        store.state = self.state;
        store.commit_seq += 1;
        let create_time = Utc::now();
        let entries = self.pending.len();
        for pending in self.pending {
            let id = store.oplog.len() as u64 + 1;
            store.oplog.push(OplogEntry {
                id,
                ticket: pending.ticket,
                metadata: pending.metadata,
                messages: pending.messages,
                sealed: pending.sealed,
                create_time,
            });
        }

        tracing::debug!(
            commit_seq = store.commit_seq,
            oplog_entries = entries,
            "Committed transaction"
        );
        Ok(())
    }

    async fn rollback(self) {
        tracing::trace!(base_seq = self.base_seq, "Rolled back transaction");
    }
}

#[async_trait]
impl Reader for MemoryBackend {
    async fn lookup_by_public_id(&self, table: &str, public_id: &str) -> Result<Row> {
        self.data.read().await.state.lookup(&self.schemas, table, public_id)
    }

    async fn search_where(
        &self,
        table: &str,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Result<Vec<Row>> {
        self.data.read().await.state.search(&self.schemas, table, filter, limit)
    }

    async fn member_changes(&self, query: &MemberChangeQuery<'_>) -> Result<Vec<MemberChange>> {
        self.data.read().await.state.member_changes(&self.schemas, query)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx> {
        let store = self.data.read().await;
        Ok(MemoryTx {
            backend: self.clone(),
            base_seq: store.commit_seq,
            state: store.state.clone(),
            pending: Vec::new(),
            dirty: false,
        })
    }
}
