//! Repository handle and the helpers shared by its operations.

use std::{collections::BTreeSet, sync::Arc};

use futures::future::BoxFuture;
use gatehouse_errors::{Code, Error, Result, convert};
use gatehouse_store::{
    Affected, Backend, Context, KeyManager, KeyPurpose, Record, RetryPolicy, Wrapper, do_tx, id,
    new_public_id,
};

/// Rows returned by list operations when the caller sets no limit.
pub const DEFAULT_LIMIT: i64 = 10_000;

/// Repository of static host catalogs, hosts, host sets and set members.
///
/// Every mutation runs in a managed transaction that also appends one oplog
/// entry sealed with the oplog wrapper of the owning scope.
///
/// # Type Parameters
///
/// * `B` - A [`Backend`] holding the static host tables.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use gatehouse_host::{HostCatalog, Options, Repository, schema};
/// use gatehouse_store::{Context, MemoryKms};
///
/// let repo = Repository::new(schema::memory_backend(), Arc::new(MemoryKms::new()));
/// let catalog = repo
///     .create_catalog(&Context::background(), HostCatalog::new("o_1234567890"), Options::new())
///     .await?;
/// ```
#[derive(Clone)]
pub struct Repository<B: Backend> {
    pub(crate) backend: B,
    pub(crate) kms: Arc<dyn KeyManager>,
    pub(crate) retry: RetryPolicy,
    pub(crate) default_limit: i64,
}

impl<B: Backend> Repository<B> {
    /// Create a repository over `backend`, sealing oplog entries with keys
    /// from `kms`.
    pub fn new(backend: B, kms: Arc<dyn KeyManager>) -> Self {
        Self { backend, kms, retry: RetryPolicy::default(), default_limit: DEFAULT_LIMIT }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the list limit used when a call does not pass one. A negative
    /// value means unlimited.
    #[must_use]
    pub fn with_default_limit(mut self, limit: i64) -> Self {
        self.default_limit = limit;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub(crate) fn sealer(&self, ctx: &Context, scope_id: &str) -> Sealer {
        Sealer { kms: Arc::clone(&self.kms), ctx: ctx.clone(), scope_id: scope_id.to_string() }
    }

    /// Runs `body` in a managed transaction with the repository retry
    /// policy.
    pub(crate) async fn transact<T, F>(&self, ctx: &Context, op: &str, body: F) -> Result<T>
    where
        T: Send,
        F: for<'t> FnMut(&'t mut B::Tx) -> BoxFuture<'t, Result<T>> + Send,
    {
        let (value, retries) = do_tx(&self.backend, ctx, &self.retry, body).await?;
        if retries > 0 {
            tracing::debug!(op, retries, "Transaction committed after retries");
        }
        Ok(value)
    }
}

impl<B: Backend> std::fmt::Debug for Repository<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("retry", &self.retry)
            .field("default_limit", &self.default_limit)
            .finish_non_exhaustive()
    }
}

/// Resolves the oplog wrapper of one scope from inside a transaction body.
#[derive(Clone)]
pub(crate) struct Sealer {
    kms: Arc<dyn KeyManager>,
    ctx: Context,
    scope_id: String,
}

impl Sealer {
    pub(crate) async fn wrapper(&self, op: &str) -> Result<Arc<dyn Wrapper>> {
        self.kms
            .get_wrapper(&self.ctx, &self.scope_id, KeyPurpose::Oplog)
            .await
            .map_err(|e| Error::wrap(e, op).with_msg("unable to get oplog wrapper"))
    }
}

/// Classifies a failure of operation `op`.
///
/// Store constraint violations become their domain code. Anything else is
/// wrapped with `context`, keeping the code of a domain error.
pub(crate) fn classify(err: Error, op: &str, context: impl Into<String>) -> Error {
    match convert(&err, op) {
        Some(converted) => converted,
        None => Error::wrap(err, op).with_msg(context),
    }
}

/// Returns the caller supplied public id after checking its prefix, or a
/// freshly generated one.
pub(crate) fn resolve_public_id(
    prefix: &str,
    requested: Option<String>,
    op: &str,
) -> Result<String> {
    match requested {
        Some(public_id) if id::has_prefix(&public_id, prefix) => Ok(public_id),
        Some(public_id) => Err(Error::new(Code::InvalidParameter, op).with_msg(format!(
            "passed-in public ID {public_id:?} has wrong prefix, should be {prefix:?}"
        ))),
        None => new_public_id(prefix).map_err(|e| Error::wrap(e, op)),
    }
}

/// Decodes the row image of the first row touched by a write.
pub(crate) fn returned<T: Record>(affected: &Affected, op: &str) -> Result<T> {
    let row = affected
        .row()
        .cloned()
        .ok_or_else(|| Error::new(Code::Unknown, op).with_msg("write returned no row"))?;
    T::from_row(row)
}

/// Fails with `MultipleRecords` when a single-row write touched more rows.
pub(crate) fn at_most_one(rows: usize, op: &str, action: &str) -> Result<()> {
    if rows > 1 {
        return Err(Error::new(Code::MultipleRecords, op)
            .with_msg(format!("more than 1 resource would have been {action}")));
    }
    Ok(())
}

/// Columns selected by a field mask, split into overwrites and nulls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct UpdatePaths {
    pub(crate) field_mask: Vec<String>,
    pub(crate) null_fields: Vec<String>,
}

impl UpdatePaths {
    pub(crate) fn contains(&self, column: &str) -> bool {
        self.field_mask.iter().chain(&self.null_fields).any(|c| c == column)
    }
}

/// Maps a caller field mask onto the updatable columns of an entity.
///
/// `columns` lists every updatable column with whether the entity holds a
/// value for it. Mask entries match column names case-insensitively and may
/// repeat. A selected column without a value is nulled.
///
/// # Errors
///
/// Returns `InvalidFieldMask` for a name outside `columns` and
/// `EmptyFieldMask` when the mask selects nothing.
pub(crate) fn update_paths(
    requested: &[String],
    columns: &[(&'static str, bool)],
    op: &str,
) -> Result<UpdatePaths> {
    let mut selected = BTreeSet::new();
    for field in requested {
        let Some(index) = columns.iter().position(|(c, _)| c.eq_ignore_ascii_case(field)) else {
            return Err(Error::new(Code::InvalidFieldMask, op)
                .with_msg(format!("invalid field mask: {field}")));
        };
        selected.insert(index);
    }

    let mut paths = UpdatePaths::default();
    for index in selected {
        let (column, has_value) = columns[index];
        if has_value {
            paths.field_mask.push(column.to_string());
        } else {
            paths.null_fields.push(column.to_string());
        }
    }
    if paths.field_mask.is_empty() && paths.null_fields.is_empty() {
        return Err(Error::new(Code::EmptyFieldMask, op).with_msg("empty field mask"));
    }
    Ok(paths)
}
