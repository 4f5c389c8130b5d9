//! Host set operations.

use gatehouse_errors::{Code, Error, Result};
use gatehouse_store::{
    Backend, Context, Filter, OpType, ReaderExt, Record, Row, WriteOptions, Writer,
};
use serde_json::json;

use crate::{
    model::{HOST_SET_PREFIX, HostSet, non_empty, set_oplog},
    options::Options,
    repository::{Repository, at_most_one, classify, resolve_public_id, returned},
    schema::HOST_SET_TABLE,
};

impl<B: Backend> Repository<B> {
    /// Create an empty host set in a catalog.
    ///
    /// # Errors
    ///
    /// Returns `MissingCatalogId`, `InvalidParameter` or `MissingScopeId`
    /// before touching the store, and `NotUnique` when the name is taken
    /// within the catalog.
    pub async fn create_set(
        &self,
        ctx: &Context,
        scope_id: &str,
        set: HostSet,
        opts: Options,
    ) -> Result<HostSet> {
        const OP: &str = "host.create_set";
        if set.catalog_id.is_empty() {
            return Err(Error::new(Code::MissingCatalogId, OP).with_msg("no catalog id"));
        }
        if !set.public_id.is_empty() {
            return Err(Error::new(Code::InvalidParameter, OP).with_msg("public id not empty"));
        }
        if scope_id.is_empty() {
            return Err(Error::new(Code::MissingScopeId, OP).with_msg("no scope id"));
        }

        let mut set = set;
        set.public_id = resolve_public_id(HOST_SET_PREFIX, opts.public_id, OP)?;
        set.name = non_empty(set.name);
        set.description = non_empty(set.description);

        let row = set.to_row()?;
        let metadata = set_oplog(&set.public_id, OpType::Create, scope_id);
        let sealer = self.sealer(ctx, scope_id);
        let created = self
            .transact(ctx, OP, |tx| {
                let (row, metadata, sealer) = (row.clone(), metadata.clone(), sealer.clone());
                Box::pin(async move {
                    let wrapper = sealer.wrapper(OP).await?;
                    let affected = tx
                        .create(
                            HOST_SET_TABLE,
                            row,
                            WriteOptions::new().with_oplog(wrapper, metadata),
                        )
                        .await?;
                    returned::<HostSet>(&affected, OP)
                })
            })
            .await
            .map_err(|e| {
                let name = set.name.as_deref().unwrap_or_default();
                classify(e, OP, format!("catalog: {}: {name:?}", set.catalog_id))
            })?;

        tracing::debug!(
            set_id = %created.public_id,
            catalog_id = %created.catalog_id,
            "Created host set"
        );
        Ok(created)
    }

    /// Look up a host set by public id. Returns `None` if it does not exist.
    pub async fn lookup_set(&self, ctx: &Context, public_id: &str) -> Result<Option<HostSet>> {
        const OP: &str = "host.lookup_set";
        if public_id.is_empty() {
            return Err(Error::new(Code::MissingPublicId, OP).with_msg("missing public id"));
        }
        ctx.check(OP)?;

        self.backend
            .lookup::<HostSet>(public_id)
            .await
            .map_err(|e| classify(e, OP, format!("lookup failed for {public_id}")))
    }

    pub async fn list_sets(
        &self,
        ctx: &Context,
        catalog_id: &str,
        opts: Options,
    ) -> Result<Vec<HostSet>> {
        const OP: &str = "host.list_sets";
        if catalog_id.is_empty() {
            return Err(Error::new(Code::MissingCatalogId, OP).with_msg("missing catalog id"));
        }
        ctx.check(OP)?;

        let limit = opts.resolve_limit(self.default_limit);
        self.backend
            .search::<HostSet>(&Filter::new().eq("catalog_id", catalog_id), limit)
            .await
            .map_err(|e| classify(e, OP, format!("catalog: {catalog_id}")))
    }

    /// Delete a host set and its memberships. Returns `0` when the set does
    /// not exist.
    pub async fn delete_set(
        &self,
        ctx: &Context,
        scope_id: &str,
        public_id: &str,
    ) -> Result<usize> {
        const OP: &str = "host.delete_set";
        if public_id.is_empty() {
            return Err(Error::new(Code::MissingPublicId, OP).with_msg("missing public id"));
        }
        if scope_id.is_empty() {
            return Err(Error::new(Code::MissingScopeId, OP).with_msg("missing scope id"));
        }

        let mut row = Row::new();
        row.insert("public_id".to_string(), json!(public_id));
        let metadata = set_oplog(public_id, OpType::Delete, scope_id);
        let sealer = self.sealer(ctx, scope_id);
        let rows = self
            .transact(ctx, OP, |tx| {
                let (row, metadata, sealer) = (row.clone(), metadata.clone(), sealer.clone());
                Box::pin(async move {
                    let wrapper = sealer.wrapper(OP).await?;
                    let affected = tx
                        .delete(
                            HOST_SET_TABLE,
                            row,
                            WriteOptions::new().with_oplog(wrapper, metadata),
                        )
                        .await?;
                    at_most_one(affected.rows, OP, "deleted")?;
                    Ok(affected.rows)
                })
            })
            .await
            .map_err(|e| classify(e, OP, format!("delete failed for {public_id}")))?;

        tracing::debug!(set_id = %public_id, rows, "Deleted host set");
        Ok(rows)
    }
}
