//! Host catalog operations.

use gatehouse_errors::{Code, Error, Result};
use gatehouse_store::{Backend, Context, Filter, OpType, ReaderExt, Record, WriteOptions, Writer};

use crate::{
    model::{HOST_CATALOG_PREFIX, HostCatalog, non_empty},
    options::Options,
    repository::{Repository, at_most_one, classify, resolve_public_id, returned, update_paths},
    schema::HOST_CATALOG_TABLE,
};

impl<B: Backend> Repository<B> {
    /// Create a host catalog in the catalog's scope.
    ///
    /// The public id is generated unless `opts` carries one. Empty names and
    /// descriptions are stored as null.
    ///
    /// # Errors
    ///
    /// Returns `MissingScopeId` without a scope, `InvalidParameter` when the
    /// catalog already has a public id or the passed-in id has the wrong
    /// prefix, and `NotUnique` when the name is taken within the scope.
    pub async fn create_catalog(
        &self,
        ctx: &Context,
        catalog: HostCatalog,
        opts: Options,
    ) -> Result<HostCatalog> {
        const OP: &str = "host.create_catalog";
        if catalog.scope_id.is_empty() {
            return Err(Error::new(Code::MissingScopeId, OP).with_msg("no scope id"));
        }
        if !catalog.public_id.is_empty() {
            return Err(Error::new(Code::InvalidParameter, OP).with_msg("public id not empty"));
        }

        let mut catalog = catalog;
        catalog.public_id = resolve_public_id(HOST_CATALOG_PREFIX, opts.public_id, OP)?;
        catalog.name = non_empty(catalog.name);
        catalog.description = non_empty(catalog.description);

        let row = catalog.to_row()?;
        let metadata = catalog.oplog(OpType::Create);
        let sealer = self.sealer(ctx, &catalog.scope_id);
        let created = self
            .transact(ctx, OP, |tx| {
                let (row, metadata, sealer) = (row.clone(), metadata.clone(), sealer.clone());
                Box::pin(async move {
                    let wrapper = sealer.wrapper(OP).await?;
                    let affected = tx
                        .create(
                            HOST_CATALOG_TABLE,
                            row,
                            WriteOptions::new().with_oplog(wrapper, metadata),
                        )
                        .await?;
                    returned::<HostCatalog>(&affected, OP)
                })
            })
            .await
            .map_err(|e| classify(e, OP, format!("scope: {}", catalog.scope_id)))?;

        tracing::debug!(
            catalog_id = %created.public_id,
            scope_id = %created.scope_id,
            "Created host catalog"
        );
        Ok(created)
    }

    /// Update the masked attributes of a catalog holding `version`.
    ///
    /// `field_mask` names attributes case-insensitively out of `name` and
    /// `description`; a masked attribute left empty is set to null.
    ///
    /// # Returns
    ///
    /// The updated catalog and the number of rows changed. `(None, 0)` means
    /// the catalog is gone or its version is no longer `version`.
    ///
    /// # Errors
    ///
    /// Returns `MissingPublicId`, `MissingScopeId`, `MissingVersion`,
    /// `EmptyFieldMask` or `InvalidFieldMask` before touching the store.
    pub async fn update_catalog(
        &self,
        ctx: &Context,
        catalog: HostCatalog,
        version: u32,
        field_mask: &[String],
    ) -> Result<(Option<HostCatalog>, usize)> {
        const OP: &str = "host.update_catalog";
        if catalog.public_id.is_empty() {
            return Err(Error::new(Code::MissingPublicId, OP).with_msg("missing public id"));
        }
        if catalog.scope_id.is_empty() {
            return Err(Error::new(Code::MissingScopeId, OP).with_msg("missing scope id"));
        }
        if version == 0 {
            return Err(Error::new(Code::MissingVersion, OP).with_msg("missing version"));
        }
        if field_mask.is_empty() {
            return Err(Error::new(Code::EmptyFieldMask, OP).with_msg("empty field mask"));
        }

        let mut catalog = catalog;
        catalog.name = non_empty(catalog.name);
        catalog.description = non_empty(catalog.description);
        let paths = update_paths(
            field_mask,
            &[("name", catalog.name.is_some()), ("description", catalog.description.is_some())],
            OP,
        )?;

        let row = catalog.to_row()?;
        let metadata = catalog.oplog(OpType::Update);
        let sealer = self.sealer(ctx, &catalog.scope_id);
        let (updated, rows) = self
            .transact(ctx, OP, |tx| {
                let (row, metadata, sealer, paths) =
                    (row.clone(), metadata.clone(), sealer.clone(), paths.clone());
                Box::pin(async move {
                    let wrapper = sealer.wrapper(OP).await?;
                    let affected = tx
                        .update(
                            HOST_CATALOG_TABLE,
                            row,
                            &paths.field_mask,
                            &paths.null_fields,
                            WriteOptions::new().with_version(version).with_oplog(wrapper, metadata),
                        )
                        .await?;
                    at_most_one(affected.rows, OP, "updated")?;
                    match affected.rows {
                        0 => Ok((None, 0)),
                        rows => Ok((Some(returned::<HostCatalog>(&affected, OP)?), rows)),
                    }
                })
            })
            .await
            .map_err(|e| classify(e, OP, format!("static host catalog: {}", catalog.public_id)))?;

        tracing::debug!(catalog_id = %catalog.public_id, version, rows, "Updated host catalog");
        Ok((updated, rows))
    }

    /// Look up a catalog by public id.
    ///
    /// # Returns
    ///
    /// Returns `None` if the catalog does not exist.
    pub async fn lookup_catalog(
        &self,
        ctx: &Context,
        public_id: &str,
    ) -> Result<Option<HostCatalog>> {
        const OP: &str = "host.lookup_catalog";
        if public_id.is_empty() {
            return Err(Error::new(Code::MissingPublicId, OP).with_msg("missing public id"));
        }
        ctx.check(OP)?;

        self.backend
            .lookup::<HostCatalog>(public_id)
            .await
            .map_err(|e| classify(e, OP, format!("lookup failed for {public_id}")))
    }

    /// List the catalogs of a scope, honoring the limit in `opts`.
    pub async fn list_catalogs(
        &self,
        ctx: &Context,
        scope_id: &str,
        opts: Options,
    ) -> Result<Vec<HostCatalog>> {
        const OP: &str = "host.list_catalogs";
        if scope_id.is_empty() {
            return Err(Error::new(Code::MissingScopeId, OP).with_msg("missing scope id"));
        }
        ctx.check(OP)?;

        let limit = opts.resolve_limit(self.default_limit);
        self.backend
            .search::<HostCatalog>(&Filter::new().eq("scope_id", scope_id), limit)
            .await
            .map_err(|e| classify(e, OP, format!("scope: {scope_id}")))
    }

    /// Delete a catalog together with its hosts, sets and memberships.
    ///
    /// # Returns
    ///
    /// The number of catalogs deleted, `0` when none exists.
    pub async fn delete_catalog(&self, ctx: &Context, public_id: &str) -> Result<usize> {
        const OP: &str = "host.delete_catalog";
        if public_id.is_empty() {
            return Err(Error::new(Code::MissingPublicId, OP).with_msg("missing public id"));
        }

        let Some(catalog) = self.lookup_catalog(ctx, public_id).await? else {
            return Ok(0);
        };

        let row = catalog.to_row()?;
        let metadata = catalog.oplog(OpType::Delete);
        let sealer = self.sealer(ctx, &catalog.scope_id);
        let rows = self
            .transact(ctx, OP, |tx| {
                let (row, metadata, sealer) = (row.clone(), metadata.clone(), sealer.clone());
                Box::pin(async move {
                    let wrapper = sealer.wrapper(OP).await?;
                    let affected = tx
                        .delete(
                            HOST_CATALOG_TABLE,
                            row,
                            WriteOptions::new().with_oplog(wrapper, metadata),
                        )
                        .await?;
                    at_most_one(affected.rows, OP, "deleted")?;
                    Ok(affected.rows)
                })
            })
            .await
            .map_err(|e| classify(e, OP, format!("failed to delete {public_id}")))?;

        tracing::debug!(catalog_id = %public_id, rows, "Deleted host catalog");
        Ok(rows)
    }
}
