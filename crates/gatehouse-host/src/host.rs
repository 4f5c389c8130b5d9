//! Static host operations.

use gatehouse_errors::{Code, Error, Result};
use gatehouse_store::{
    Backend, Context, Filter, OpType, ReaderExt, Record, Row, WriteOptions, Writer,
};
use serde_json::json;

use crate::{
    model::{HOST_PREFIX, Host, MAX_HOST_ADDRESS_LENGTH, MIN_HOST_ADDRESS_LENGTH, non_empty},
    options::Options,
    repository::{Repository, at_most_one, classify, resolve_public_id, returned, update_paths},
    schema::HOST_TABLE,
};

fn validate_address(address: &str, op: &str) -> Result<()> {
    if !(MIN_HOST_ADDRESS_LENGTH..=MAX_HOST_ADDRESS_LENGTH).contains(&address.len()) {
        return Err(Error::new(Code::InvalidAddress, op).with_msg(format!(
            "address must be between {MIN_HOST_ADDRESS_LENGTH} and \
             {MAX_HOST_ADDRESS_LENGTH} characters"
        )));
    }
    Ok(())
}

impl<B: Backend> Repository<B> {
    /// Create a host in its catalog.
    ///
    /// The address is trimmed before it is validated and stored.
    ///
    /// # Arguments
    ///
    /// * `scope_id` - Scope of the catalog, selects the oplog key.
    /// * `host` - The host to create. Its `public_id` must be empty.
    /// * `opts` - May carry a `hst_` public id to use.
    ///
    /// # Errors
    ///
    /// Returns `MissingCatalogId`, `InvalidParameter`, `MissingScopeId` or
    /// `InvalidAddress` before touching the store, and `NotUnique` when the
    /// name is taken within the catalog.
    pub async fn create_host(
        &self,
        ctx: &Context,
        scope_id: &str,
        host: Host,
        opts: Options,
    ) -> Result<Host> {
        const OP: &str = "host.create_host";
        if host.catalog_id.is_empty() {
            return Err(Error::new(Code::MissingCatalogId, OP).with_msg("no catalog id"));
        }
        if !host.public_id.is_empty() {
            return Err(Error::new(Code::InvalidParameter, OP).with_msg("public id not empty"));
        }
        if scope_id.is_empty() {
            return Err(Error::new(Code::MissingScopeId, OP).with_msg("no scope id"));
        }

        let mut host = host;
        host.address = host.address.trim().to_string();
        validate_address(&host.address, OP)?;
        host.public_id = resolve_public_id(HOST_PREFIX, opts.public_id, OP)?;
        host.name = non_empty(host.name);
        host.description = non_empty(host.description);

        let row = host.to_row()?;
        let metadata = host.oplog(OpType::Create, scope_id);
        let sealer = self.sealer(ctx, scope_id);
        let created = self
            .transact(ctx, OP, |tx| {
                let (row, metadata, sealer) = (row.clone(), metadata.clone(), sealer.clone());
                Box::pin(async move {
                    let wrapper = sealer.wrapper(OP).await?;
                    let affected = tx
                        .create(HOST_TABLE, row, WriteOptions::new().with_oplog(wrapper, metadata))
                        .await?;
                    returned::<Host>(&affected, OP)
                })
            })
            .await
            .map_err(|e| {
                let name = host.name.as_deref().unwrap_or_default();
                classify(e, OP, format!("catalog: {}: {name:?}", host.catalog_id))
            })?;

        tracing::debug!(
            host_id = %created.public_id,
            catalog_id = %created.catalog_id,
            "Created host"
        );
        Ok(created)
    }

    /// Update the masked attributes of a host holding `version`.
    ///
    /// `field_mask` names attributes case-insensitively out of `name`,
    /// `description` and `address`. A masked address is trimmed and must be
    /// valid; masked name or description left empty are set to null.
    ///
    /// # Returns
    ///
    /// The updated host and the number of rows changed. `(None, 0)` means
    /// the host is gone or its version is no longer `version`.
    pub async fn update_host(
        &self,
        ctx: &Context,
        scope_id: &str,
        host: Host,
        version: u32,
        field_mask: &[String],
    ) -> Result<(Option<Host>, usize)> {
        const OP: &str = "host.update_host";
        if host.public_id.is_empty() {
            return Err(Error::new(Code::MissingPublicId, OP).with_msg("missing public id"));
        }
        if version == 0 {
            return Err(Error::new(Code::MissingVersion, OP).with_msg("missing version"));
        }
        if scope_id.is_empty() {
            return Err(Error::new(Code::MissingScopeId, OP).with_msg("missing scope id"));
        }

        let mut host = host;
        host.address = host.address.trim().to_string();
        host.name = non_empty(host.name);
        host.description = non_empty(host.description);
        let paths = update_paths(
            field_mask,
            &[
                ("name", host.name.is_some()),
                ("description", host.description.is_some()),
                ("address", !host.address.is_empty()),
            ],
            OP,
        )?;
        if paths.contains("address") {
            validate_address(&host.address, OP)?;
        }

        let row = host.to_row()?;
        let metadata = host.oplog(OpType::Update, scope_id);
        let sealer = self.sealer(ctx, scope_id);
        let (updated, rows) = self
            .transact(ctx, OP, |tx| {
                let (row, metadata, sealer, paths) =
                    (row.clone(), metadata.clone(), sealer.clone(), paths.clone());
                Box::pin(async move {
                    let wrapper = sealer.wrapper(OP).await?;
                    let affected = tx
                        .update(
                            HOST_TABLE,
                            row,
                            &paths.field_mask,
                            &paths.null_fields,
                            WriteOptions::new().with_version(version).with_oplog(wrapper, metadata),
                        )
                        .await?;
                    at_most_one(affected.rows, OP, "updated")?;
                    match affected.rows {
                        0 => Ok((None, 0)),
                        rows => Ok((Some(returned::<Host>(&affected, OP)?), rows)),
                    }
                })
            })
            .await
            .map_err(|e| classify(e, OP, format!("static host: {}", host.public_id)))?;

        tracing::debug!(host_id = %host.public_id, version, rows, "Updated host");
        Ok((updated, rows))
    }

    /// Look up a host by public id. Returns `None` if it does not exist.
    pub async fn lookup_host(&self, ctx: &Context, public_id: &str) -> Result<Option<Host>> {
        const OP: &str = "host.lookup_host";
        if public_id.is_empty() {
            return Err(Error::new(Code::MissingPublicId, OP).with_msg("missing public id"));
        }
        ctx.check(OP)?;

        self.backend
            .lookup::<Host>(public_id)
            .await
            .map_err(|e| classify(e, OP, format!("lookup failed for {public_id}")))
    }

    /// List the hosts of a catalog, honoring the limit in `opts`.
    pub async fn list_hosts(
        &self,
        ctx: &Context,
        catalog_id: &str,
        opts: Options,
    ) -> Result<Vec<Host>> {
        const OP: &str = "host.list_hosts";
        if catalog_id.is_empty() {
            return Err(Error::new(Code::MissingCatalogId, OP).with_msg("missing catalog id"));
        }
        ctx.check(OP)?;

        let limit = opts.resolve_limit(self.default_limit);
        self.backend
            .search::<Host>(&Filter::new().eq("catalog_id", catalog_id), limit)
            .await
            .map_err(|e| classify(e, OP, format!("catalog: {catalog_id}")))
    }

    /// Delete a host and its set memberships.
    ///
    /// # Returns
    ///
    /// The number of hosts deleted, `0` when none exists.
    pub async fn delete_host(
        &self,
        ctx: &Context,
        scope_id: &str,
        public_id: &str,
    ) -> Result<usize> {
        const OP: &str = "host.delete_host";
        if public_id.is_empty() {
            return Err(Error::new(Code::MissingPublicId, OP).with_msg("missing public id"));
        }
        if scope_id.is_empty() {
            return Err(Error::new(Code::MissingScopeId, OP).with_msg("missing scope id"));
        }

        let mut row = Row::new();
        row.insert("public_id".to_string(), json!(public_id));
        let metadata = Host { public_id: public_id.to_string(), ..Host::default() }
            .oplog(OpType::Delete, scope_id);
        let sealer = self.sealer(ctx, scope_id);
        let rows = self
            .transact(ctx, OP, |tx| {
                let (row, metadata, sealer) = (row.clone(), metadata.clone(), sealer.clone());
                Box::pin(async move {
                    let wrapper = sealer.wrapper(OP).await?;
                    let affected = tx
                        .delete(HOST_TABLE, row, WriteOptions::new().with_oplog(wrapper, metadata))
                        .await?;
                    at_most_one(affected.rows, OP, "deleted")?;
                    Ok(affected.rows)
                })
            })
            .await
            .map_err(|e| classify(e, OP, format!("delete failed for {public_id}")))?;

        tracing::debug!(host_id = %public_id, rows, "Deleted host");
        Ok(rows)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::sync::Arc;

    use gatehouse_errors::{Template, chain, matches};
    use gatehouse_store::{MemoryBackend, MemoryKms};

    use super::*;
    use crate::{model::HostCatalog, schema};

    const SCOPE: &str = "o_1234567890";

    async fn create_repo() -> (Repository<MemoryBackend>, HostCatalog) {
        let repo = Repository::new(schema::memory_backend(), Arc::new(MemoryKms::new()));
        let catalog = repo
            .create_catalog(&Context::background(), HostCatalog::new(SCOPE), Options::new())
            .await
            .unwrap();
        (repo, catalog)
    }

    fn mask(fields: &[&str]) -> Vec<String> {
        fields.iter().map(ToString::to_string).collect()
    }

    // =========================================================================
    // CREATE
    // =========================================================================

    #[tokio::test]
    async fn test_create_host_trims_address() {
        let (repo, catalog) = create_repo().await;

        let host = repo
            .create_host(
                &Context::background(),
                SCOPE,
                Host::new(&catalog.public_id, "  10.0.0.1 ").with_name("web"),
                Options::new(),
            )
            .await
            .unwrap();

        assert!(host.public_id.starts_with("hst_"));
        assert_eq!(host.address, "10.0.0.1");
        assert_eq!(host.version, 1);

        let entries = repo.backend().oplog_entries().await;
        let last = entries.last().unwrap();
        assert_eq!(last.metadata.get("resource-type").unwrap(), ["static host"]);
        assert_eq!(last.metadata.get("scope-id").unwrap(), [SCOPE]);
    }

    #[tokio::test]
    async fn test_create_host_validation() {
        let (repo, catalog) = create_repo().await;
        let ctx = Context::background();

        let err = repo
            .create_host(&ctx, SCOPE, Host::new("", "10.0.0.1"), Options::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::MissingCatalogId);

        let err = repo
            .create_host(&ctx, "", Host::new(&catalog.public_id, "10.0.0.1"), Options::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::MissingScopeId);

        let long = "a".repeat(256);
        for address in ["", "  ab  ", long.as_str()] {
            let err = repo
                .create_host(&ctx, SCOPE, Host::new(&catalog.public_id, address), Options::new())
                .await
                .unwrap_err();
            assert_eq!(err.code(), Code::InvalidAddress, "{address:?}");
        }

        let err = repo
            .create_host(
                &ctx,
                SCOPE,
                Host::new(&catalog.public_id, "10.0.0.1"),
                Options::new().with_public_id("hsst_abcdefghij"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidParameter);

        assert!(
            repo.list_hosts(&ctx, &catalog.public_id, Options::new()).await.unwrap().is_empty()
        );
    }

    #[tokio::test]
    async fn test_create_host_unknown_catalog() {
        let (repo, _) = create_repo().await;

        let err = repo
            .create_host(
                &Context::background(),
                SCOPE,
                Host::new("hcst_abcdefghij", "10.0.0.1"),
                Options::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.code(), Code::NotSpecificIntegrity);
    }

    #[tokio::test]
    async fn test_create_host_duplicate_name() {
        let (repo, catalog) = create_repo().await;
        let ctx = Context::background();
        let host = Host::new(&catalog.public_id, "10.0.0.1").with_name("web");
        repo.create_host(&ctx, SCOPE, host.clone(), Options::new()).await.unwrap();

        let err = repo.create_host(&ctx, SCOPE, host, Options::new()).await.unwrap_err();

        assert!(matches(&Template::code(Code::NotUnique), &err));
        assert!(err.msg().contains("already exists"), "{}", err.msg());
    }

    #[tokio::test]
    async fn test_create_host_failure_names_catalog_and_host() {
        let kms = Arc::new(MemoryKms::new());
        let repo = Repository::new(schema::memory_backend(), Arc::clone(&kms) as _);
        let ctx = Context::background();
        let catalog =
            repo.create_catalog(&ctx, HostCatalog::new(SCOPE), Options::new()).await.unwrap();
        kms.revoke(SCOPE).await;

        let host = Host::new(&catalog.public_id, "10.0.0.1").with_name("web");
        let err = repo.create_host(&ctx, SCOPE, host, Options::new()).await.unwrap_err();

        assert_eq!(err.code(), Code::Unknown);
        assert_eq!(err.msg(), format!("catalog: {}: \"web\"", catalog.public_id));
        assert!(chain(&err).any(|e| e.to_string().contains("unable to get oplog wrapper")));
        let hosts = repo.list_hosts(&ctx, &catalog.public_id, Options::new()).await;
        assert!(hosts.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_host_address_length_counts_bytes() {
        let (repo, catalog) = create_repo().await;
        let ctx = Context::background();
        // 128 two-byte characters: within the bound as chars, over it as bytes.
        let wide = "é".repeat(128);
        assert!(wide.chars().count() <= MAX_HOST_ADDRESS_LENGTH);

        let err = repo
            .create_host(&ctx, SCOPE, Host::new(&catalog.public_id, wide), Options::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidAddress);

        let narrow = "é".repeat(127);
        let host = repo
            .create_host(&ctx, SCOPE, Host::new(&catalog.public_id, narrow.clone()), Options::new())
            .await
            .unwrap();
        assert_eq!(host.address, narrow);
    }

    // =========================================================================
    // UPDATE
    // =========================================================================

    #[tokio::test]
    async fn test_update_host_address() {
        let (repo, catalog) = create_repo().await;
        let ctx = Context::background();
        let mut host = repo
            .create_host(&ctx, SCOPE, Host::new(&catalog.public_id, "10.0.0.1"), Options::new())
            .await
            .unwrap();

        host.address = " 10.0.0.2 ".to_string();
        let (updated, rows) =
            repo.update_host(&ctx, SCOPE, host, 1, &mask(&["Address"])).await.unwrap();

        let updated = updated.unwrap();
        assert_eq!(rows, 1);
        assert_eq!(updated.address, "10.0.0.2");
        assert_eq!(updated.version, 2);
    }

    #[tokio::test]
    async fn test_update_host_rejects_empty_address() {
        let (repo, catalog) = create_repo().await;
        let ctx = Context::background();
        let mut host = repo
            .create_host(&ctx, SCOPE, Host::new(&catalog.public_id, "10.0.0.1"), Options::new())
            .await
            .unwrap();

        host.address = "  ".to_string();
        let err = repo.update_host(&ctx, SCOPE, host, 1, &mask(&["address"])).await.unwrap_err();

        assert_eq!(err.code(), Code::InvalidAddress);
    }

    #[tokio::test]
    async fn test_update_host_stale_version() {
        let (repo, catalog) = create_repo().await;
        let ctx = Context::background();
        let host = repo
            .create_host(&ctx, SCOPE, Host::new(&catalog.public_id, "10.0.0.1"), Options::new())
            .await
            .unwrap();
        let entries = repo.backend().oplog_entries().await.len();

        let (updated, rows) = repo
            .update_host(&ctx, SCOPE, host.with_name("web"), 2, &mask(&["name"]))
            .await
            .unwrap();

        assert!(updated.is_none());
        assert_eq!(rows, 0);
        assert_eq!(repo.backend().oplog_entries().await.len(), entries);
    }

    #[tokio::test]
    async fn test_update_host_validation() {
        let (repo, _) = create_repo().await;
        let ctx = Context::background();
        let mut host = Host::new("hcst_abcdefghij", "10.0.0.1");

        let err =
            repo.update_host(&ctx, SCOPE, host.clone(), 1, &mask(&["name"])).await.unwrap_err();
        assert_eq!(err.code(), Code::MissingPublicId);

        host.public_id = "hst_abcdefghij".to_string();
        let err =
            repo.update_host(&ctx, SCOPE, host.clone(), 0, &mask(&["name"])).await.unwrap_err();
        assert_eq!(err.code(), Code::MissingVersion);

        let err = repo.update_host(&ctx, "", host.clone(), 1, &mask(&["name"])).await.unwrap_err();
        assert_eq!(err.code(), Code::MissingScopeId);

        let err = repo
            .update_host(&ctx, SCOPE, host.clone(), 1, &mask(&["catalog_id"]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidFieldMask);

        let err = repo.update_host(&ctx, SCOPE, host, 1, &[]).await.unwrap_err();
        assert_eq!(err.code(), Code::EmptyFieldMask);
    }

    // =========================================================================
    // LOOKUP / LIST / DELETE
    // =========================================================================

    #[tokio::test]
    async fn test_list_and_delete_hosts() {
        let (repo, catalog) = create_repo().await;
        let ctx = Context::background();
        let mut ids = Vec::new();
        for address in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
            let host = repo
                .create_host(&ctx, SCOPE, Host::new(&catalog.public_id, address), Options::new())
                .await
                .unwrap();
            ids.push(host.public_id);
        }

        assert_eq!(
            repo.list_hosts(&ctx, &catalog.public_id, Options::new()).await.unwrap().len(),
            3
        );

        assert_eq!(repo.delete_host(&ctx, SCOPE, &ids[0]).await.unwrap(), 1);
        assert_eq!(repo.delete_host(&ctx, SCOPE, &ids[0]).await.unwrap(), 0);
        assert!(repo.lookup_host(&ctx, &ids[0]).await.unwrap().is_none());
        assert!(repo.lookup_host(&ctx, &ids[1]).await.unwrap().is_some());

        let hosts = repo.list_hosts(&ctx, &catalog.public_id, Options::new()).await.unwrap();
        assert_eq!(hosts.len(), 2);

        let err = repo.list_hosts(&ctx, "", Options::new()).await.unwrap_err();
        assert_eq!(err.code(), Code::MissingCatalogId);
    }

    #[tokio::test]
    async fn test_delete_catalog_removes_hosts() {
        let (repo, catalog) = create_repo().await;
        let ctx = Context::background();
        let host = repo
            .create_host(&ctx, SCOPE, Host::new(&catalog.public_id, "10.0.0.1"), Options::new())
            .await
            .unwrap();

        repo.delete_catalog(&ctx, &catalog.public_id).await.unwrap();

        assert!(repo.lookup_host(&ctx, &host.public_id).await.unwrap().is_none());
    }
}
