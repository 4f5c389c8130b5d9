//! Host set membership.
//!
//! Membership changes are versioned through the owning set: every change
//! bumps the set version from the caller's expected `version` and records
//! the member rows together with the updated set in a single oplog entry.

use gatehouse_errors::{Code, Error, Result};
use gatehouse_store::{
    Backend, ChangeAction, Context, Filter, MemberChangeQuery, Message, Metadata, OpType, Reader,
    ReaderExt, Record, Row, WriteOptions, Wrapper, Writer,
    oplog::OP_TYPE,
};
use serde_json::json;

use crate::{
    model::{Host, HostSet, HostSetMember, set_oplog},
    repository::{Repository, classify},
    schema::{HOST_SET_MEMBER_TABLE, HOST_SET_TABLE},
};

fn validate_member_args(scope_id: &str, set_id: &str, version: u32, op: &str) -> Result<()> {
    if scope_id.is_empty() {
        return Err(Error::new(Code::MissingScopeId, op).with_msg("missing scope id"));
    }
    if set_id.is_empty() {
        return Err(Error::new(Code::MissingSetId, op).with_msg("missing set id"));
    }
    if version == 0 {
        return Err(Error::new(Code::MissingVersion, op).with_msg("missing version"));
    }
    Ok(())
}

fn member_rows(set_id: &str, catalog_id: &str, host_ids: &[String]) -> Result<Vec<Row>> {
    host_ids
        .iter()
        .map(|host_id| {
            let mut member = HostSetMember::new(set_id, host_id.as_str());
            member.catalog_id = catalog_id.to_string();
            member.to_row()
        })
        .collect()
}

async fn set_catalog<T: Reader + ?Sized>(reader: &T, set_id: &str, op: &str) -> Result<String> {
    reader
        .lookup::<HostSet>(set_id)
        .await?
        .map(|set| set.catalog_id)
        .ok_or_else(|| {
            Error::new(Code::RecordNotFound, op).with_msg(format!("host set {set_id} not found"))
        })
}

/// Hosts currently in `set_id`, ordered by host id.
async fn set_hosts<T: Reader + ?Sized>(reader: &T, set_id: &str) -> Result<Vec<Host>> {
    let members = reader
        .search::<HostSetMember>(&Filter::new().eq("set_id", set_id), None)
        .await?;
    let mut hosts = Vec::with_capacity(members.len());
    for member in members {
        if let Some(host) = reader.lookup::<Host>(&member.host_id).await? {
            hosts.push(host);
        }
    }
    Ok(hosts)
}

/// Bumps the set version, then writes one oplog entry holding `messages`
/// followed by the set update.
async fn bump_version<W: Writer + ?Sized>(
    tx: &mut W,
    wrapper: &dyn Wrapper,
    metadata: Metadata,
    mut messages: Vec<Message>,
    set_id: &str,
    version: u32,
    op: &str,
) -> Result<()> {
    let mut row = Row::new();
    row.insert("public_id".to_string(), json!(set_id));
    let updated = tx
        .update(
            HOST_SET_TABLE,
            row,
            &["version".to_string()],
            &[],
            WriteOptions::new().with_version(version),
        )
        .await
        .map_err(|e| Error::wrap(e, op).with_msg("unable to update host set version"))?;
    match updated.rows {
        1 => {},
        0 => {
            return Err(Error::new(Code::VersionMismatch, op).with_msg(format!(
                "host set {set_id} is not at version {version}"
            )));
        },
        _ => {
            return Err(Error::new(Code::MultipleRecords, op)
                .with_msg("more than 1 host set would have been updated"));
        },
    }
    messages.extend(updated.messages);

    let ticket = tx
        .get_ticket(HOST_SET_TABLE)
        .await
        .map_err(|e| Error::wrap(e, op).with_msg("unable to get ticket"))?;
    tx.write_oplog_entry_with(wrapper, ticket, metadata, messages)
        .await
        .map_err(|e| Error::wrap(e, op).with_msg("unable to write oplog"))
}

async fn delete_members<W: Writer + ?Sized>(
    tx: &mut W,
    set_id: &str,
    host_ids: &[String],
    op: &str,
) -> Result<Vec<Message>> {
    let rows = host_ids
        .iter()
        .map(|host_id| HostSetMember::new(set_id, host_id.as_str()).to_row())
        .collect::<Result<Vec<_>>>()?;
    let deleted = tx
        .delete_items(HOST_SET_MEMBER_TABLE, rows)
        .await
        .map_err(|e| Error::wrap(e, op).with_msg("unable to delete host set members"))?;
    if deleted.rows != host_ids.len() {
        return Err(Error::new(Code::Unknown, op).with_msg(format!(
            "set members deleted {} did not match request for {}",
            deleted.rows,
            host_ids.len()
        )));
    }
    Ok(deleted.messages)
}

impl<B: Backend> Repository<B> {
    /// Add `host_ids` to a set whose version is `version`.
    ///
    /// Adding a host that is already a member fails with `NotUnique`, and a
    /// host of another catalog is rejected by the store.
    ///
    /// # Returns
    ///
    /// Every host of the set after the change.
    ///
    /// # Errors
    ///
    /// Returns `MissingScopeId`, `MissingSetId`, `MissingVersion` or
    /// `MissingHostIds` before touching the store, and `VersionMismatch`
    /// when the set is no longer at `version`.
    pub async fn add_set_members(
        &self,
        ctx: &Context,
        scope_id: &str,
        set_id: &str,
        version: u32,
        host_ids: &[String],
    ) -> Result<Vec<Host>> {
        const OP: &str = "host.add_set_members";
        validate_member_args(scope_id, set_id, version, OP)?;
        if host_ids.is_empty() {
            return Err(Error::new(Code::MissingHostIds, OP).with_msg("missing host ids"));
        }

        let metadata = set_oplog(set_id, OpType::Create, scope_id);
        let sealer = self.sealer(ctx, scope_id);
        let hosts = self
            .transact(ctx, OP, |tx| {
                let (metadata, sealer) = (metadata.clone(), sealer.clone());
                let (set_id, host_ids) = (set_id.to_string(), host_ids.to_vec());
                Box::pin(async move {
                    let wrapper = sealer.wrapper(OP).await?;
                    let catalog_id = set_catalog(&*tx, &set_id, OP).await?;
                    let created = tx
                        .create_items(
                            HOST_SET_MEMBER_TABLE,
                            member_rows(&set_id, &catalog_id, &host_ids)?,
                        )
                        .await?;
                    bump_version(
                        &mut *tx,
                        wrapper.as_ref(),
                        metadata,
                        created.messages,
                        &set_id,
                        version,
                        OP,
                    )
                    .await?;
                    set_hosts(&*tx, &set_id).await
                })
            })
            .await
            .map_err(|e| classify(e, OP, format!("static host set: {set_id}")))?;

        tracing::debug!(set_id, added = host_ids.len(), version, "Added host set members");
        Ok(hosts)
    }

    /// Remove `host_ids` from a set whose version is `version`.
    ///
    /// # Returns
    ///
    /// The number of hosts removed, which is always `host_ids.len()`: the
    /// call fails and changes nothing when any of them is not a member.
    pub async fn delete_set_members(
        &self,
        ctx: &Context,
        scope_id: &str,
        set_id: &str,
        version: u32,
        host_ids: &[String],
    ) -> Result<usize> {
        const OP: &str = "host.delete_set_members";
        validate_member_args(scope_id, set_id, version, OP)?;
        if host_ids.is_empty() {
            return Err(Error::new(Code::MissingHostIds, OP).with_msg("missing host ids"));
        }

        let metadata = set_oplog(set_id, OpType::Delete, scope_id);
        let sealer = self.sealer(ctx, scope_id);
        self.transact(ctx, OP, |tx| {
            let (metadata, sealer) = (metadata.clone(), sealer.clone());
            let (set_id, host_ids) = (set_id.to_string(), host_ids.to_vec());
            Box::pin(async move {
                let wrapper = sealer.wrapper(OP).await?;
                let messages = delete_members(&mut *tx, &set_id, &host_ids, OP).await?;
                bump_version(
                    &mut *tx,
                    wrapper.as_ref(),
                    metadata,
                    messages,
                    &set_id,
                    version,
                    OP,
                )
                .await
            })
        })
        .await
        .map_err(|e| classify(e, OP, format!("static host set: {set_id}")))?;

        tracing::debug!(set_id, deleted = host_ids.len(), version, "Deleted host set members");
        Ok(host_ids.len())
    }

    /// Make the members of a set exactly `host_ids`. An empty list removes
    /// every member.
    ///
    /// The store computes which members to add and remove. When nothing
    /// changes no transaction runs and no oplog entry is written.
    ///
    /// # Returns
    ///
    /// The hosts of the set and the number of members added plus removed.
    pub async fn set_set_members(
        &self,
        ctx: &Context,
        scope_id: &str,
        set_id: &str,
        version: u32,
        host_ids: &[String],
    ) -> Result<(Vec<Host>, usize)> {
        const OP: &str = "host.set_set_members";
        validate_member_args(scope_id, set_id, version, OP)?;
        ctx.check(OP)?;

        let changes = self
            .backend
            .member_changes(&MemberChangeQuery {
                table: HOST_SET_MEMBER_TABLE,
                parent_column: "set_id",
                parent_id: set_id,
                member_column: "host_id",
                targets: host_ids,
            })
            .await
            .map_err(|e| classify(e, OP, format!("unable to compute changes for {set_id}")))?;
        if changes.is_empty() {
            return Ok((self.list_set_members(ctx, set_id).await?, 0));
        }

        let (deletions, additions): (Vec<_>, Vec<_>) =
            changes.iter().partition(|c| c.action == ChangeAction::Delete);
        let deletions: Vec<String> = deletions.into_iter().map(|c| c.member_id.clone()).collect();
        let additions: Vec<String> = additions.into_iter().map(|c| c.member_id.clone()).collect();

        let mut metadata = set_oplog(set_id, OpType::Update, scope_id);
        if !deletions.is_empty() {
            metadata.push(OP_TYPE, OpType::Delete.as_str());
        }
        if !additions.is_empty() {
            metadata.push(OP_TYPE, OpType::Create.as_str());
        }

        let sealer = self.sealer(ctx, scope_id);
        let hosts = self
            .transact(ctx, OP, |tx| {
                let (metadata, sealer) = (metadata.clone(), sealer.clone());
                let (set_id, deletions, additions) =
                    (set_id.to_string(), deletions.clone(), additions.clone());
                Box::pin(async move {
                    let wrapper = sealer.wrapper(OP).await?;
                    let mut messages = Vec::new();
                    if !deletions.is_empty() {
                        messages.extend(delete_members(&mut *tx, &set_id, &deletions, OP).await?);
                    }
                    if !additions.is_empty() {
                        let catalog_id = set_catalog(&*tx, &set_id, OP).await?;
                        let created = tx
                            .create_items(
                                HOST_SET_MEMBER_TABLE,
                                member_rows(&set_id, &catalog_id, &additions)?,
                            )
                            .await?;
                        messages.extend(created.messages);
                    }
                    bump_version(
                        &mut *tx,
                        wrapper.as_ref(),
                        metadata,
                        messages,
                        &set_id,
                        version,
                        OP,
                    )
                    .await?;
                    set_hosts(&*tx, &set_id).await
                })
            })
            .await
            .map_err(|e| classify(e, OP, format!("static host set: {set_id}")))?;

        tracing::debug!(
            set_id,
            added = additions.len(),
            deleted = deletions.len(),
            version,
            "Set host set members"
        );
        Ok((hosts, changes.len()))
    }

    /// Every host of a set, ordered by host id.
    pub async fn list_set_members(&self, ctx: &Context, set_id: &str) -> Result<Vec<Host>> {
        const OP: &str = "host.list_set_members";
        if set_id.is_empty() {
            return Err(Error::new(Code::MissingSetId, OP).with_msg("missing set id"));
        }
        ctx.check(OP)?;

        set_hosts(&self.backend, set_id)
            .await
            .map_err(|e| classify(e, OP, format!("static host set: {set_id}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::sync::Arc;

    use gatehouse_store::{MemoryBackend, MemoryKms};

    use super::*;
    use crate::{model::HostCatalog, options::Options, schema};

    const SCOPE: &str = "o_1234567890";

    struct Fixture {
        repo: Repository<MemoryBackend>,
        catalog: HostCatalog,
        set: HostSet,
        hosts: Vec<String>,
    }

    async fn create_fixture() -> Fixture {
        let repo = Repository::new(schema::memory_backend(), Arc::new(MemoryKms::new()));
        let ctx = Context::background();
        let catalog =
            repo.create_catalog(&ctx, HostCatalog::new(SCOPE), Options::new()).await.unwrap();
        let set = repo
            .create_set(&ctx, SCOPE, HostSet::new(&catalog.public_id), Options::new())
            .await
            .unwrap();
        let mut hosts = Vec::new();
        for address in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
            let host = repo
                .create_host(&ctx, SCOPE, Host::new(&catalog.public_id, address), Options::new())
                .await
                .unwrap();
            hosts.push(host.public_id);
        }
        hosts.sort();
        Fixture { repo, catalog, set, hosts }
    }

    fn ids(hosts: &[Host]) -> Vec<String> {
        hosts.iter().map(|h| h.public_id.clone()).collect()
    }

    async fn set_version(fixture: &Fixture) -> u32 {
        fixture
            .repo
            .lookup_set(&Context::background(), &fixture.set.public_id)
            .await
            .unwrap()
            .unwrap()
            .version
    }

    // =========================================================================
    // ADD
    // =========================================================================

    #[tokio::test]
    async fn test_add_set_members() {
        let f = create_fixture().await;
        let ctx = Context::background();
        let before = f.repo.backend().oplog_entries().await.len();

        let hosts = f
            .repo
            .add_set_members(&ctx, SCOPE, &f.set.public_id, 1, &f.hosts[..2])
            .await
            .unwrap();

        assert_eq!(ids(&hosts), f.hosts[..2]);
        assert_eq!(set_version(&f).await, 2);

        let entries = f.repo.backend().oplog_entries().await;
        assert_eq!(entries.len(), before + 1);
        let entry = entries.last().unwrap();
        assert_eq!(entry.metadata.op_types(), ["OP_TYPE_CREATE"]);
        let tables: Vec<_> = entry.messages.iter().map(|m| m.type_name.as_str()).collect();
        assert_eq!(tables, [HOST_SET_MEMBER_TABLE, HOST_SET_MEMBER_TABLE, HOST_SET_TABLE]);
    }

    #[tokio::test]
    async fn test_add_existing_member_is_not_unique() {
        let f = create_fixture().await;
        let ctx = Context::background();
        f.repo.add_set_members(&ctx, SCOPE, &f.set.public_id, 1, &f.hosts[..1]).await.unwrap();

        let err = f
            .repo
            .add_set_members(&ctx, SCOPE, &f.set.public_id, 2, &f.hosts[..1])
            .await
            .unwrap_err();

        assert_eq!(err.code(), Code::NotUnique);
        assert_eq!(set_version(&f).await, 2);
    }

    #[tokio::test]
    async fn test_add_set_members_stale_version() {
        let f = create_fixture().await;
        let ctx = Context::background();
        let before = f.repo.backend().oplog_entries().await.len();

        let err = f
            .repo
            .add_set_members(&ctx, SCOPE, &f.set.public_id, 2, &f.hosts)
            .await
            .unwrap_err();

        assert_eq!(err.code(), Code::VersionMismatch);
        assert!(f.repo.list_set_members(&ctx, &f.set.public_id).await.unwrap().is_empty());
        assert_eq!(f.repo.backend().oplog_entries().await.len(), before);
    }

    #[tokio::test]
    async fn test_add_host_from_other_catalog() {
        let f = create_fixture().await;
        let ctx = Context::background();
        let other = f
            .repo
            .create_catalog(&ctx, HostCatalog::new(SCOPE).with_name("other"), Options::new())
            .await
            .unwrap();
        let stranger = f
            .repo
            .create_host(&ctx, SCOPE, Host::new(&other.public_id, "10.1.0.1"), Options::new())
            .await
            .unwrap();

        let err = f
            .repo
            .add_set_members(&ctx, SCOPE, &f.set.public_id, 1, &[stranger.public_id])
            .await
            .unwrap_err();

        assert_eq!(err.code(), Code::NotSpecificIntegrity);
        assert_ne!(other.public_id, f.catalog.public_id);
    }

    #[tokio::test]
    async fn test_member_validation() {
        let f = create_fixture().await;
        let ctx = Context::background();
        let set_id = f.set.public_id.as_str();

        let cases = [
            ("", set_id, 1, Code::MissingScopeId),
            (SCOPE, "", 1, Code::MissingSetId),
            (SCOPE, set_id, 0, Code::MissingVersion),
        ];
        for (scope, set, version, code) in cases {
            let err =
                f.repo.add_set_members(&ctx, scope, set, version, &f.hosts).await.unwrap_err();
            assert_eq!(err.code(), code);
            let err =
                f.repo.delete_set_members(&ctx, scope, set, version, &f.hosts).await.unwrap_err();
            assert_eq!(err.code(), code);
            let err =
                f.repo.set_set_members(&ctx, scope, set, version, &f.hosts).await.unwrap_err();
            assert_eq!(err.code(), code);
        }

        let err = f.repo.add_set_members(&ctx, SCOPE, set_id, 1, &[]).await.unwrap_err();
        assert_eq!(err.code(), Code::MissingHostIds);
        let err = f.repo.delete_set_members(&ctx, SCOPE, set_id, 1, &[]).await.unwrap_err();
        assert_eq!(err.code(), Code::MissingHostIds);
    }

    // =========================================================================
    // DELETE
    // =========================================================================

    #[tokio::test]
    async fn test_delete_set_members() {
        let f = create_fixture().await;
        let ctx = Context::background();
        f.repo.add_set_members(&ctx, SCOPE, &f.set.public_id, 1, &f.hosts).await.unwrap();

        let deleted = f
            .repo
            .delete_set_members(&ctx, SCOPE, &f.set.public_id, 2, &f.hosts[..2])
            .await
            .unwrap();

        assert_eq!(deleted, 2);
        let remaining = f.repo.list_set_members(&ctx, &f.set.public_id).await.unwrap();
        assert_eq!(ids(&remaining), f.hosts[2..]);
        let entries = f.repo.backend().oplog_entries().await;
        assert_eq!(entries.last().unwrap().metadata.op_types(), ["OP_TYPE_DELETE"]);
    }

    #[tokio::test]
    async fn test_delete_non_member_fails() {
        let f = create_fixture().await;
        let ctx = Context::background();
        f.repo.add_set_members(&ctx, SCOPE, &f.set.public_id, 1, &f.hosts[..1]).await.unwrap();

        let err = f
            .repo
            .delete_set_members(&ctx, SCOPE, &f.set.public_id, 2, &f.hosts[..2])
            .await
            .unwrap_err();

        assert_eq!(err.code(), Code::Unknown);
        assert_eq!(f.repo.list_set_members(&ctx, &f.set.public_id).await.unwrap().len(), 1);
        assert_eq!(set_version(&f).await, 2);
    }

    // =========================================================================
    // SET
    // =========================================================================

    #[tokio::test]
    async fn test_set_set_members_reconciles() {
        let f = create_fixture().await;
        let ctx = Context::background();
        f.repo.add_set_members(&ctx, SCOPE, &f.set.public_id, 1, &f.hosts[..2]).await.unwrap();

        let target = vec![f.hosts[1].clone(), f.hosts[2].clone()];
        let (hosts, changed) =
            f.repo.set_set_members(&ctx, SCOPE, &f.set.public_id, 2, &target).await.unwrap();

        assert_eq!(ids(&hosts), target);
        assert_eq!(changed, 2);
        assert_eq!(set_version(&f).await, 3);

        let entries = f.repo.backend().oplog_entries().await;
        let entry = entries.last().unwrap();
        assert_eq!(
            entry.metadata.op_types(),
            ["OP_TYPE_UPDATE", "OP_TYPE_DELETE", "OP_TYPE_CREATE"]
        );
        let ops: Vec<_> = entry.messages.iter().map(|m| m.op_type).collect();
        assert_eq!(ops, [OpType::Delete, OpType::Create, OpType::Update]);
    }

    #[tokio::test]
    async fn test_set_set_members_is_idempotent() {
        let f = create_fixture().await;
        let ctx = Context::background();

        let (_, changed) =
            f.repo.set_set_members(&ctx, SCOPE, &f.set.public_id, 1, &f.hosts).await.unwrap();
        assert_eq!(changed, 3);
        let entries = f.repo.backend().oplog_entries().await.len();

        let (hosts, changed) =
            f.repo.set_set_members(&ctx, SCOPE, &f.set.public_id, 2, &f.hosts).await.unwrap();

        assert_eq!(changed, 0);
        assert_eq!(ids(&hosts), f.hosts);
        assert_eq!(f.repo.backend().oplog_entries().await.len(), entries);
        assert_eq!(set_version(&f).await, 2);
    }

    #[tokio::test]
    async fn test_set_set_members_empty_removes_all() {
        let f = create_fixture().await;
        let ctx = Context::background();
        f.repo.add_set_members(&ctx, SCOPE, &f.set.public_id, 1, &f.hosts).await.unwrap();

        let (hosts, changed) =
            f.repo.set_set_members(&ctx, SCOPE, &f.set.public_id, 2, &[]).await.unwrap();

        assert!(hosts.is_empty());
        assert_eq!(changed, 3);
        let entries = f.repo.backend().oplog_entries().await;
        assert_eq!(
            entries.last().unwrap().metadata.op_types(),
            ["OP_TYPE_UPDATE", "OP_TYPE_DELETE"]
        );
    }

    #[tokio::test]
    async fn test_set_set_members_stale_version() {
        let f = create_fixture().await;
        let ctx = Context::background();

        let err = f
            .repo
            .set_set_members(&ctx, SCOPE, &f.set.public_id, 5, &f.hosts)
            .await
            .unwrap_err();

        assert_eq!(err.code(), Code::VersionMismatch);
        assert!(f.repo.list_set_members(&ctx, &f.set.public_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deleting_host_drops_membership() {
        let f = create_fixture().await;
        let ctx = Context::background();
        f.repo.add_set_members(&ctx, SCOPE, &f.set.public_id, 1, &f.hosts).await.unwrap();

        f.repo.delete_host(&ctx, SCOPE, &f.hosts[0]).await.unwrap();

        let remaining = f.repo.list_set_members(&ctx, &f.set.public_id).await.unwrap();
        assert_eq!(ids(&remaining), f.hosts[1..]);
    }
}
