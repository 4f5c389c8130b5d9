//! Repository-level properties of the static host subsystem.
//!
//! The proptest cases reuse one tokio runtime per test function rather than
//! building a runtime per iteration.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use gatehouse_errors::{Code, Template, matches};
use gatehouse_host::{Host, HostCatalog, HostSet, Options, Repository, schema};
use gatehouse_store::{Backoff, Context, MemoryBackend, MemoryKms, RetryPolicy};
use proptest::{prelude::*, test_runner::TestRunner};

const SCOPE: &str = "o_1234567890";

fn create_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Runtime::new().expect("failed to create tokio runtime")
}

fn config() -> proptest::test_runner::Config {
    proptest::test_runner::Config { cases: 32, ..Default::default() }
}

fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        backoff: Backoff::Constant(Duration::from_millis(1)),
        jitter: Duration::ZERO,
    }
}

fn create_repo() -> Repository<MemoryBackend> {
    Repository::new(schema::memory_backend(), Arc::new(MemoryKms::new()))
        .with_retry_policy(fast_retry(3))
}

/// A catalog with one set and `hosts` hosts, host ids sorted.
async fn populated(repo: &Repository<MemoryBackend>, hosts: usize) -> (HostSet, Vec<String>) {
    let ctx = Context::background();
    let catalog = repo.create_catalog(&ctx, HostCatalog::new(SCOPE), Options::new()).await.unwrap();
    let set = repo
        .create_set(&ctx, SCOPE, HostSet::new(&catalog.public_id), Options::new())
        .await
        .unwrap();
    let mut ids = Vec::with_capacity(hosts);
    for i in 0..hosts {
        let host = repo
            .create_host(
                &ctx,
                SCOPE,
                Host::new(&catalog.public_id, format!("10.0.0.{i}")),
                Options::new(),
            )
            .await
            .unwrap();
        ids.push(host.public_id);
    }
    ids.sort();
    (set, ids)
}

fn pick(ids: &[String], mask: &[bool]) -> Vec<String> {
    ids.iter().zip(mask).filter(|(_, keep)| **keep).map(|(id, _)| id.clone()).collect()
}

// =============================================================================
// OPTIMISTIC CONCURRENCY
// =============================================================================

#[test]
fn prop_stale_versions_never_apply() {
    let rt = create_runtime();
    let mut runner = TestRunner::new(config());

    runner
        .run(&(1u32..6, prop_oneof![Just(-1i64), Just(1i64), 2i64..5]), |(updates, offset)| {
            rt.block_on(async {
                let repo = create_repo();
                let ctx = Context::background();
                let mut catalog = repo
                    .create_catalog(
                        &ctx,
                        HostCatalog::new(SCOPE).with_name("start"),
                        Options::new(),
                    )
                    .await
                    .unwrap();
                for i in 0..updates {
                    let version = catalog.version;
                    let (updated, _) = repo
                        .update_catalog(
                            &ctx,
                            catalog.with_name(format!("n{i}")),
                            version,
                            &["name".to_string()],
                        )
                        .await
                        .unwrap();
                    catalog = updated.unwrap();
                }
                let current = catalog.version;
                let entries = repo.backend().oplog_entries().await.len();

                let stale = u32::try_from(i64::from(current) + offset).unwrap();
                let (updated, rows) = repo
                    .update_catalog(
                        &ctx,
                        catalog.clone().with_name("stale"),
                        stale,
                        &["name".to_string()],
                    )
                    .await
                    .unwrap();

                assert!(updated.is_none());
                assert_eq!(rows, 0);
                let stored = repo.lookup_catalog(&ctx, &catalog.public_id).await.unwrap().unwrap();
                assert_eq!(stored.version, current);
                assert_eq!(stored.name, catalog.name);
                assert_eq!(repo.backend().oplog_entries().await.len(), entries);
            });
            Ok(())
        })
        .expect("proptest");
}

#[tokio::test]
async fn test_concurrent_updates_with_same_version_apply_once() {
    let repo = create_repo();
    let ctx = Context::background();
    let catalog = repo.create_catalog(&ctx, HostCatalog::new(SCOPE), Options::new()).await.unwrap();
    let mask = vec!["name".to_string()];

    let (a, b) = tokio::join!(
        repo.update_catalog(&ctx, catalog.clone().with_name("a"), 1, &mask),
        repo.update_catalog(&ctx, catalog.clone().with_name("b"), 1, &mask),
    );

    let applied: Vec<_> = [a.unwrap(), b.unwrap()].into_iter().filter_map(|(c, _)| c).collect();
    assert_eq!(applied.len(), 1);
    let stored = repo.lookup_catalog(&ctx, &catalog.public_id).await.unwrap().unwrap();
    assert_eq!(stored.version, 2);
    assert_eq!(stored.name, applied[0].name);
    assert_eq!(repo.backend().oplog_entries().await.len(), 2);
}

// =============================================================================
// RETRY
// =============================================================================

#[tokio::test]
async fn test_serialization_failures_are_retried() {
    let repo = create_repo();
    repo.backend().inject_commit_failures(2).await;

    let catalog = repo
        .create_catalog(&Context::background(), HostCatalog::new(SCOPE), Options::new())
        .await
        .unwrap();

    assert!(catalog.public_id.starts_with("hcst_"));
    assert_eq!(repo.backend().oplog_entries().await.len(), 1);
}

#[tokio::test]
async fn test_retry_budget_is_bounded() {
    let repo = create_repo().with_retry_policy(fast_retry(1));
    repo.backend().inject_commit_failures(5).await;

    let err = repo
        .create_catalog(&Context::background(), HostCatalog::new(SCOPE), Options::new())
        .await
        .unwrap_err();

    assert_eq!(err.code(), Code::MaxRetries);
    assert!(repo.backend().oplog_entries().await.is_empty());
}

#[tokio::test]
async fn test_cancel_stops_retries() {
    let repo = create_repo().with_retry_policy(RetryPolicy {
        max_retries: 100,
        backoff: Backoff::Constant(Duration::from_secs(60)),
        jitter: Duration::ZERO,
    });
    repo.backend().inject_commit_failures(100).await;
    let ctx = Context::background();

    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });
    let err = repo.create_catalog(&ctx, HostCatalog::new(SCOPE), Options::new()).await.unwrap_err();

    assert_eq!(err.code(), Code::Canceled);
}

// =============================================================================
// ONE OPLOG ENTRY PER MUTATION
// =============================================================================

#[tokio::test]
async fn test_every_mutation_writes_one_entry() {
    let repo = create_repo();
    let ctx = Context::background();
    let (set, hosts) = populated(&repo, 3).await;
    let mut expected = 1 + 1 + 3;
    assert_eq!(repo.backend().oplog_entries().await.len(), expected);

    repo.add_set_members(&ctx, SCOPE, &set.public_id, 1, &hosts[..1]).await.unwrap();
    expected += 1;
    assert_eq!(repo.backend().oplog_entries().await.len(), expected);

    repo.set_set_members(&ctx, SCOPE, &set.public_id, 2, &hosts[1..]).await.unwrap();
    expected += 1;
    assert_eq!(repo.backend().oplog_entries().await.len(), expected);

    repo.delete_set_members(&ctx, SCOPE, &set.public_id, 3, &hosts[1..2]).await.unwrap();
    expected += 1;
    assert_eq!(repo.backend().oplog_entries().await.len(), expected);

    repo.delete_host(&ctx, SCOPE, &hosts[0]).await.unwrap();
    expected += 1;
    assert_eq!(repo.backend().oplog_entries().await.len(), expected);

    // Nothing left to delete.
    assert_eq!(repo.delete_host(&ctx, SCOPE, &hosts[0]).await.unwrap(), 0);
    assert_eq!(repo.backend().oplog_entries().await.len(), expected);
}

// =============================================================================
// SET MEMBERSHIP
// =============================================================================

#[test]
fn prop_set_set_members_reaches_target() {
    let rt = create_runtime();
    let mut runner = TestRunner::new(config());
    let masks =
        (proptest::collection::vec(any::<bool>(), 5), proptest::collection::vec(any::<bool>(), 5));

    runner
        .run(&masks, |(initial, target)| {
            rt.block_on(async {
                let repo = create_repo();
                let ctx = Context::background();
                let (set, hosts) = populated(&repo, 5).await;
                let initial = pick(&hosts, &initial);
                let target = pick(&hosts, &target);

                let mut version = 1;
                if !initial.is_empty() {
                    repo.add_set_members(&ctx, SCOPE, &set.public_id, version, &initial)
                        .await
                        .unwrap();
                    version += 1;
                }

                let (members, changed) = repo
                    .set_set_members(&ctx, SCOPE, &set.public_id, version, &target)
                    .await
                    .unwrap();

                let before: BTreeSet<_> = initial.iter().collect();
                let after: BTreeSet<_> = target.iter().collect();
                assert_eq!(changed, before.symmetric_difference(&after).count());
                let member_ids: Vec<String> = members.into_iter().map(|h| h.public_id).collect();
                assert_eq!(member_ids, target);

                let entries = repo.backend().oplog_entries().await.len();
                let version = if changed > 0 { version + 1 } else { version };
                let (_, again) = repo
                    .set_set_members(&ctx, SCOPE, &set.public_id, version, &target)
                    .await
                    .unwrap();
                assert_eq!(again, 0);
                assert_eq!(repo.backend().oplog_entries().await.len(), entries);
            });
            Ok(())
        })
        .expect("proptest");
}

#[tokio::test]
async fn test_empty_host_ids_fail_before_any_transaction() {
    let repo = create_repo();
    let ctx = Context::background();
    let (set, _) = populated(&repo, 1).await;
    repo.backend().inject_commit_failures(1).await;

    let err = repo.add_set_members(&ctx, SCOPE, &set.public_id, 1, &[]).await.unwrap_err();
    assert!(matches(&Template::code(Code::MissingHostIds), &err));
    let err = repo.delete_set_members(&ctx, SCOPE, &set.public_id, 1, &[]).await.unwrap_err();
    assert!(matches(&Template::code(Code::MissingHostIds), &err));

    // The injected failure is still pending: no commit was attempted.
    let err = repo
        .with_retry_policy(RetryPolicy::none())
        .create_catalog(&ctx, HostCatalog::new(SCOPE).with_name("probe"), Options::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::MaxRetries);
}
