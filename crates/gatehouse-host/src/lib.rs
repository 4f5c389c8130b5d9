//! # Gatehouse static hosts
//!
//! Repository of static host catalogs, the hosts they contain, host sets
//! and set membership.
//!
//! Every mutating call validates its arguments before touching the store,
//! then runs in a managed transaction that resolves the scope's oplog
//! wrapper, performs the write guarded by the caller's expected `version`
//! and appends exactly one oplog entry. A stale version surfaces as zero
//! rows affected for catalogs and hosts and as `VersionMismatch` for set
//! membership.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use gatehouse_host::{Host, HostCatalog, Options, Repository, schema};
//! use gatehouse_store::{Context, MemoryKms};
//!
//! let repo = Repository::new(schema::memory_backend(), Arc::new(MemoryKms::new()));
//! let ctx = Context::background();
//!
//! let catalog = HostCatalog::new("o_1234567890");
//! let catalog = repo.create_catalog(&ctx, catalog, Options::new()).await?;
//! let host = Host::new(&catalog.public_id, "10.0.0.1");
//! let host = repo.create_host(&ctx, "o_1234567890", host, Options::new()).await?;
//! ```

#![deny(unsafe_code)]

mod catalog;
mod host;
mod member;
pub mod model;
pub mod options;
pub mod repository;
pub mod schema;
mod set;

pub use model::{
    HOST_CATALOG_PREFIX, HOST_PREFIX, HOST_SET_PREFIX, Host, HostCatalog, HostSet, HostSetMember,
};
pub use options::Options;
pub use repository::{DEFAULT_LIMIT, Repository};
