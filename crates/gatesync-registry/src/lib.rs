//! gatesync registry: converge data-plane key-value state.
//!
//! The data plane watches a key-value store. Each target cluster owns one
//! key prefix; every resource lives at `{prefix}/{kind}/{id}`. A
//! [`KvRegistry`] applies a desired resource set and removes what it owns
//! but no longer needs, collecting per-key failures instead of aborting.
//!
//! # Components
//!
//! - **`kv`**: `KeyValueStore` trait and the in-memory backend
//! - **`redb_kv`**: Persistent redb backend
//! - **`registry`**: `Registry` trait, scopes, sync reports, per-cluster providers

pub mod error;
pub mod kv;
pub mod redb_kv;
pub mod registry;

pub use error::{RegistryError, RegistryResult};
pub use kv::{KeyValueStore, MemoryKeyValueStore};
pub use redb_kv::RedbKeyValueStore;
pub use registry::{
    ApplyOutcome, KvRegistry, Registry, RegistryProvider, RegistryScope, ResourceIter,
    SharedStoreProvider, SyncFailure, SyncOp, SyncReport,
};
