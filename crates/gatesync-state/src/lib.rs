//! gatesync-state: control-plane store for gatesync.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for gateways, stages, immutable resource versions, releases,
//! release histories, publish tasks and events, micro-gateways, and plugin
//! bindings.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{gateway_id}/{child_id}`, `{publish_id}/{ordinal}`) enable
//! prefix scans for related records. Multi-record operations such as
//! recording a release run inside a single redb write transaction, so
//! concurrent publishes serialize.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{NewPluginBinding, PluginChangeBatch, ReleaseIntent, StateStore, epoch_secs};
pub use types::*;
