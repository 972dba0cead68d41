//! Ownership label keys stamped on every runtime resource.
//!
//! The registry uses the gateway and stage labels as its ownership selector,
//! so resources published by one stage are never touched by another stage's
//! sync even when both share a key prefix.

pub const GATEWAY: &str = "gateway.gatesync.io/gateway";
pub const STAGE: &str = "gateway.gatesync.io/stage";
pub const PUBLISH_ID: &str = "gateway.gatesync.io/publish-id";
pub const ENGINE_VERSION: &str = "gateway.gatesync.io/engine-version";

/// Labels that identify ownership (as opposed to provenance).
pub const SELECTOR_KEYS: [&str; 2] = [GATEWAY, STAGE];
