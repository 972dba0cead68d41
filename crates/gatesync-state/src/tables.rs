//! redb table definitions for the gatesync control-plane store.
//!
//! JSON tables use `&str` keys and `&[u8]` values. Numeric ids inside keys are
//! zero-padded to 20 digits so lexical order matches numeric order, and
//! children are keyed `{parent_id}/{child_id}` for prefix scans.

use redb::TableDefinition;

/// A table of JSON-serialized records.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Gateways keyed by `{gateway_id}`.
pub const GATEWAYS: JsonTable = TableDefinition::new("gateways");

/// Stages keyed by `{gateway_id}/{stage_id}`.
pub const STAGES: JsonTable = TableDefinition::new("stages");

/// Resource versions keyed by `{gateway_id}/{version_id}`.
pub const RESOURCE_VERSIONS: JsonTable = TableDefinition::new("resource_versions");

/// Releases keyed by `{gateway_id}/{stage_id}`.
pub const RELEASES: JsonTable = TableDefinition::new("releases");

/// Release histories keyed by `{gateway_id}/{history_id}`.
pub const RELEASE_HISTORIES: JsonTable = TableDefinition::new("release_histories");

/// Publish tasks keyed by `{publish_id}`.
pub const PUBLISH_TASKS: JsonTable = TableDefinition::new("publish_tasks");

/// Publish events keyed by `{publish_id}/{ordinal}`.
pub const PUBLISH_EVENTS: JsonTable = TableDefinition::new("publish_events");

/// Micro-gateways (target clusters) keyed by `{micro_gateway_id}`.
pub const MICRO_GATEWAYS: JsonTable = TableDefinition::new("micro_gateways");

/// Plugin configs keyed by `{gateway_id}/{config_id}`.
pub const PLUGIN_CONFIGS: JsonTable = TableDefinition::new("plugin_configs");

/// Plugin bindings keyed by `{gateway_id}/{binding_id}`.
pub const PLUGIN_BINDINGS: JsonTable = TableDefinition::new("plugin_bindings");

/// Monotonic id counters keyed by sequence name.
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");
