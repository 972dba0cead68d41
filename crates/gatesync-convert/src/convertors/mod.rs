//! One convertor per runtime resource kind.
//!
//! Convertors are pure: they read a [`ReleaseSnapshot`] and return the
//! resources of their kind, in a deterministic order.

mod gateway_config;
mod http_resource;
mod plugin_metadata;
mod service;
mod stage;

pub use gateway_config::GatewayConfigConvertor;
pub use http_resource::HttpResourceConvertor;
pub use plugin_metadata::{DEFAULT_ACCESS_LOG_PLUGIN, PluginMetadataConvertor};
pub use service::{ServiceConvertor, parse_upstream_node};
pub use stage::{DEFAULT_STAGE_PLUGINS, GLOBAL_RATE_LIMIT_PLUGIN, StageConvertor};

use crate::error::ConvertResult;
use crate::resource::{ResourceKind, RuntimeResource};
use crate::snapshot::ReleaseSnapshot;

pub trait Convertor {
    /// The kind every emitted resource has.
    fn kind(&self) -> ResourceKind;

    fn convert(&self, snapshot: &ReleaseSnapshot) -> ConvertResult<Vec<RuntimeResource>>;
}
