//! gatesync convertors: release snapshots to typed data-plane resources.
//!
//! A publish task loads a [`ReleaseSnapshot`] from the control-plane store
//! and hands it to the [`CustomResourceConvertor`], which runs one pure
//! convertor per resource kind and returns the desired state of the target
//! cluster.
//!
//! # Components
//!
//! - **`uri`**: Path template rendering (route match and upstream grammars)
//! - **`resource`**: Runtime resource model and registry keys
//! - **`snapshot`**: Denormalized release input
//! - **`convertors`**: One convertor per resource kind
//! - **`orchestrator`**: Dependency-ordered conversion with per-kind toggles

pub mod convertors;
pub mod error;
pub mod orchestrator;
pub mod resource;
pub mod snapshot;
pub mod uri;

pub use convertors::Convertor;
pub use error::{ConvertError, ConvertResult};
pub use orchestrator::{ConvertOptions, ConvertedResources, CustomResourceConvertor};
pub use resource::{PluginEntry, ResourceKind, ResourceSpec, RuntimeResource, kind_prefix, resource_key};
pub use snapshot::{BoundPlugin, ReleaseSnapshot, ownership_selector};
pub use uri::{UriRenderer, render_route_path, render_upstream_path, substitute_env};
