//! Error types for the convertors.

use gatesync_state::{BackendId, ResourceId, StateError};
use thiserror::Error;

pub type ConvertResult<T> = Result<T, ConvertError>;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("resource {resource_id} references backend {backend_id}, which has no service")]
    MissingService {
        resource_id: ResourceId,
        backend_id: BackendId,
    },

    #[error("backend {backend_id} is not configured on stage {stage}")]
    MissingBackend { backend_id: BackendId, stage: String },

    #[error("invalid backend host {host:?}: {reason}")]
    InvalidHost { host: String, reason: String },

    #[error("invalid engine version {version:?}: {reason}")]
    EngineVersion { version: String, reason: String },

    #[error("plugin config {name:?} is not valid yaml: {reason}")]
    PluginConfig { name: String, reason: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error(transparent)]
    State(#[from] StateError),
}
