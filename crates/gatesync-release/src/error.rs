//! Publish errors.
//!
//! `Validation` errors are raised before anything is written. `Execution`
//! errors happen after the request started mutating state.

use gatesync_registry::RegistryError;
use gatesync_state::{GatewayId, PublishId, ResourceVersionId, StageId, StateError};
use thiserror::Error;

pub type PublishResult<T> = Result<T, PublishError>;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("invalid publish request: {0}")]
    Validation(#[from] ValidationError),

    #[error("publish execution failed: {0}")]
    Execution(#[from] ExecutionError),
}

impl PublishError {
    pub fn is_validation(&self) -> bool {
        matches!(self, PublishError::Validation(_))
    }
}

impl From<StateError> for PublishError {
    fn from(e: StateError) -> Self {
        PublishError::Execution(ExecutionError::State(e))
    }
}

impl From<RegistryError> for PublishError {
    fn from(e: RegistryError) -> Self {
        PublishError::Execution(ExecutionError::Registry(e))
    }
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("no stage given")]
    EmptyStages,

    #[error("gateway {0} not found")]
    UnknownGateway(GatewayId),

    #[error("stage {stage_id} does not belong to gateway {gateway_id}")]
    UnknownStage {
        gateway_id: GatewayId,
        stage_id: StageId,
    },

    #[error("resource version {version_id} does not belong to gateway {gateway_id}")]
    UnknownVersion {
        gateway_id: GatewayId,
        version_id: ResourceVersionId,
    },

    #[error("stage {stage_id} has no active release")]
    NotReleased { stage_id: StageId },

    #[error("micro-gateway {0} not found")]
    UnknownMicroGateway(String),

    #[error("micro-gateway {name} is dedicated to another gateway than {gateway_id}")]
    ForeignMicroGateway { name: String, gateway_id: GatewayId },

    #[error("publish {0} not found")]
    UnknownPublish(PublishId),

    #[error("step {0} is not reported by the data plane")]
    NotReportable(&'static str),

    #[error("publish {publish_id}: {reason}")]
    Regression { publish_id: PublishId, reason: String },
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("publish jobs need a tokio runtime: {0}")]
    NoRuntime(String),
}
