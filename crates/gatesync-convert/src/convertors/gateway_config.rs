use crate::error::ConvertResult;
use crate::resource::{GatewayConfigSpec, ResourceKind, ResourceSpec, RuntimeResource};
use crate::snapshot::{ReleaseSnapshot, SHARED_BASE_PATH};

use super::Convertor;

/// Emits the per-cluster settings resource, keyed by the cluster name.
#[derive(Debug, Default, Clone, Copy)]
pub struct GatewayConfigConvertor;

impl Convertor for GatewayConfigConvertor {
    fn kind(&self) -> ResourceKind {
        ResourceKind::GatewayConfig
    }

    fn convert(&self, snapshot: &ReleaseSnapshot) -> ConvertResult<Vec<RuntimeResource>> {
        let micro_gateway = &snapshot.micro_gateway;
        let base_path = if micro_gateway.is_shared {
            SHARED_BASE_PATH
        } else {
            "/"
        };
        let spec = GatewayConfigSpec {
            instance_id: format!("{}-{}", micro_gateway.name, micro_gateway.id),
            controller_endpoint: micro_gateway.config.endpoint.clone(),
            base_path: base_path.to_string(),
            auth_secret: micro_gateway.config.auth_secret.clone(),
        };
        Ok(vec![RuntimeResource::new(
            micro_gateway.name.clone(),
            snapshot.labels(),
            ResourceSpec::GatewayConfig(spec),
        )])
    }
}
