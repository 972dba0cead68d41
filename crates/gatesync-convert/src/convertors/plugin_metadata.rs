use std::collections::BTreeMap;

use serde_json::json;

use crate::error::ConvertResult;
use crate::resource::{PluginMetadataSpec, ResourceKind, ResourceSpec, RuntimeResource};
use crate::snapshot::ReleaseSnapshot;

use super::Convertor;

pub const DEFAULT_ACCESS_LOG_PLUGIN: &str = "file-logger";

/// Emits plugin metadata: the default access-log format plus the
/// overrides configured on the target cluster.
#[derive(Debug, Default, Clone, Copy)]
pub struct PluginMetadataConvertor;

impl PluginMetadataConvertor {
    fn default_access_log() -> serde_json::Value {
        json!({
            "log_format": {
                "time": "$time_iso8601",
                "request_id": "$request_id",
                "method": "$request_method",
                "uri": "$request_uri",
                "status": "$status",
                "client_ip": "$remote_addr",
                "upstream_addr": "$upstream_addr",
                "request_time": "$request_time",
                "gateway": "$gatesync_gateway",
                "stage": "$gatesync_stage",
            }
        })
    }
}

impl Convertor for PluginMetadataConvertor {
    fn kind(&self) -> ResourceKind {
        ResourceKind::PluginMetadata
    }

    fn convert(&self, snapshot: &ReleaseSnapshot) -> ConvertResult<Vec<RuntimeResource>> {
        let mut metadata = BTreeMap::from([(
            DEFAULT_ACCESS_LOG_PLUGIN.to_string(),
            Self::default_access_log(),
        )]);
        for (name, config) in &snapshot.micro_gateway.config.plugin_metadata {
            metadata.insert(name.clone(), config.clone());
        }

        let labels = snapshot.labels();
        Ok(metadata
            .into_iter()
            .map(|(name, config)| {
                RuntimeResource::new(
                    name.clone(),
                    labels.clone(),
                    ResourceSpec::PluginMetadata(PluginMetadataSpec { name, config }),
                )
            })
            .collect())
    }
}
