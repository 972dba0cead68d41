//! Denormalized input to the convertors.
//!
//! A [`ReleaseSnapshot`] gathers everything one publish task needs from the
//! control-plane store so the convertors themselves stay pure.

use std::collections::{BTreeMap, HashMap};

use gatesync_core::config::{GatesyncConfig, StageConfig, parse_engine_version};
use gatesync_core::labels;
use gatesync_state::{
    Gateway, MicroGateway, PluginConfig, PublishId, PublishTask, ResourceId, ResourceVersion,
    ScopeType, Stage, StateStore,
};
use tracing::{debug, warn};

use crate::error::{ConvertError, ConvertResult};

/// Path prefix of every route published to a shared cluster.
pub const SHARED_BASE_PATH: &str = "/api";

/// A plugin config resolved through its binding.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundPlugin {
    pub type_code: String,
    pub name: String,
    pub config: serde_json::Value,
}

impl BoundPlugin {
    pub fn from_config(config: &PluginConfig) -> ConvertResult<Self> {
        Ok(Self {
            type_code: config.type_code.clone(),
            name: config.name.clone(),
            config: parse_plugin_yaml(&config.name, &config.yaml)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ReleaseSnapshot {
    pub gateway: Gateway,
    pub stage: Stage,
    pub version: ResourceVersion,
    pub micro_gateway: MicroGateway,
    pub publish_id: PublishId,
    pub engine_version: semver::Version,
    /// Stage-scoped plugins in binding order.
    pub stage_plugins: Vec<BoundPlugin>,
    /// Resource-scoped plugins in binding order.
    pub resource_plugins: BTreeMap<ResourceId, Vec<BoundPlugin>>,
    pub stage_config: StageConfig,
}

impl ReleaseSnapshot {
    /// Load the snapshot for one publish task.
    pub fn load(
        store: &StateStore,
        task: &PublishTask,
        config: &GatesyncConfig,
    ) -> ConvertResult<Self> {
        let gateway = store
            .get_gateway(task.gateway_id)?
            .ok_or_else(|| ConvertError::NotFound(format!("gateway {}", task.gateway_id)))?;
        let stage = store
            .get_stage(task.gateway_id, task.stage_id)?
            .ok_or_else(|| ConvertError::NotFound(format!("stage {}", task.stage_id)))?;
        let version = store
            .get_resource_version(task.gateway_id, task.resource_version_id)?
            .ok_or_else(|| {
                ConvertError::NotFound(format!("resource version {}", task.resource_version_id))
            })?;
        let micro_gateway = store.get_micro_gateway(task.micro_gateway_id)?.ok_or_else(|| {
            ConvertError::NotFound(format!("micro-gateway {}", task.micro_gateway_id))
        })?;

        let raw_version = micro_gateway
            .config
            .engine_version
            .as_deref()
            .unwrap_or(&config.publish.default_engine_version);
        let engine_version =
            parse_engine_version(raw_version).map_err(|e| ConvertError::EngineVersion {
                version: raw_version.to_string(),
                reason: e.to_string(),
            })?;

        let configs: HashMap<_, _> = store
            .list_plugin_configs(task.gateway_id)?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();
        let resource_ids: Vec<ResourceId> = version.resources.iter().map(|r| r.id).collect();

        let mut stage_plugins = Vec::new();
        let mut resource_plugins: BTreeMap<ResourceId, Vec<BoundPlugin>> = BTreeMap::new();
        for binding in store.list_plugin_bindings(task.gateway_id)? {
            let Some(plugin_config) = configs.get(&binding.config_id) else {
                warn!(
                    binding_id = binding.id,
                    config_id = binding.config_id,
                    "plugin binding points at a missing config, skipping"
                );
                continue;
            };
            match binding.scope_type {
                ScopeType::Stage if binding.scope_id == stage.id => {
                    stage_plugins.push(BoundPlugin::from_config(plugin_config)?);
                }
                ScopeType::Resource if resource_ids.contains(&binding.scope_id) => {
                    resource_plugins
                        .entry(binding.scope_id)
                        .or_default()
                        .push(BoundPlugin::from_config(plugin_config)?);
                }
                _ => {}
            }
        }

        debug!(
            publish_id = task.publish_id,
            gateway = %gateway.name,
            stage = %stage.name,
            version = %version.version,
            stage_plugins = stage_plugins.len(),
            "release snapshot loaded"
        );

        Ok(Self {
            gateway,
            stage,
            version,
            micro_gateway,
            publish_id: task.publish_id,
            engine_version,
            stage_plugins,
            resource_plugins,
            stage_config: config.stage.clone(),
        })
    }

    /// Labels stamped on every resource converted from this snapshot.
    pub fn labels(&self) -> BTreeMap<String, String> {
        let mut labels = ownership_selector(&self.gateway.name, &self.stage.name);
        labels.insert(labels::PUBLISH_ID.to_string(), self.publish_id.to_string());
        labels.insert(
            labels::ENGINE_VERSION.to_string(),
            self.engine_version.to_string(),
        );
        labels
    }

    /// Route prefix on the target cluster. Shared clusters namespace
    /// every route by gateway and stage.
    pub fn path_prefix(&self) -> String {
        if self.micro_gateway.is_shared {
            format!("{SHARED_BASE_PATH}/{}/{}", self.gateway.name, self.stage.name)
        } else {
            String::new()
        }
    }

    /// `{gateway}.{stage}`; shared by the ids of every stage-owned resource.
    pub fn stage_resource_id(&self) -> String {
        format!("{}.{}", self.gateway.name, self.stage.name)
    }
}

/// Labels that identify the resources owned by one (gateway, stage) pair.
pub fn ownership_selector(gateway: &str, stage: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (labels::GATEWAY.to_string(), gateway.to_string()),
        (labels::STAGE.to_string(), stage.to_string()),
    ])
}

fn parse_plugin_yaml(name: &str, yaml: &str) -> ConvertResult<serde_json::Value> {
    if yaml.trim().is_empty() {
        return Ok(serde_json::Value::Object(Default::default()));
    }
    let value: serde_json::Value =
        serde_yaml::from_str(yaml).map_err(|e| ConvertError::PluginConfig {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
    Ok(match value {
        serde_json::Value::Null => serde_json::Value::Object(Default::default()),
        other => other,
    })
}
