//! Typed data-plane resources.
//!
//! Every resource is stored in the registry at `{key_prefix}/{kind}/{id}`
//! as JSON. Ownership labels travel with the resource so a registry scoped
//! to one (gateway, stage) pair can tell its own keys apart from others
//! sharing the same prefix.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use gatesync_core::labels;
use gatesync_state::LoadBalance;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    GatewayConfig,
    Stage,
    Service,
    Route,
    PluginMetadata,
}

impl ResourceKind {
    /// Conversion order: later kinds may reference earlier ones.
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::GatewayConfig,
        ResourceKind::Stage,
        ResourceKind::Service,
        ResourceKind::Route,
        ResourceKind::PluginMetadata,
    ];

    /// Kinds with one set of keys per cluster rather than per stage. Any
    /// publish to the cluster owns them.
    pub fn is_cluster_wide(self) -> bool {
        matches!(self, ResourceKind::GatewayConfig | ResourceKind::PluginMetadata)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::GatewayConfig => "gateway-config",
            ResourceKind::Stage => "stage",
            ResourceKind::Service => "service",
            ResourceKind::Route => "route",
            ResourceKind::PluginMetadata => "plugin-metadata",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown resource kind: {s}"))
    }
}

/// Registry key of one resource.
pub fn resource_key(key_prefix: &str, kind: ResourceKind, id: &str) -> String {
    format!("{}{}", kind_prefix(key_prefix, kind), id)
}

/// Prefix shared by every key of one kind.
pub fn kind_prefix(key_prefix: &str, kind: ResourceKind) -> String {
    format!("{}/{}/", key_prefix.trim_end_matches('/'), kind.as_str())
}

/// A plugin as the data plane sees it: a name and its JSON config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginEntry {
    pub name: String,
    pub config: serde_json::Value,
}

impl PluginEntry {
    pub fn new(name: &str, config: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            config,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeResource {
    pub kind: ResourceKind,
    pub id: String,
    pub labels: BTreeMap<String, String>,
    pub spec: ResourceSpec,
    /// Set on revoke: the registry removes the key instead of writing it.
    #[serde(skip)]
    pub revoked: bool,
}

impl RuntimeResource {
    pub fn new(id: impl Into<String>, labels: BTreeMap<String, String>, spec: ResourceSpec) -> Self {
        Self {
            kind: spec.kind(),
            id: id.into(),
            labels,
            spec,
            revoked: false,
        }
    }

    pub fn key(&self, key_prefix: &str) -> String {
        resource_key(key_prefix, self.kind, &self.id)
    }

    /// True when every selector label is present with the same value.
    pub fn matches_selector(&self, selector: &BTreeMap<String, String>) -> bool {
        selector
            .iter()
            .all(|(key, value)| self.labels.get(key) == Some(value))
    }

    pub fn publish_id(&self) -> Option<&str> {
        self.labels.get(labels::PUBLISH_ID).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceSpec {
    GatewayConfig(GatewayConfigSpec),
    Stage(StageSpec),
    Service(ServiceSpec),
    Route(RouteSpec),
    PluginMetadata(PluginMetadataSpec),
}

impl ResourceSpec {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceSpec::GatewayConfig(_) => ResourceKind::GatewayConfig,
            ResourceSpec::Stage(_) => ResourceKind::Stage,
            ResourceSpec::Service(_) => ResourceKind::Service,
            ResourceSpec::Route(_) => ResourceKind::Route,
            ResourceSpec::PluginMetadata(_) => ResourceKind::PluginMetadata,
        }
    }
}

/// Per-cluster settings the data plane needs to call back home.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfigSpec {
    pub instance_id: String,
    pub controller_endpoint: String,
    pub base_path: String,
    pub auth_secret: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    pub name: String,
    pub description: String,
    pub vars: BTreeMap<String, String>,
    /// Order matters: the data plane runs plugins in this order.
    pub plugins: Vec<PluginEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub scheme: String,
    pub loadbalance: LoadBalance,
    pub timeout_secs: u64,
    pub nodes: Vec<UpstreamNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamNode {
    pub host: String,
    pub port: u16,
    pub weight: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSpec {
    pub name: String,
    pub uri: String,
    pub methods: Vec<String>,
    pub enable_websocket: bool,
    /// Id of the service this route proxies to; `None` for mocked routes.
    pub service_id: Option<String>,
    pub timeout_secs: Option<u64>,
    pub plugins: Vec<PluginEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginMetadataSpec {
    pub name: String,
    pub config: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata(id: &str, stage: &str) -> RuntimeResource {
        let labels = BTreeMap::from([
            (labels::GATEWAY.to_string(), "demo".to_string()),
            (labels::STAGE.to_string(), stage.to_string()),
            (labels::PUBLISH_ID.to_string(), "7".to_string()),
        ]);
        RuntimeResource::new(
            id,
            labels,
            ResourceSpec::PluginMetadata(PluginMetadataSpec {
                name: id.to_string(),
                config: json!({}),
            }),
        )
    }

    #[test]
    fn keys_are_prefix_kind_id() {
        let resource = metadata("file-logger", "prod");
        assert_eq!(resource.key("/gatesync/a/"), "/gatesync/a/plugin-metadata/file-logger");
        assert_eq!(kind_prefix("/gatesync/a", ResourceKind::Route), "/gatesync/a/route/");
    }

    #[test]
    fn kind_follows_spec() {
        assert_eq!(metadata("x", "prod").kind, ResourceKind::PluginMetadata);
        for kind in ResourceKind::ALL {
            assert_eq!(kind.as_str().parse::<ResourceKind>().unwrap(), kind);
        }
        assert!("upstream".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn selector_requires_all_labels() {
        let resource = metadata("x", "prod");
        let prod = BTreeMap::from([
            (labels::GATEWAY.to_string(), "demo".to_string()),
            (labels::STAGE.to_string(), "prod".to_string()),
        ]);
        let test = BTreeMap::from([
            (labels::GATEWAY.to_string(), "demo".to_string()),
            (labels::STAGE.to_string(), "test".to_string()),
        ]);
        assert!(resource.matches_selector(&prod));
        assert!(!resource.matches_selector(&test));
        assert!(resource.matches_selector(&BTreeMap::new()));
        assert_eq!(resource.publish_id(), Some("7"));
    }

    #[test]
    fn revoked_flag_is_not_serialized() {
        let mut resource = metadata("x", "prod");
        resource.revoked = true;
        let decoded: RuntimeResource =
            serde_json::from_slice(&serde_json::to_vec(&resource).unwrap()).unwrap();
        assert!(!decoded.revoked);
        assert_eq!(decoded.spec, resource.spec);
    }
}
