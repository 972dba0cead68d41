//! Domain types for the gatesync control-plane store.
//!
//! These types represent gateways, stages, immutable resource versions,
//! releases and their history, publish tasks and events, target clusters
//! (micro-gateways), and plugin configs/bindings. All types are serializable
//! to/from JSON for storage in redb tables.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type GatewayId = u64;
pub type StageId = u64;
pub type BackendId = u64;
pub type ResourceId = u64;
pub type ResourceVersionId = u64;
pub type HistoryId = u64;
pub type PublishId = u64;
pub type MicroGatewayId = u64;
pub type PluginConfigId = u64;
pub type PluginBindingId = u64;

/// Key for a top-level record.
pub fn id_key(id: u64) -> String {
    format!("{id:020}")
}

/// Key for a record owned by a parent record.
pub fn child_key(parent: u64, id: u64) -> String {
    format!("{parent:020}/{id:020}")
}

/// Prefix matching every child of a parent record.
pub fn child_prefix(parent: u64) -> String {
    format!("{parent:020}/")
}

// ── Gateway ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Gateway {
    pub id: GatewayId,
    pub name: String,
    pub settings: GatewaySettings,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Gateway-wide settings that influence the stage plugin chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GatewaySettings {
    /// Global rate limit. `None` means the data plane gets no entry at all.
    pub global_rate_limit: Option<RateLimitRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitRule {
    pub tokens: u64,
    pub period_secs: u64,
}

// ── Stage ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stage {
    pub id: StageId,
    pub gateway_id: GatewayId,
    pub name: String,
    pub description: String,
    /// Stage variables substituted into `{env.NAME}` placeholders.
    pub vars: BTreeMap<String, String>,
    /// Dedicated target clusters. Empty means the shared cluster.
    pub micro_gateway_ids: Vec<MicroGatewayId>,
    pub backends: Vec<StageBackend>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Stage {
    pub fn table_key(&self) -> String {
        child_key(self.gateway_id, self.id)
    }

    pub fn backend(&self, backend_id: BackendId) -> Option<&StageBackend> {
        self.backends.iter().find(|b| b.backend_id == backend_id)
    }
}

/// A backend as configured for one stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageBackend {
    pub backend_id: BackendId,
    pub name: String,
    pub config: BackendConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    pub loadbalance: LoadBalance,
    pub timeout_secs: u64,
    pub hosts: Vec<BackendHost>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalance {
    #[default]
    RoundRobin,
    WeightedRoundRobin,
}

/// One upstream host, e.g. `http://backend.svc:8080`. The host part may
/// reference stage variables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendHost {
    pub scheme: String,
    pub host: String,
    pub weight: u32,
}

// ── Resource version ──────────────────────────────────────────────

/// Immutable snapshot of a gateway's resources.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceVersion {
    pub id: ResourceVersionId,
    pub gateway_id: GatewayId,
    pub version: String,
    pub resources: Vec<ResourceDescriptor>,
    /// SHA-256 of the canonical JSON encoding of `resources`.
    pub fingerprint: String,
    pub created_at: u64,
}

impl ResourceVersion {
    pub fn table_key(&self) -> String {
        child_key(self.gateway_id, self.id)
    }

    /// Compute the fingerprint of a resource list.
    pub fn fingerprint_of(resources: &[ResourceDescriptor]) -> String {
        let mut hasher = Sha256::new();
        for resource in resources {
            // Serialization of plain data structs cannot fail.
            let bytes = serde_json::to_vec(resource).unwrap_or_default();
            hasher.update(&bytes);
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceDescriptor {
    pub id: ResourceId,
    pub name: String,
    pub method: String,
    /// Path template, e.g. `/users/{id}` or `/{env.prefix}/orders`.
    pub path: String,
    #[serde(default)]
    pub match_subpath: bool,
    #[serde(default)]
    pub enable_websocket: bool,
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Plugin type codes bound to this resource at snapshot time.
    #[serde(default)]
    pub plugin_refs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProxyConfig {
    Http {
        backend_id: BackendId,
        method: String,
        path: String,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    Mock {
        status: u16,
        body: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthConfig {
    pub app_verified_required: bool,
    pub auth_verified_required: bool,
    pub resource_perm_required: bool,
    pub skip_auth_verification: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            app_verified_required: true,
            auth_verified_required: false,
            resource_perm_required: false,
            skip_auth_verification: false,
        }
    }
}

// ── Release ───────────────────────────────────────────────────────

/// Current binding of one stage to one resource version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Release {
    pub gateway_id: GatewayId,
    pub stage_id: StageId,
    pub resource_version_id: ResourceVersionId,
    pub updated_by: String,
    pub updated_at: u64,
}

impl Release {
    pub fn table_key(&self) -> String {
        child_key(self.gateway_id, self.stage_id)
    }
}

/// Append-only record of one publish (or revoke) request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReleaseHistory {
    pub id: HistoryId,
    pub gateway_id: GatewayId,
    pub stage_ids: Vec<StageId>,
    pub resource_version_id: ResourceVersionId,
    /// Version string resolved at publish time.
    pub version: String,
    pub created_by: String,
    pub comment: String,
    pub revoke: bool,
    pub tasks: Vec<PublishTask>,
    /// Set when no publish job could be scheduled for a stage.
    pub failure: Option<String>,
    pub created_at: u64,
}

impl ReleaseHistory {
    pub fn table_key(&self) -> String {
        child_key(self.gateway_id, self.id)
    }
}

/// One (stage, target cluster) job of a publish request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishTask {
    pub publish_id: PublishId,
    pub history_id: HistoryId,
    pub gateway_id: GatewayId,
    pub stage_id: StageId,
    pub micro_gateway_id: MicroGatewayId,
    pub resource_version_id: ResourceVersionId,
    pub revoke: bool,
}

// ── Publish events ────────────────────────────────────────────────

/// Named publish steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStep {
    ValidateConfiguration,
    GenerateTask,
    DistributeConfiguration,
    ParseConfiguration,
    ApplyConfiguration,
    LoadConfiguration,
}

impl PublishStep {
    pub const ALL: [PublishStep; 6] = [
        PublishStep::ValidateConfiguration,
        PublishStep::GenerateTask,
        PublishStep::DistributeConfiguration,
        PublishStep::ParseConfiguration,
        PublishStep::ApplyConfiguration,
        PublishStep::LoadConfiguration,
    ];

    pub fn ordinal(self) -> u32 {
        match self {
            PublishStep::ValidateConfiguration => 1,
            PublishStep::GenerateTask => 2,
            PublishStep::DistributeConfiguration => 3,
            PublishStep::ParseConfiguration => 4,
            PublishStep::ApplyConfiguration => 5,
            PublishStep::LoadConfiguration => 6,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PublishStep::ValidateConfiguration => "validate_configuration",
            PublishStep::GenerateTask => "generate_task",
            PublishStep::DistributeConfiguration => "distribute_configuration",
            PublishStep::ParseConfiguration => "parse_configuration",
            PublishStep::ApplyConfiguration => "apply_configuration",
            PublishStep::LoadConfiguration => "load_configuration",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Doing,
    Success,
    Failure,
}

impl EventStatus {
    pub fn is_final(self) -> bool {
        matches!(self, EventStatus::Success | EventStatus::Failure)
    }

    /// Whether a step may move from `self` to `next`.
    pub fn can_transition_to(self, next: EventStatus) -> bool {
        match self {
            EventStatus::Pending => next != EventStatus::Pending,
            EventStatus::Doing => next.is_final(),
            EventStatus::Success | EventStatus::Failure => false,
        }
    }
}

/// Status of one step within one publish.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishEvent {
    pub publish_id: PublishId,
    pub step: PublishStep,
    pub status: EventStatus,
    pub ordinal: u32,
    pub detail: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl PublishEvent {
    pub fn new(publish_id: PublishId, step: PublishStep, status: EventStatus, now: u64) -> Self {
        Self {
            publish_id,
            step,
            status,
            ordinal: step.ordinal(),
            detail: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn table_key(&self) -> String {
        format!("{:020}/{:03}", self.publish_id, self.ordinal)
    }
}

// ── Micro-gateway ─────────────────────────────────────────────────

/// A target data-plane cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MicroGateway {
    pub id: MicroGatewayId,
    pub name: String,
    /// Owning gateway for dedicated clusters; `None` for shared ones.
    pub gateway_id: Option<GatewayId>,
    pub is_shared: bool,
    pub config: MicroGatewayConfig,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MicroGatewayConfig {
    /// Registry key prefix for this cluster, e.g. `/gatesync/prod-a`.
    pub key_prefix: String,
    /// Control-plane endpoint the data plane calls back to.
    pub endpoint: String,
    pub auth_secret: String,
    pub engine_version: Option<String>,
    /// Whether the data plane reports parse/apply/load steps back.
    #[serde(default)]
    pub reports_status: bool,
    /// Plugin metadata overrides, keyed by plugin name.
    #[serde(default)]
    pub plugin_metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub managed: Option<ManagedDeployment>,
}

/// Deployment metadata for clusters whose data plane is managed for the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManagedDeployment {
    pub namespace: String,
    pub release_name: String,
    pub chart_version: String,
}

// ── Plugins ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginConfig {
    pub id: PluginConfigId,
    pub gateway_id: GatewayId,
    pub name: String,
    pub type_code: String,
    pub yaml: String,
    pub created_at: u64,
    pub updated_at: u64,
}

impl PluginConfig {
    pub fn table_key(&self) -> String {
        child_key(self.gateway_id, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeType {
    Stage,
    Resource,
}

impl ScopeType {
    pub fn as_str(self) -> &'static str {
        match self {
            ScopeType::Stage => "stage",
            ScopeType::Resource => "resource",
        }
    }
}

/// Who created a binding. Only import-derived bindings are removed by sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingSource {
    UserCreated,
    ImportDerived,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginBinding {
    pub id: PluginBindingId,
    pub gateway_id: GatewayId,
    pub scope_type: ScopeType,
    pub scope_id: u64,
    pub config_id: PluginConfigId,
    pub type_code: String,
    pub source: BindingSource,
    pub created_at: u64,
    pub updated_at: u64,
}

impl PluginBinding {
    pub fn table_key(&self) -> String {
        child_key(self.gateway_id, self.id)
    }

    /// Uniqueness key within one gateway.
    pub fn scope_key(&self) -> (ScopeType, u64, String) {
        (self.scope_type, self.scope_id, self.type_code.clone())
    }
}
