use serde_json::json;

use crate::error::ConvertResult;
use crate::resource::{PluginEntry, ResourceKind, ResourceSpec, RuntimeResource, StageSpec};
use crate::snapshot::ReleaseSnapshot;

use super::Convertor;

/// Built-in plugins every stage runs, in execution order.
pub const DEFAULT_STAGE_PLUGINS: [&str; 12] = [
    "gs-request-id",
    "gs-real-ip",
    "gs-stage-context",
    "gs-auth-verify",
    "gs-auth-validate",
    "gs-username-required",
    "gs-jwt",
    "gs-delete-sensitive",
    "gs-delete-cookie",
    "gs-response-check",
    "gs-debug",
    "gs-error-wrapper",
];

pub const GLOBAL_RATE_LIMIT_PLUGIN: &str = "gs-global-rate-limit";

#[derive(Debug, Default, Clone, Copy)]
pub struct StageConvertor;

impl StageConvertor {
    fn default_plugins(snapshot: &ReleaseSnapshot) -> Vec<PluginEntry> {
        let stage_config = &snapshot.stage_config;
        let [
            request_id,
            real_ip,
            stage_context,
            auth_verify,
            auth_validate,
            username_required,
            jwt,
            delete_sensitive,
            delete_cookie,
            response_check,
            debug,
            error_wrapper,
        ] = DEFAULT_STAGE_PLUGINS;

        vec![
            PluginEntry::new(request_id, json!({})),
            PluginEntry::new(
                real_ip,
                json!({
                    "source": stage_config.real_ip_header,
                    "recursive": true,
                    "trusted_addresses": stage_config.trusted_proxies,
                }),
            ),
            PluginEntry::new(
                stage_context,
                json!({
                    "gateway": snapshot.gateway.name,
                    "stage": snapshot.stage.name,
                    "instance_id": snapshot.micro_gateway.name,
                }),
            ),
            PluginEntry::new(auth_verify, json!({})),
            PluginEntry::new(auth_validate, json!({})),
            PluginEntry::new(username_required, json!({})),
            PluginEntry::new(jwt, json!({})),
            PluginEntry::new(delete_sensitive, json!({})),
            PluginEntry::new(delete_cookie, json!({})),
            PluginEntry::new(response_check, json!({})),
            PluginEntry::new(debug, json!({})),
            PluginEntry::new(error_wrapper, json!({})),
        ]
    }
}

impl Convertor for StageConvertor {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Stage
    }

    fn convert(&self, snapshot: &ReleaseSnapshot) -> ConvertResult<Vec<RuntimeResource>> {
        let mut plugins = Self::default_plugins(snapshot);

        plugins.extend(
            snapshot
                .stage_plugins
                .iter()
                .map(|p| PluginEntry::new(&p.type_code, p.config.clone())),
        );

        // No settings entry means the global limit is off.
        if let Some(rule) = &snapshot.gateway.settings.global_rate_limit {
            plugins.push(PluginEntry::new(
                GLOBAL_RATE_LIMIT_PLUGIN,
                json!({ "tokens": rule.tokens, "period": rule.period_secs }),
            ));
        }

        let stage = &snapshot.stage;
        let spec = StageSpec {
            name: stage.name.clone(),
            description: stage.description.clone(),
            vars: stage.vars.clone(),
            plugins,
        };
        Ok(vec![RuntimeResource::new(
            snapshot.stage_resource_id(),
            snapshot.labels(),
            ResourceSpec::Stage(spec),
        )])
    }
}
