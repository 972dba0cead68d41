use std::collections::BTreeSet;

use gatesync_state::{ProxyConfig, ResourceDescriptor};
use serde_json::json;

use crate::error::{ConvertError, ConvertResult};
use crate::resource::{PluginEntry, ResourceKind, ResourceSpec, RouteSpec, RuntimeResource};
use crate::snapshot::ReleaseSnapshot;
use crate::uri::{render_route_path, render_upstream_path};

use super::{Convertor, ServiceConvertor};

const ANY_METHOD: &str = "ANY";

/// Emits one route per resource descriptor.
///
/// Routes reference services by id, so the convertor is built from the
/// service convertor's output.
#[derive(Debug, Clone)]
pub struct HttpResourceConvertor {
    service_ids: BTreeSet<String>,
    revoke: bool,
}

impl HttpResourceConvertor {
    pub fn new(services: &[RuntimeResource], revoke: bool) -> Self {
        Self {
            service_ids: services
                .iter()
                .filter(|s| s.kind == ResourceKind::Service)
                .map(|s| s.id.clone())
                .collect(),
            revoke,
        }
    }

    fn convert_resource(
        &self,
        snapshot: &ReleaseSnapshot,
        resource: &ResourceDescriptor,
    ) -> ConvertResult<RuntimeResource> {
        let stage = &snapshot.stage;

        let mut uri = snapshot.path_prefix();
        uri.push_str(&render_route_path(&resource.path, &stage.vars));
        if resource.match_subpath {
            let trimmed = uri.trim_end_matches('/').len();
            uri.truncate(trimmed);
            uri.push_str("/*");
        }

        let mut plugins = vec![
            PluginEntry::new(
                "gs-resource-context",
                json!({
                    "resource_id": resource.id,
                    "resource_name": resource.name,
                }),
            ),
            PluginEntry::new(
                "gs-auth-config",
                json!({
                    "app_verified_required": resource.auth.app_verified_required,
                    "auth_verified_required": resource.auth.auth_verified_required,
                    "resource_perm_required": resource.auth.resource_perm_required,
                    "skip_auth_verification": resource.auth.skip_auth_verification,
                }),
            ),
        ];

        let (service_id, timeout_secs) = match &resource.proxy {
            ProxyConfig::Http {
                backend_id,
                method,
                path,
                timeout_secs,
            } => {
                if stage.backend(*backend_id).is_none() {
                    return Err(ConvertError::MissingBackend {
                        backend_id: *backend_id,
                        stage: stage.name.clone(),
                    });
                }
                let service_id = ServiceConvertor::service_id(snapshot, *backend_id);
                if !self.service_ids.contains(&service_id) {
                    return Err(ConvertError::MissingService {
                        resource_id: resource.id,
                        backend_id: *backend_id,
                    });
                }
                plugins.push(PluginEntry::new(
                    "proxy-rewrite",
                    json!({
                        "uri": render_upstream_path(path, &stage.vars),
                        "method": method,
                    }),
                ));
                (Some(service_id), *timeout_secs)
            }
            ProxyConfig::Mock {
                status,
                body,
                headers,
            } => {
                plugins.push(PluginEntry::new(
                    "mocking",
                    json!({
                        "response_status": status,
                        "response_example": body,
                        "response_headers": headers,
                    }),
                ));
                (None, None)
            }
        };

        if let Some(bound) = snapshot.resource_plugins.get(&resource.id) {
            plugins.extend(
                bound
                    .iter()
                    .map(|p| PluginEntry::new(&p.type_code, p.config.clone())),
            );
        }

        let methods = if resource.method.eq_ignore_ascii_case(ANY_METHOD) {
            Vec::new()
        } else {
            vec![resource.method.to_ascii_uppercase()]
        };

        let spec = RouteSpec {
            name: resource.name.clone(),
            uri,
            methods,
            enable_websocket: resource.enable_websocket,
            service_id,
            timeout_secs,
            plugins,
        };
        let mut route = RuntimeResource::new(
            format!("{}.{}", snapshot.stage_resource_id(), resource.id),
            snapshot.labels(),
            ResourceSpec::Route(spec),
        );
        route.revoked = self.revoke;
        Ok(route)
    }
}

impl Convertor for HttpResourceConvertor {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Route
    }

    fn convert(&self, snapshot: &ReleaseSnapshot) -> ConvertResult<Vec<RuntimeResource>> {
        snapshot
            .version
            .resources
            .iter()
            .map(|resource| self.convert_resource(snapshot, resource))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::snapshot::BoundPlugin;
    use crate::snapshot::testing::{http_resource, sample_snapshot};

    fn route_spec(resource: &RuntimeResource) -> &RouteSpec {
        match &resource.spec {
            ResourceSpec::Route(spec) => spec,
            other => panic!("expected route, got {other:?}"),
        }
    }

    fn convert(snapshot: &ReleaseSnapshot, revoke: bool) -> ConvertResult<Vec<RuntimeResource>> {
        let services = ServiceConvertor.convert(snapshot)?;
        HttpResourceConvertor::new(&services, revoke).convert(snapshot)
    }

    #[test]
    fn route_uses_both_renderers() {
        let snapshot = sample_snapshot();
        let routes = convert(&snapshot, false).unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].id, "demo.prod.10");
        assert!(!routes[0].revoked);

        let spec = route_spec(&routes[0]);
        assert_eq!(spec.uri, "/v1/users/:id");
        assert_eq!(spec.methods, ["GET"]);
        assert_eq!(spec.service_id.as_deref(), Some("demo.prod.1"));
        let names: Vec<&str> = spec.plugins.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["gs-resource-context", "gs-auth-config", "proxy-rewrite"]);
        assert_eq!(spec.plugins[2].config["uri"], "/v1/users/${id}");
    }

    #[test]
    fn shared_cluster_prefix_and_subpath_wildcard() {
        let mut snapshot = sample_snapshot();
        snapshot.micro_gateway.is_shared = true;
        snapshot.version.resources[0].match_subpath = true;
        snapshot.version.resources[0].path = "/files/".to_string();

        let routes = convert(&snapshot, false).unwrap();
        assert_eq!(route_spec(&routes[0]).uri, "/api/demo/prod/files/*");
    }

    #[test]
    fn mock_proxy_emits_mocking_plugin() {
        let mut snapshot = sample_snapshot();
        snapshot.version.resources[0].method = "ANY".to_string();
        snapshot.version.resources[0].proxy = ProxyConfig::Mock {
            status: 418,
            body: "teapot".to_string(),
            headers: BTreeMap::from([("x-mock".to_string(), "1".to_string())]),
        };

        let routes = convert(&snapshot, false).unwrap();
        let spec = route_spec(&routes[0]);
        assert!(spec.methods.is_empty());
        assert_eq!(spec.service_id, None);
        assert_eq!(spec.plugins[2].name, "mocking");
        assert_eq!(spec.plugins[2].config["response_status"], 418);
        assert_eq!(spec.plugins[2].config["response_headers"]["x-mock"], "1");
    }

    #[test]
    fn resource_plugins_are_appended() {
        let mut snapshot = sample_snapshot();
        snapshot.resource_plugins.insert(
            10,
            vec![BoundPlugin {
                type_code: "ip-restriction".to_string(),
                name: "ip".to_string(),
                config: json!({"whitelist": ["10.0.0.1"]}),
            }],
        );
        let routes = convert(&snapshot, false).unwrap();
        let spec = route_spec(&routes[0]);
        assert_eq!(spec.plugins.last().unwrap().name, "ip-restriction");
    }

    #[test]
    fn missing_service_is_an_error() {
        let snapshot = sample_snapshot();
        let err = HttpResourceConvertor::new(&[], false)
            .convert(&snapshot)
            .unwrap_err();
        assert!(matches!(
            err,
            ConvertError::MissingService { resource_id: 10, backend_id: 1 }
        ));
    }

    #[test]
    fn unknown_backend_is_an_error() {
        let mut snapshot = sample_snapshot();
        snapshot.version.resources.push(http_resource(11, "/x", 99));
        let err = convert(&snapshot, false).unwrap_err();
        assert!(matches!(err, ConvertError::MissingBackend { backend_id: 99, .. }));
    }

    #[test]
    fn revoke_flags_every_route() {
        let mut snapshot = sample_snapshot();
        snapshot.version.resources.push(http_resource(11, "/x", 1));
        let routes = convert(&snapshot, true).unwrap();
        assert_eq!(routes.len(), 2);
        assert!(routes.iter().all(|r| r.revoked));
    }
}
