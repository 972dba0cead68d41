use gatesync_state::{BackendHost, StageBackend};

use crate::error::{ConvertError, ConvertResult};
use crate::resource::{ResourceKind, ResourceSpec, RuntimeResource, ServiceSpec, UpstreamNode};
use crate::snapshot::ReleaseSnapshot;
use crate::uri::substitute_env;

use super::Convertor;

/// Emits one service per backend configured on the stage.
#[derive(Debug, Default, Clone, Copy)]
pub struct ServiceConvertor;

impl ServiceConvertor {
    /// `{gateway}.{stage}.{backend_id}`
    pub fn service_id(snapshot: &ReleaseSnapshot, backend_id: u64) -> String {
        format!("{}.{backend_id}", snapshot.stage_resource_id())
    }

    fn convert_backend(
        snapshot: &ReleaseSnapshot,
        backend: &StageBackend,
    ) -> ConvertResult<RuntimeResource> {
        let nodes = backend
            .config
            .hosts
            .iter()
            .map(|host| {
                let rendered = BackendHost {
                    host: substitute_env(&host.host, &snapshot.stage.vars),
                    ..host.clone()
                };
                parse_upstream_node(&rendered)
            })
            .collect::<ConvertResult<Vec<_>>>()?;

        let scheme = backend
            .config
            .hosts
            .first()
            .map(|h| h.scheme.clone())
            .unwrap_or_else(|| "http".to_string());

        let spec = ServiceSpec {
            name: backend.name.clone(),
            scheme,
            loadbalance: backend.config.loadbalance,
            timeout_secs: backend.config.timeout_secs,
            nodes,
        };
        Ok(RuntimeResource::new(
            Self::service_id(snapshot, backend.backend_id),
            snapshot.labels(),
            ResourceSpec::Service(spec),
        ))
    }
}

impl Convertor for ServiceConvertor {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Service
    }

    fn convert(&self, snapshot: &ReleaseSnapshot) -> ConvertResult<Vec<RuntimeResource>> {
        snapshot
            .stage
            .backends
            .iter()
            .map(|backend| Self::convert_backend(snapshot, backend))
            .collect()
    }
}

/// Parse `[scheme://]host[:port]` into an upstream node. Without an explicit
/// port the scheme's default applies.
pub fn parse_upstream_node(host: &BackendHost) -> ConvertResult<UpstreamNode> {
    let invalid = |reason: &str| ConvertError::InvalidHost {
        host: host.host.clone(),
        reason: reason.to_string(),
    };

    let authority = match host.host.split_once("://") {
        Some((scheme, rest)) if scheme == host.scheme => rest,
        Some(_) => return Err(invalid("scheme does not match backend scheme")),
        None => host.host.as_str(),
    };
    let authority = authority.trim_end_matches('/');
    if authority.is_empty() {
        return Err(invalid("empty host"));
    }
    if authority.contains('/') {
        return Err(invalid("host must not contain a path"));
    }

    let (name, port) = if let Some(rest) = authority.strip_prefix('[') {
        // Bracketed IPv6 literal.
        let (addr, tail) = rest
            .split_once(']')
            .ok_or_else(|| invalid("unterminated IPv6 literal"))?;
        let port = match tail.strip_prefix(':') {
            Some(port) => Some(port),
            None if tail.is_empty() => None,
            None => return Err(invalid("unexpected characters after IPv6 literal")),
        };
        (format!("[{addr}]"), port)
    } else {
        match authority.rsplit_once(':') {
            Some((name, port)) => (name.to_string(), Some(port)),
            None => (authority.to_string(), None),
        }
    };

    let port = match port {
        Some(port) => port
            .parse::<u16>()
            .map_err(|_| invalid("port is not a number in 0..=65535"))?,
        None => default_port(&host.scheme).ok_or_else(|| invalid("unknown scheme"))?,
    };

    Ok(UpstreamNode {
        host: name,
        port,
        weight: host.weight,
    })
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" | "ws" => Some(80),
        "https" | "wss" => Some(443),
        "grpc" => Some(80),
        "grpcs" => Some(443),
        _ => None,
    }
}
