//! Runs the convertors in dependency order.

use std::collections::BTreeSet;

use tracing::debug;

use crate::convertors::{
    Convertor, GatewayConfigConvertor, HttpResourceConvertor, PluginMetadataConvertor,
    ServiceConvertor, StageConvertor,
};
use crate::error::ConvertResult;
use crate::resource::{ResourceKind, RuntimeResource};
use crate::snapshot::ReleaseSnapshot;

/// Which kinds to convert, and whether the result removes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvertOptions {
    pub gateway_config: bool,
    pub stage: bool,
    pub services: bool,
    pub routes: bool,
    pub plugin_metadata: bool,
    /// Mark stage-owned resources as revoked.
    pub revoke: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            gateway_config: true,
            stage: true,
            services: true,
            routes: true,
            plugin_metadata: true,
            revoke: false,
        }
    }
}

impl ConvertOptions {
    pub fn plugin_metadata_only() -> Self {
        Self {
            gateway_config: false,
            stage: false,
            services: false,
            routes: false,
            plugin_metadata: true,
            revoke: false,
        }
    }

    /// Remove a stage from a cluster. Cluster-wide kinds are left alone
    /// since other stages may still depend on them.
    pub fn revoke() -> Self {
        Self {
            gateway_config: false,
            plugin_metadata: false,
            revoke: true,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self, kind: ResourceKind) -> bool {
        match kind {
            ResourceKind::GatewayConfig => self.gateway_config,
            ResourceKind::Stage => self.stage,
            ResourceKind::Service => self.services,
            ResourceKind::Route => self.routes,
            ResourceKind::PluginMetadata => self.plugin_metadata,
        }
    }

    pub fn kinds(&self) -> BTreeSet<ResourceKind> {
        ResourceKind::ALL
            .into_iter()
            .filter(|kind| self.is_enabled(*kind))
            .collect()
    }
}

/// Output of one conversion run.
#[derive(Debug, Clone, Default)]
pub struct ConvertedResources {
    /// Kinds that were converted. A sync only deletes keys of these kinds.
    pub kinds: BTreeSet<ResourceKind>,
    pub resources: Vec<RuntimeResource>,
}

impl ConvertedResources {
    pub fn of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &RuntimeResource> {
        self.resources.iter().filter(move |r| r.kind == kind)
    }
}

/// Converts one snapshot into the full desired resource set for a cluster.
pub struct CustomResourceConvertor<'a> {
    snapshot: &'a ReleaseSnapshot,
    options: ConvertOptions,
}

impl<'a> CustomResourceConvertor<'a> {
    pub fn new(snapshot: &'a ReleaseSnapshot, options: ConvertOptions) -> Self {
        Self { snapshot, options }
    }

    pub fn convert(&self) -> ConvertResult<ConvertedResources> {
        let snapshot = self.snapshot;
        let options = self.options;
        let mut output = ConvertedResources {
            kinds: options.kinds(),
            resources: Vec::new(),
        };

        if options.gateway_config {
            output.resources.extend(GatewayConfigConvertor.convert(snapshot)?);
        }

        if options.stage {
            let mut stages = StageConvertor.convert(snapshot)?;
            mark_revoked(&mut stages, options.revoke);
            output.resources.extend(stages);
        }

        // Routes need the service ids even when services are not emitted.
        if options.services || options.routes {
            let mut services = ServiceConvertor.convert(snapshot)?;
            if options.routes {
                let routes = HttpResourceConvertor::new(&services, options.revoke).convert(snapshot)?;
                if options.services {
                    mark_revoked(&mut services, options.revoke);
                    output.resources.extend(services);
                }
                output.resources.extend(routes);
            } else {
                mark_revoked(&mut services, options.revoke);
                output.resources.extend(services);
            }
        }

        if options.plugin_metadata {
            output.resources.extend(PluginMetadataConvertor.convert(snapshot)?);
        }

        debug!(
            publish_id = snapshot.publish_id,
            gateway = %snapshot.gateway.name,
            stage = %snapshot.stage.name,
            resources = output.resources.len(),
            revoke = options.revoke,
            "release converted"
        );
        Ok(output)
    }
}

fn mark_revoked(resources: &mut [RuntimeResource], revoke: bool) {
    for resource in resources {
        resource.revoked = revoke;
    }
}
