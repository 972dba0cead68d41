use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context as _;
use gatesync_plugin::{DesiredPlugin, PluginScope, PluginSynchronizer};
use gatesync_state::{GatewayId, ScopeType};
use serde::Deserialize;

use super::Context;

/// One scope of a plugin declaration file.
#[derive(Debug, Deserialize)]
struct ScopeDeclaration {
    scope: ScopeType,
    scope_id: u64,
    #[serde(default)]
    plugins: Vec<DesiredPlugin>,
}

fn parse_declaration(content: &str) -> anyhow::Result<BTreeMap<PluginScope, Vec<DesiredPlugin>>> {
    let scopes: Vec<ScopeDeclaration> = serde_yaml::from_str(content)?;
    let mut desired: BTreeMap<PluginScope, Vec<DesiredPlugin>> = BTreeMap::new();
    for scope in scopes {
        desired
            .entry((scope.scope, scope.scope_id))
            .or_default()
            .extend(scope.plugins);
    }
    Ok(desired)
}

pub fn sync(ctx: &Context, gateway_id: GatewayId, file: &Path) -> anyhow::Result<()> {
    if ctx.store.get_gateway(gateway_id)?.is_none() {
        anyhow::bail!("gateway {gateway_id} not found");
    }
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let desired = parse_declaration(&content)
        .with_context(|| format!("parsing {}", file.display()))?;

    let report = PluginSynchronizer::new(&ctx.store, ctx.config.plugin_sync.batch_size)
        .sync(gateway_id, &desired)?;
    println!(
        "✓ plugins synchronized: created={} updated={} unchanged={} deleted={}",
        report.created, report.updated, report.unchanged, report.deleted
    );
    Ok(())
}
