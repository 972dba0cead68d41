//! Declarative plugin binding reconciliation.

use std::collections::{BTreeMap, HashMap, HashSet};

use gatesync_state::{
    BindingSource, GatewayId, NewPluginBinding, PluginBinding, PluginChangeBatch, PluginConfig,
    ScopeType, StateError, StateStore,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum PluginSyncError {
    #[error(transparent)]
    State(#[from] StateError),
}

/// A stage or resource plugins are bound to.
pub type PluginScope = (ScopeType, u64);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredPlugin {
    pub type_code: String,
    pub yaml: String,
}

impl DesiredPlugin {
    pub fn new(type_code: &str, yaml: &str) -> Self {
        Self {
            type_code: type_code.to_string(),
            yaml: yaml.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PluginSyncReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
}

/// One pending change; changes are grouped into write batches.
enum Change {
    Create(NewPluginBinding),
    UpdateConfig(PluginConfig),
    UpdateBinding(PluginBinding),
    Delete(PluginBinding),
}

pub struct PluginSynchronizer<'a> {
    store: &'a StateStore,
    batch_size: usize,
}

impl<'a> PluginSynchronizer<'a> {
    pub fn new(store: &'a StateStore, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Reconcile the gateway's bindings with `desired`.
    ///
    /// Scopes absent from `desired` are treated as wanting no plugins, so
    /// their import-derived bindings are removed.
    pub fn sync(
        &self,
        gateway_id: GatewayId,
        desired: &BTreeMap<PluginScope, Vec<DesiredPlugin>>,
    ) -> Result<PluginSyncReport, PluginSyncError> {
        let configs: HashMap<_, _> = self
            .store
            .list_plugin_configs(gateway_id)?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();
        let bindings = self.store.list_plugin_bindings(gateway_id)?;
        let index: HashMap<_, _> = bindings.iter().map(|b| (b.scope_key(), b)).collect();

        let mut report = PluginSyncReport::default();
        let mut changes = Vec::new();
        let mut visited = HashSet::new();

        for (&(scope_type, scope_id), plugins) in desired {
            let mut seen_types = HashSet::new();
            for plugin in plugins {
                if !seen_types.insert(plugin.type_code.as_str()) {
                    debug!(
                        scope = scope_type.as_str(),
                        scope_id,
                        type_code = %plugin.type_code,
                        "duplicate plugin declaration ignored"
                    );
                    continue;
                }

                let key = (scope_type, scope_id, plugin.type_code.clone());
                let existing = index
                    .get(&key)
                    .and_then(|binding| configs.get(&binding.config_id).map(|c| (*binding, c)));

                match existing {
                    Some((binding, config)) => {
                        visited.insert(binding.id);
                        if config.yaml == plugin.yaml {
                            report.unchanged += 1;
                        } else {
                            changes.push(Change::UpdateConfig(PluginConfig {
                                yaml: plugin.yaml.clone(),
                                ..config.clone()
                            }));
                            report.updated += 1;
                        }
                        if binding.source != BindingSource::ImportDerived {
                            changes.push(Change::UpdateBinding(PluginBinding {
                                source: BindingSource::ImportDerived,
                                ..binding.clone()
                            }));
                        }
                    }
                    None => {
                        changes.push(Change::Create(NewPluginBinding {
                            scope_type,
                            scope_id,
                            type_code: plugin.type_code.clone(),
                            name: synthetic_name(&plugin.type_code, scope_type, scope_id),
                            yaml: plugin.yaml.clone(),
                            source: BindingSource::ImportDerived,
                        }));
                        report.created += 1;
                    }
                }
            }
        }

        for binding in &bindings {
            if !visited.contains(&binding.id) && binding.source == BindingSource::ImportDerived {
                changes.push(Change::Delete(binding.clone()));
                report.deleted += 1;
            }
        }

        let mut batches = 0;
        let mut pending = changes.into_iter().peekable();
        while pending.peek().is_some() {
            let mut batch = PluginChangeBatch::default();
            for change in pending.by_ref().take(self.batch_size) {
                match change {
                    Change::Create(new) => batch.creates.push(new),
                    Change::UpdateConfig(config) => batch.config_updates.push(config),
                    Change::UpdateBinding(binding) => batch.binding_updates.push(binding),
                    Change::Delete(binding) => batch.deletes.push(binding),
                }
            }
            self.store.apply_plugin_changes(gateway_id, &batch)?;
            batches += 1;
        }

        info!(
            gateway_id,
            created = report.created,
            updated = report.updated,
            unchanged = report.unchanged,
            deleted = report.deleted,
            batches,
            "plugin bindings synchronized"
        );
        Ok(report)
    }
}

/// `{type_code}-{scope_type}-{scope_id}`
fn synthetic_name(type_code: &str, scope_type: ScopeType, scope_id: u64) -> String {
    format!("{type_code}-{}-{scope_id}", scope_type.as_str())
}
