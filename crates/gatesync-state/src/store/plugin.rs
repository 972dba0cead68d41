//! Plugin configs and plugin bindings.
//!
//! A scope (stage or resource) holds at most one binding per plugin type;
//! binding a type to an occupied scope replaces the previous binding.

use std::collections::BTreeSet;

use tracing::{debug, info};

use super::{epoch_secs, get_json, map_err, next_id, put_json, remove_key, scan_json, StateStore};
use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// A config + binding pair to create.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPluginBinding {
    pub scope_type: ScopeType,
    pub scope_id: u64,
    pub type_code: String,
    pub name: String,
    pub yaml: String,
    pub source: BindingSource,
}

/// One write transaction's worth of plugin changes for a gateway.
#[derive(Debug, Clone, Default)]
pub struct PluginChangeBatch {
    pub creates: Vec<NewPluginBinding>,
    pub config_updates: Vec<PluginConfig>,
    pub binding_updates: Vec<PluginBinding>,
    /// Bindings to delete. A config goes with them once no binding uses it.
    pub deletes: Vec<PluginBinding>,
}

impl PluginChangeBatch {
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty()
            && self.config_updates.is_empty()
            && self.binding_updates.is_empty()
            && self.deletes.is_empty()
    }
}

impl StateStore {
    /// Create a reusable plugin config.
    pub fn create_plugin_config(
        &self,
        gateway_id: GatewayId,
        name: &str,
        type_code: &str,
        yaml: &str,
    ) -> StateResult<PluginConfig> {
        let txn = self.begin_write()?;
        let now = epoch_secs();
        let config = PluginConfig {
            id: next_id(&txn, "plugin_config")?,
            gateway_id,
            name: name.to_string(),
            type_code: type_code.to_string(),
            yaml: yaml.to_string(),
            created_at: now,
            updated_at: now,
        };
        put_json(&txn, PLUGIN_CONFIGS, &config.table_key(), &config)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(gateway_id, name, type_code, "plugin config created");
        Ok(config)
    }

    /// Attach a config to a scope, replacing any binding of the same type.
    pub fn bind_plugin(
        &self,
        gateway_id: GatewayId,
        scope_type: ScopeType,
        scope_id: u64,
        config_id: PluginConfigId,
        source: BindingSource,
    ) -> StateResult<PluginBinding> {
        let txn = self.begin_write()?;
        let config: PluginConfig = get_json(&txn, PLUGIN_CONFIGS, &child_key(gateway_id, config_id))?
            .ok_or_else(|| StateError::NotFound(format!("plugin config {config_id}")))?;
        let now = epoch_secs();
        let binding = PluginBinding {
            id: next_id(&txn, "plugin_binding")?,
            gateway_id,
            scope_type,
            scope_id,
            config_id,
            type_code: config.type_code,
            source,
            created_at: now,
            updated_at: now,
        };
        insert_binding(&txn, &binding)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            gateway_id,
            scope = scope_type.as_str(),
            scope_id,
            type_code = %binding.type_code,
            "plugin bound"
        );
        Ok(binding)
    }

    pub fn get_plugin_config(
        &self,
        gateway_id: GatewayId,
        config_id: PluginConfigId,
    ) -> StateResult<Option<PluginConfig>> {
        self.read_one(PLUGIN_CONFIGS, &child_key(gateway_id, config_id))
    }

    pub fn list_plugin_configs(&self, gateway_id: GatewayId) -> StateResult<Vec<PluginConfig>> {
        self.read_prefix(PLUGIN_CONFIGS, &child_prefix(gateway_id))
    }

    /// List bindings of a gateway in creation order.
    pub fn list_plugin_bindings(&self, gateway_id: GatewayId) -> StateResult<Vec<PluginBinding>> {
        self.read_prefix(PLUGIN_BINDINGS, &child_prefix(gateway_id))
    }

    /// Apply a batch of plugin changes in one write transaction.
    ///
    /// Returns the bindings created by the batch.
    pub fn apply_plugin_changes(
        &self,
        gateway_id: GatewayId,
        batch: &PluginChangeBatch,
    ) -> StateResult<Vec<PluginBinding>> {
        let txn = self.begin_write()?;
        let now = epoch_secs();

        let mut released = BTreeSet::new();
        for binding in &batch.deletes {
            remove_key(&txn, PLUGIN_BINDINGS, &binding.table_key())?;
            released.insert(binding.config_id);
        }
        if !released.is_empty() {
            let remaining: Vec<PluginBinding> =
                scan_json(&txn, PLUGIN_BINDINGS, &child_prefix(gateway_id))?;
            for config_id in released {
                if remaining.iter().any(|b| b.config_id == config_id) {
                    debug!(gateway_id, config_id, "plugin config still bound, kept");
                    continue;
                }
                remove_key(&txn, PLUGIN_CONFIGS, &child_key(gateway_id, config_id))?;
            }
        }

        for config in &batch.config_updates {
            let mut config = config.clone();
            config.updated_at = now;
            put_json(&txn, PLUGIN_CONFIGS, &config.table_key(), &config)?;
        }

        for binding in &batch.binding_updates {
            let mut binding = binding.clone();
            binding.updated_at = now;
            put_json(&txn, PLUGIN_BINDINGS, &binding.table_key(), &binding)?;
        }

        let mut created = Vec::with_capacity(batch.creates.len());
        for new in &batch.creates {
            let config = PluginConfig {
                id: next_id(&txn, "plugin_config")?,
                gateway_id,
                name: new.name.clone(),
                type_code: new.type_code.clone(),
                yaml: new.yaml.clone(),
                created_at: now,
                updated_at: now,
            };
            put_json(&txn, PLUGIN_CONFIGS, &config.table_key(), &config)?;

            let binding = PluginBinding {
                id: next_id(&txn, "plugin_binding")?,
                gateway_id,
                scope_type: new.scope_type,
                scope_id: new.scope_id,
                config_id: config.id,
                type_code: new.type_code.clone(),
                source: new.source,
                created_at: now,
                updated_at: now,
            };
            insert_binding(&txn, &binding)?;
            created.push(binding);
        }

        txn.commit().map_err(map_err!(Transaction))?;
        info!(
            gateway_id,
            created = created.len(),
            updated = batch.config_updates.len(),
            deleted = batch.deletes.len(),
            "plugin changes applied"
        );
        Ok(created)
    }
}

/// Insert a binding, dropping any other binding for the same scope and type.
fn insert_binding(txn: &redb::WriteTransaction, binding: &PluginBinding) -> StateResult<()> {
    let existing: Vec<PluginBinding> =
        scan_json(txn, PLUGIN_BINDINGS, &child_prefix(binding.gateway_id))?;
    for previous in existing
        .iter()
        .filter(|b| b.id != binding.id && b.scope_key() == binding.scope_key())
    {
        remove_key(txn, PLUGIN_BINDINGS, &previous.table_key())?;
        debug!(
            replaced = previous.id,
            by = binding.id,
            type_code = %binding.type_code,
            "plugin binding replaced"
        );
    }
    put_json(txn, PLUGIN_BINDINGS, &binding.table_key(), binding)
}
