//! Converging a key prefix to a desired resource set.
//!
//! A registry is bound to one key prefix and an ownership selector. Sync
//! never touches keys it does not own: keys of kinds outside the converted
//! set, or stage-owned keys whose labels carry another (gateway, stage)
//! pair. Cluster-wide kinds belong to whichever publish converts them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use gatesync_convert::{
    ConvertedResources, ResourceKind, RuntimeResource, kind_prefix, ownership_selector,
};
use tracing::{debug, info, warn};

use crate::error::{RegistryError, RegistryResult};
use crate::kv::KeyValueStore;

/// The slice of a registry one publish is allowed to converge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryScope {
    pub key_prefix: String,
    pub selector: BTreeMap<String, String>,
}

impl RegistryScope {
    /// Scope owned by one stage of one gateway.
    pub fn for_stage(key_prefix: &str, gateway: &str, stage: &str) -> Self {
        Self {
            key_prefix: key_prefix.to_string(),
            selector: ownership_selector(gateway, stage),
        }
    }

    /// Scope covering every key under the prefix.
    pub fn cluster(key_prefix: &str) -> Self {
        Self {
            key_prefix: key_prefix.to_string(),
            selector: BTreeMap::new(),
        }
    }
}

/// What a single apply did to its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    Unchanged,
    /// A revoked resource removed its key.
    Deleted,
    /// A revoked resource whose key did not exist.
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOp {
    List,
    Apply,
    Delete,
}

impl fmt::Display for SyncOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncOp::List => "list",
            SyncOp::Apply => "apply",
            SyncOp::Delete => "delete",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    pub key: String,
    pub op: SyncOp,
    pub reason: String,
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.op, self.key, self.reason)
    }
}

/// Result of one sync. Failures are collected, never raised.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub failures: Vec<SyncFailure>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// One line per failure, for event details.
    pub fn failure_summary(&self) -> String {
        self.failures
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn record(&mut self, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Created => self.created += 1,
            ApplyOutcome::Updated => self.updated += 1,
            ApplyOutcome::Unchanged => self.unchanged += 1,
            ApplyOutcome::Deleted => self.deleted += 1,
            ApplyOutcome::Absent => {}
        }
    }
}

pub trait Registry: Send + Sync {
    fn scope(&self) -> &RegistryScope;

    /// Write one resource, or remove it when revoked.
    fn apply_resource(&self, resource: &RuntimeResource) -> RegistryResult<ApplyOutcome>;

    /// Apply every desired resource, then delete owned keys of the converted
    /// kinds that are no longer desired.
    fn sync_resources_by_key_prefix(&self, desired: &ConvertedResources) -> SyncReport;

    /// Remove every key under the prefix regardless of ownership.
    fn delete_resources_by_key_prefix(&self) -> RegistryResult<usize>;

    /// Stored resources of one kind. Entries that fail to decode are skipped.
    fn iter_by_type(&self, kind: ResourceKind) -> RegistryResult<ResourceIter>;
}

/// Lazily decodes stored resources.
pub struct ResourceIter {
    entries: std::vec::IntoIter<(String, Vec<u8>)>,
}

impl Iterator for ResourceIter {
    type Item = RuntimeResource;

    fn next(&mut self) -> Option<Self::Item> {
        for (key, bytes) in self.entries.by_ref() {
            match decode(&key, &bytes) {
                Ok(resource) => return Some(resource),
                Err(e) => warn!(%key, error = %e, "skipping malformed registry entry"),
            }
        }
        None
    }
}

fn decode(key: &str, bytes: &[u8]) -> RegistryResult<RuntimeResource> {
    serde_json::from_slice(bytes).map_err(|e| RegistryError::Deserialize {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// [`Registry`] over any [`KeyValueStore`].
pub struct KvRegistry<S> {
    store: S,
    scope: RegistryScope,
}

impl<S: KeyValueStore> KvRegistry<S> {
    pub fn new(store: S, scope: RegistryScope) -> Self {
        Self { store, scope }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Keys of `kinds` under the prefix whose labels match the selector.
    /// Cluster-wide kinds are owned regardless of labels.
    fn owned_keys(
        &self,
        kinds: &BTreeSet<ResourceKind>,
        report: &mut SyncReport,
    ) -> BTreeMap<ResourceKind, Vec<String>> {
        let mut owned = BTreeMap::new();
        for kind in kinds {
            let prefix = kind_prefix(&self.scope.key_prefix, *kind);
            let entries = match self.store.list_prefix(&prefix) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(%prefix, error = %e, "listing failed, deletes for this kind skipped");
                    report.failures.push(SyncFailure {
                        key: prefix,
                        op: SyncOp::List,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            let keys = entries
                .into_iter()
                .filter_map(|(key, bytes)| match decode(&key, &bytes) {
                    Ok(_) if kind.is_cluster_wide() => Some(key),
                    Ok(resource) if resource.matches_selector(&self.scope.selector) => Some(key),
                    Ok(_) => None,
                    Err(e) => {
                        warn!(%key, error = %e, "ownership unknown, leaving entry in place");
                        None
                    }
                })
                .collect();
            owned.insert(*kind, keys);
        }
        owned
    }
}

impl<S: KeyValueStore> Registry for KvRegistry<S> {
    fn scope(&self) -> &RegistryScope {
        &self.scope
    }

    fn apply_resource(&self, resource: &RuntimeResource) -> RegistryResult<ApplyOutcome> {
        let key = resource.key(&self.scope.key_prefix);

        if resource.revoked {
            let existed = self.store.delete(&key)?;
            debug!(%key, existed, "revoked resource removed");
            return Ok(if existed {
                ApplyOutcome::Deleted
            } else {
                ApplyOutcome::Absent
            });
        }

        let bytes =
            serde_json::to_vec(resource).map_err(|e| RegistryError::Serialize(e.to_string()))?;
        let outcome = match self.store.get(&key)? {
            Some(current) if current == bytes => return Ok(ApplyOutcome::Unchanged),
            Some(_) => ApplyOutcome::Updated,
            None => ApplyOutcome::Created,
        };
        self.store.put(&key, &bytes)?;
        debug!(%key, ?outcome, "resource applied");
        Ok(outcome)
    }

    fn sync_resources_by_key_prefix(&self, desired: &ConvertedResources) -> SyncReport {
        let mut report = SyncReport::default();
        let owned = self.owned_keys(&desired.kinds, &mut report);

        let mut keep = BTreeSet::new();
        let mut removed = BTreeSet::new();
        for resource in &desired.resources {
            let key = resource.key(&self.scope.key_prefix);
            match self.apply_resource(resource) {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    warn!(%key, error = %e, "apply failed");
                    report.failures.push(SyncFailure {
                        key: key.clone(),
                        op: SyncOp::Apply,
                        reason: e.to_string(),
                    });
                }
            }
            if resource.revoked {
                removed.insert(key);
            } else {
                keep.insert(key);
            }
        }

        let stale = owned
            .values()
            .flatten()
            .filter(|key| !keep.contains(*key) && !removed.contains(*key));
        for key in stale {
            match self.store.delete(key) {
                Ok(true) => {
                    report.deleted += 1;
                    debug!(%key, "stale resource deleted");
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(%key, error = %e, "delete failed");
                    report.failures.push(SyncFailure {
                        key: key.clone(),
                        op: SyncOp::Delete,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            key_prefix = %self.scope.key_prefix,
            created = report.created,
            updated = report.updated,
            unchanged = report.unchanged,
            deleted = report.deleted,
            failures = report.failures.len(),
            "registry sync complete"
        );
        report
    }

    fn delete_resources_by_key_prefix(&self) -> RegistryResult<usize> {
        let prefix = format!("{}/", self.scope.key_prefix.trim_end_matches('/'));
        let removed = self.store.delete_prefix(&prefix)?;
        info!(%prefix, removed, "registry prefix deleted");
        Ok(removed)
    }

    fn iter_by_type(&self, kind: ResourceKind) -> RegistryResult<ResourceIter> {
        let entries = self
            .store
            .list_prefix(&kind_prefix(&self.scope.key_prefix, kind))?;
        Ok(ResourceIter {
            entries: entries.into_iter(),
        })
    }
}

/// Hands out a registry per target cluster.
pub trait RegistryProvider: Send + Sync {
    fn registry(&self, scope: RegistryScope) -> Box<dyn Registry>;
}

/// Every cluster's prefix lives in one shared key-value store.
#[derive(Clone)]
pub struct SharedStoreProvider<S> {
    store: S,
}

impl<S> SharedStoreProvider<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: KeyValueStore + Clone + 'static> RegistryProvider for SharedStoreProvider<S> {
    fn registry(&self, scope: RegistryScope) -> Box<dyn Registry> {
        Box::new(KvRegistry::new(self.store.clone(), scope))
    }
}
