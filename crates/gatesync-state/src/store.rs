//! StateStore: redb-backed control-plane persistence for gatesync.
//!
//! Provides typed operations over gateways, stages, resource versions,
//! micro-gateways, releases, publish events, and plugin bindings. All values
//! are JSON-serialized into redb's `&[u8]` value columns. The store supports
//! both on-disk and in-memory backends (the latter for testing).
//!
//! Release and plugin operations live in the `release` and `plugin`
//! submodules; they share the helpers defined here.

mod plugin;
mod release;

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

pub use plugin::{NewPluginBinding, PluginChangeBatch};
pub use release::ReleaseIntent;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}
pub(crate) use map_err;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for table in [
            GATEWAYS,
            STAGES,
            RESOURCE_VERSIONS,
            RELEASES,
            RELEASE_HISTORIES,
            PUBLISH_TASKS,
            PUBLISH_EVENTS,
            MICRO_GATEWAYS,
            PLUGIN_CONFIGS,
            PLUGIN_BINDINGS,
        ] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn begin_write(&self) -> StateResult<WriteTransaction> {
        self.db.begin_write().map_err(map_err!(Transaction))
    }

    /// Read one JSON record in its own read transaction.
    fn read_one<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        decode_one(&table, key)
    }

    /// Read every JSON record whose key starts with `prefix`, in key order.
    fn read_prefix<T: DeserializeOwned>(&self, table: JsonTable, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        decode_prefix(&table, prefix)
    }

    // ── Gateways ───────────────────────────────────────────────────

    /// Create a gateway with a freshly allocated id.
    pub fn create_gateway(&self, name: &str, settings: GatewaySettings) -> StateResult<Gateway> {
        let txn = self.begin_write()?;
        let now = epoch_secs();
        let gateway = Gateway {
            id: next_id(&txn, "gateway")?,
            name: name.to_string(),
            settings,
            created_at: now,
            updated_at: now,
        };
        put_json(&txn, GATEWAYS, &id_key(gateway.id), &gateway)?;
        txn.commit().map_err(map_err!(Transaction))?;
        info!(gateway = %gateway.name, id = gateway.id, "gateway created");
        Ok(gateway)
    }

    /// Insert or update a gateway.
    pub fn put_gateway(&self, gateway: &Gateway) -> StateResult<()> {
        let txn = self.begin_write()?;
        put_json(&txn, GATEWAYS, &id_key(gateway.id), gateway)?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    pub fn get_gateway(&self, gateway_id: GatewayId) -> StateResult<Option<Gateway>> {
        self.read_one(GATEWAYS, &id_key(gateway_id))
    }

    // ── Stages ─────────────────────────────────────────────────────

    /// Create a stage. Stage names are unique per gateway.
    pub fn create_stage(
        &self,
        gateway_id: GatewayId,
        name: &str,
        vars: std::collections::BTreeMap<String, String>,
        backends: Vec<StageBackend>,
    ) -> StateResult<Stage> {
        let txn = self.begin_write()?;
        let existing: Vec<Stage> = scan_json(&txn, STAGES, &child_prefix(gateway_id))?;
        if existing.iter().any(|s| s.name == name) {
            return Err(StateError::Conflict(format!(
                "stage '{name}' already exists in gateway {gateway_id}"
            )));
        }
        let now = epoch_secs();
        let stage = Stage {
            id: next_id(&txn, "stage")?,
            gateway_id,
            name: name.to_string(),
            description: String::new(),
            vars,
            micro_gateway_ids: Vec::new(),
            backends,
            created_at: now,
            updated_at: now,
        };
        put_json(&txn, STAGES, &stage.table_key(), &stage)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(gateway_id, stage = %stage.name, id = stage.id, "stage created");
        Ok(stage)
    }

    /// Insert or update a stage.
    pub fn put_stage(&self, stage: &Stage) -> StateResult<()> {
        let txn = self.begin_write()?;
        put_json(&txn, STAGES, &stage.table_key(), stage)?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    pub fn get_stage(&self, gateway_id: GatewayId, stage_id: StageId) -> StateResult<Option<Stage>> {
        self.read_one(STAGES, &child_key(gateway_id, stage_id))
    }

    pub fn get_stage_by_name(&self, gateway_id: GatewayId, name: &str) -> StateResult<Option<Stage>> {
        Ok(self
            .list_stages(gateway_id)?
            .into_iter()
            .find(|s| s.name == name))
    }

    pub fn list_stages(&self, gateway_id: GatewayId) -> StateResult<Vec<Stage>> {
        self.read_prefix(STAGES, &child_prefix(gateway_id))
    }

    // ── Resource versions ──────────────────────────────────────────

    /// Snapshot a resource list as a new immutable version.
    pub fn create_resource_version(
        &self,
        gateway_id: GatewayId,
        version: &str,
        resources: Vec<ResourceDescriptor>,
    ) -> StateResult<ResourceVersion> {
        let txn = self.begin_write()?;
        let existing: Vec<ResourceVersion> =
            scan_json(&txn, RESOURCE_VERSIONS, &child_prefix(gateway_id))?;
        if existing.iter().any(|v| v.version == version) {
            return Err(StateError::Conflict(format!(
                "version '{version}' already exists in gateway {gateway_id}"
            )));
        }
        let snapshot = ResourceVersion {
            id: next_id(&txn, "resource_version")?,
            gateway_id,
            version: version.to_string(),
            fingerprint: ResourceVersion::fingerprint_of(&resources),
            resources,
            created_at: epoch_secs(),
        };
        put_json(&txn, RESOURCE_VERSIONS, &snapshot.table_key(), &snapshot)?;
        txn.commit().map_err(map_err!(Transaction))?;
        info!(
            gateway_id,
            version = %snapshot.version,
            id = snapshot.id,
            resources = snapshot.resources.len(),
            "resource version created"
        );
        Ok(snapshot)
    }

    pub fn get_resource_version(
        &self,
        gateway_id: GatewayId,
        version_id: ResourceVersionId,
    ) -> StateResult<Option<ResourceVersion>> {
        self.read_one(RESOURCE_VERSIONS, &child_key(gateway_id, version_id))
    }

    /// List versions of a gateway, oldest first.
    pub fn list_resource_versions(&self, gateway_id: GatewayId) -> StateResult<Vec<ResourceVersion>> {
        self.read_prefix(RESOURCE_VERSIONS, &child_prefix(gateway_id))
    }

    /// Delete superseded versions nobody references.
    ///
    /// Keeps the newest `keep` versions plus every version a release points
    /// at. Returns the ids that were deleted.
    pub fn cleanup_resource_versions(
        &self,
        gateway_id: GatewayId,
        keep: usize,
    ) -> StateResult<Vec<ResourceVersionId>> {
        let txn = self.begin_write()?;
        let versions: Vec<ResourceVersion> =
            scan_json(&txn, RESOURCE_VERSIONS, &child_prefix(gateway_id))?;
        let releases: Vec<Release> = scan_json(&txn, RELEASES, &child_prefix(gateway_id))?;

        let cutoff = versions.len().saturating_sub(keep);
        let deleted: Vec<ResourceVersionId> = versions[..cutoff]
            .iter()
            .filter(|v| !releases.iter().any(|r| r.resource_version_id == v.id))
            .map(|v| v.id)
            .collect();
        for id in &deleted {
            remove_key(&txn, RESOURCE_VERSIONS, &child_key(gateway_id, *id))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        info!(gateway_id, deleted = deleted.len(), "resource versions cleaned up");
        Ok(deleted)
    }

    // ── Micro-gateways ─────────────────────────────────────────────

    pub fn create_micro_gateway(
        &self,
        name: &str,
        gateway_id: Option<GatewayId>,
        is_shared: bool,
        config: MicroGatewayConfig,
    ) -> StateResult<MicroGateway> {
        let txn = self.begin_write()?;
        let existing: Vec<MicroGateway> = scan_json(&txn, MICRO_GATEWAYS, "")?;
        if existing.iter().any(|m| m.name == name) {
            return Err(StateError::Conflict(format!(
                "micro-gateway '{name}' already exists"
            )));
        }
        let micro_gateway = MicroGateway {
            id: next_id(&txn, "micro_gateway")?,
            name: name.to_string(),
            gateway_id,
            is_shared,
            config,
            created_at: epoch_secs(),
        };
        put_json(&txn, MICRO_GATEWAYS, &id_key(micro_gateway.id), &micro_gateway)?;
        txn.commit().map_err(map_err!(Transaction))?;
        info!(name, id = micro_gateway.id, is_shared, "micro-gateway registered");
        Ok(micro_gateway)
    }

    pub fn get_micro_gateway(&self, id: MicroGatewayId) -> StateResult<Option<MicroGateway>> {
        self.read_one(MICRO_GATEWAYS, &id_key(id))
    }

    pub fn get_micro_gateway_by_name(&self, name: &str) -> StateResult<Option<MicroGateway>> {
        Ok(self
            .list_micro_gateways()?
            .into_iter()
            .find(|m| m.name == name))
    }

    pub fn list_micro_gateways(&self) -> StateResult<Vec<MicroGateway>> {
        self.read_prefix(MICRO_GATEWAYS, "")
    }

    /// Delete a micro-gateway. Returns true if it existed.
    pub fn delete_micro_gateway(&self, id: MicroGatewayId) -> StateResult<bool> {
        let txn = self.begin_write()?;
        let existed = remove_key(&txn, MICRO_GATEWAYS, &id_key(id))?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id, existed, "micro-gateway deleted");
        Ok(existed)
    }
}

// ── Transaction helpers ────────────────────────────────────────────

/// Seconds since the Unix epoch; record timestamps use this clock.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Allocate the next id of a named sequence inside `txn`.
pub(crate) fn next_id(txn: &WriteTransaction, sequence: &str) -> StateResult<u64> {
    let mut table = txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
    let current = table
        .get(sequence)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value())
        .unwrap_or(0);
    let next = current + 1;
    table.insert(sequence, next).map_err(map_err!(Write))?;
    Ok(next)
}

pub(crate) fn put_json<T: Serialize>(
    txn: &WriteTransaction,
    table: JsonTable,
    key: &str,
    value: &T,
) -> StateResult<()> {
    let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
    let mut table = txn.open_table(table).map_err(map_err!(Table))?;
    table
        .insert(key, bytes.as_slice())
        .map_err(map_err!(Write))?;
    Ok(())
}

pub(crate) fn get_json<T: DeserializeOwned>(
    txn: &WriteTransaction,
    table: JsonTable,
    key: &str,
) -> StateResult<Option<T>> {
    let table = txn.open_table(table).map_err(map_err!(Table))?;
    decode_one(&table, key)
}

pub(crate) fn scan_json<T: DeserializeOwned>(
    txn: &WriteTransaction,
    table: JsonTable,
    prefix: &str,
) -> StateResult<Vec<T>> {
    let table = txn.open_table(table).map_err(map_err!(Table))?;
    decode_prefix(&table, prefix)
}

/// Remove a key. Returns true if it existed.
pub(crate) fn remove_key(txn: &WriteTransaction, table: JsonTable, key: &str) -> StateResult<bool> {
    let mut table = txn.open_table(table).map_err(map_err!(Table))?;
    let existed = table.remove(key).map_err(map_err!(Write))?.is_some();
    Ok(existed)
}

fn decode_one<T, R>(table: &R, key: &str) -> StateResult<Option<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    let found = match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?),
        None => None,
    };
    Ok(found)
}

fn decode_prefix<T, R>(table: &R, prefix: &str) -> StateResult<Vec<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    let mut results = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (key, value) = entry.map_err(map_err!(Read))?;
        if key.value().starts_with(prefix) {
            let record: T =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
    }
    Ok(results)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn record_timestamps_use_the_epoch_clock() {
        let before = epoch_secs();
        let store = StateStore::open_in_memory().unwrap();
        let gateway = store.create_gateway("clock", GatewaySettings::default()).unwrap();
        assert!(gateway.created_at >= before);
        assert!(gateway.created_at <= epoch_secs());
        assert!(before > 1_600_000_000);
    }

    pub(crate) fn test_backend(backend_id: BackendId) -> StageBackend {
        StageBackend {
            backend_id,
            name: format!("backend-{backend_id}"),
            config: BackendConfig {
                loadbalance: LoadBalance::RoundRobin,
                timeout_secs: 30,
                hosts: vec![BackendHost {
                    scheme: "http".to_string(),
                    host: "backend.svc:8080".to_string(),
                    weight: 100,
                }],
            },
        }
    }

    pub(crate) fn test_resource(id: ResourceId, path: &str) -> ResourceDescriptor {
        ResourceDescriptor {
            id,
            name: format!("resource_{id}"),
            method: "GET".to_string(),
            path: path.to_string(),
            match_subpath: false,
            enable_websocket: false,
            proxy: ProxyConfig::Http {
                backend_id: 1,
                method: "GET".to_string(),
                path: path.to_string(),
                timeout_secs: None,
            },
            auth: AuthConfig::default(),
            plugin_refs: vec![],
        }
    }

    pub(crate) fn test_mgw_config(prefix: &str) -> MicroGatewayConfig {
        MicroGatewayConfig {
            key_prefix: prefix.to_string(),
            endpoint: "http://control-plane:6000".to_string(),
            auth_secret: "s3cret".to_string(),
            engine_version: Some("3.2.0".to_string()),
            reports_status: false,
            plugin_metadata: BTreeMap::new(),
            managed: None,
        }
    }

    /// A store with one gateway, one stage "prod", and one version "1.0.0".
    pub(crate) fn seeded_store() -> (StateStore, Gateway, Stage, ResourceVersion) {
        let store = StateStore::open_in_memory().unwrap();
        let gateway = store.create_gateway("demo", GatewaySettings::default()).unwrap();
        let stage = store
            .create_stage(gateway.id, "prod", BTreeMap::new(), vec![test_backend(1)])
            .unwrap();
        let version = store
            .create_resource_version(gateway.id, "1.0.0", vec![test_resource(1, "/users/{id}")])
            .unwrap();
        (store, gateway, stage, version)
    }

    // ── Gateways & stages ──────────────────────────────────────────

    #[test]
    fn gateway_create_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let gw = store.create_gateway("demo", GatewaySettings::default()).unwrap();

        assert_eq!(store.get_gateway(gw.id).unwrap(), Some(gw));
        assert!(store.get_gateway(999).unwrap().is_none());
    }

    #[test]
    fn ids_are_monotonic() {
        let store = StateStore::open_in_memory().unwrap();
        let a = store.create_gateway("a", GatewaySettings::default()).unwrap();
        let b = store.create_gateway("b", GatewaySettings::default()).unwrap();
        assert!(b.id > a.id);
    }

    #[test]
    fn stage_names_unique_per_gateway() {
        let (store, gateway, _, _) = seeded_store();
        let err = store
            .create_stage(gateway.id, "prod", BTreeMap::new(), vec![])
            .unwrap_err();
        assert!(matches!(err, StateError::Conflict(_)));

        // Same name in another gateway is fine.
        let other = store.create_gateway("other", GatewaySettings::default()).unwrap();
        store.create_stage(other.id, "prod", BTreeMap::new(), vec![]).unwrap();
    }

    #[test]
    fn stage_lookup_by_name_and_update() {
        let (store, gateway, mut stage, _) = seeded_store();
        stage.vars.insert("prefix".to_string(), "v2".to_string());
        store.put_stage(&stage).unwrap();

        let found = store.get_stage_by_name(gateway.id, "prod").unwrap().unwrap();
        assert_eq!(found.vars.get("prefix").map(String::as_str), Some("v2"));
        assert_eq!(store.list_stages(gateway.id).unwrap().len(), 1);
    }

    // ── Resource versions ──────────────────────────────────────────

    #[test]
    fn resource_version_is_fingerprinted() {
        let (store, gateway, _, version) = seeded_store();
        let stored = store.get_resource_version(gateway.id, version.id).unwrap().unwrap();
        assert_eq!(stored.fingerprint, ResourceVersion::fingerprint_of(&stored.resources));
    }

    #[test]
    fn resource_version_strings_are_unique() {
        let (store, gateway, _, _) = seeded_store();
        let err = store
            .create_resource_version(gateway.id, "1.0.0", vec![])
            .unwrap_err();
        assert!(matches!(err, StateError::Conflict(_)));
    }

    #[test]
    fn cleanup_keeps_newest_and_released_versions() {
        let (store, gateway, stage, v1) = seeded_store();
        let v2 = store.create_resource_version(gateway.id, "2.0.0", vec![]).unwrap();
        let v3 = store.create_resource_version(gateway.id, "3.0.0", vec![]).unwrap();
        let v4 = store.create_resource_version(gateway.id, "4.0.0", vec![]).unwrap();

        // v1 stays alive because a release references it.
        store
            .record_release(&ReleaseIntent {
                gateway_id: gateway.id,
                resource_version_id: v1.id,
                targets: vec![(stage.id, vec![])],
                user: "admin".to_string(),
                comment: String::new(),
                revoke: false,
            })
            .unwrap();

        let deleted = store.cleanup_resource_versions(gateway.id, 1).unwrap();
        assert_eq!(deleted, vec![v2.id, v3.id]);

        let remaining: Vec<u64> = store
            .list_resource_versions(gateway.id)
            .unwrap()
            .iter()
            .map(|v| v.id)
            .collect();
        assert_eq!(remaining, vec![v1.id, v4.id]);
    }

    // ── Micro-gateways ─────────────────────────────────────────────

    #[test]
    fn micro_gateway_crud() {
        let store = StateStore::open_in_memory().unwrap();
        let mgw = store
            .create_micro_gateway("shared", None, true, test_mgw_config("/gatesync/shared"))
            .unwrap();

        assert_eq!(store.get_micro_gateway_by_name("shared").unwrap(), Some(mgw.clone()));
        assert!(store
            .create_micro_gateway("shared", None, true, test_mgw_config("/x"))
            .is_err());
        assert!(store.delete_micro_gateway(mgw.id).unwrap());
        assert!(!store.delete_micro_gateway(mgw.id).unwrap());
        assert!(store.list_micro_gateways().unwrap().is_empty());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("control.redb");

        let gateway_id = {
            let store = StateStore::open(&db_path).unwrap();
            store.create_gateway("persisted", GatewaySettings::default()).unwrap().id
        };

        // Reopen the same database file; the sequence continues.
        let store = StateStore::open(&db_path).unwrap();
        assert_eq!(store.get_gateway(gateway_id).unwrap().unwrap().name, "persisted");
        let next = store.create_gateway("next", GatewaySettings::default()).unwrap();
        assert_eq!(next.id, gateway_id + 1);
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.list_stages(1).unwrap().is_empty());
        assert!(store.list_resource_versions(1).unwrap().is_empty());
        assert!(store.list_micro_gateways().unwrap().is_empty());
        assert!(store.cleanup_resource_versions(1, 0).unwrap().is_empty());
    }
}
