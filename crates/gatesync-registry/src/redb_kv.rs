//! redb-backed key-value store for registry data.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use tracing::debug;

use crate::error::{RegistryError, RegistryResult};
use crate::kv::KeyValueStore;

const ENTRIES: TableDefinition<&str, &[u8]> = TableDefinition::new("registry_entries");

macro_rules! backend_err {
    () => {
        |e| RegistryError::Backend(e.to_string())
    };
}

#[derive(Clone)]
pub struct RedbKeyValueStore {
    db: Arc<Database>,
}

impl RedbKeyValueStore {
    pub fn open(path: &Path) -> RegistryResult<Self> {
        let db = Database::create(path).map_err(backend_err!())?;
        let store = Self { db: Arc::new(db) };
        store.ensure_table()?;
        debug!(?path, "registry store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> RegistryResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(backend_err!())?;
        let store = Self { db: Arc::new(db) };
        store.ensure_table()?;
        Ok(store)
    }

    fn ensure_table(&self) -> RegistryResult<()> {
        let txn = self.db.begin_write().map_err(backend_err!())?;
        txn.open_table(ENTRIES).map_err(backend_err!())?;
        txn.commit().map_err(backend_err!())?;
        Ok(())
    }
}

impl KeyValueStore for RedbKeyValueStore {
    fn get(&self, key: &str) -> RegistryResult<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(backend_err!())?;
        let table = txn.open_table(ENTRIES).map_err(backend_err!())?;
        let value = table.get(key).map_err(backend_err!())?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }

    fn put(&self, key: &str, value: &[u8]) -> RegistryResult<()> {
        let txn = self.db.begin_write().map_err(backend_err!())?;
        {
            let mut table = txn.open_table(ENTRIES).map_err(backend_err!())?;
            table.insert(key, value).map_err(backend_err!())?;
        }
        txn.commit().map_err(backend_err!())?;
        Ok(())
    }

    fn delete(&self, key: &str) -> RegistryResult<bool> {
        let txn = self.db.begin_write().map_err(backend_err!())?;
        let existed = {
            let mut table = txn.open_table(ENTRIES).map_err(backend_err!())?;
            let removed = table.remove(key).map_err(backend_err!())?;
            removed.is_some()
        };
        txn.commit().map_err(backend_err!())?;
        Ok(existed)
    }

    fn list_prefix(&self, prefix: &str) -> RegistryResult<Vec<(String, Vec<u8>)>> {
        let txn = self.db.begin_read().map_err(backend_err!())?;
        let table = txn.open_table(ENTRIES).map_err(backend_err!())?;
        let mut entries = Vec::new();
        for entry in table.range(prefix..).map_err(backend_err!())? {
            let (key, value) = entry.map_err(backend_err!())?;
            if !key.value().starts_with(prefix) {
                break;
            }
            entries.push((key.value().to_string(), value.value().to_vec()));
        }
        Ok(entries)
    }

    /// Removes the whole prefix in one write transaction.
    fn delete_prefix(&self, prefix: &str) -> RegistryResult<usize> {
        let keys: Vec<String> = self
            .list_prefix(prefix)?
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        let txn = self.db.begin_write().map_err(backend_err!())?;
        {
            let mut table = txn.open_table(ENTRIES).map_err(backend_err!())?;
            for key in &keys {
                table.remove(key.as_str()).map_err(backend_err!())?;
            }
        }
        txn.commit().map_err(backend_err!())?;
        debug!(prefix, removed = keys.len(), "registry prefix wiped");
        Ok(keys.len())
    }
}
