//! Key-value backends the registry writes through.
//!
//! Keys are `/`-separated strings; values are opaque bytes. Backends only
//! need point reads, writes, deletes and ordered prefix scans.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::error::{RegistryError, RegistryResult};

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> RegistryResult<Option<Vec<u8>>>;

    fn put(&self, key: &str, value: &[u8]) -> RegistryResult<()>;

    /// Remove a key. Returns true if it existed.
    fn delete(&self, key: &str) -> RegistryResult<bool>;

    /// Every entry whose key starts with `prefix`, in key order.
    fn list_prefix(&self, prefix: &str) -> RegistryResult<Vec<(String, Vec<u8>)>>;

    /// Remove every key under `prefix`. Returns the number removed.
    fn delete_prefix(&self, prefix: &str) -> RegistryResult<usize> {
        let mut removed = 0;
        for (key, _) in self.list_prefix(prefix)? {
            if self.delete(&key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get(&self, key: &str) -> RegistryResult<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: &[u8]) -> RegistryResult<()> {
        (**self).put(key, value)
    }

    fn delete(&self, key: &str) -> RegistryResult<bool> {
        (**self).delete(key)
    }

    fn list_prefix(&self, prefix: &str) -> RegistryResult<Vec<(String, Vec<u8>)>> {
        (**self).list_prefix(prefix)
    }

    fn delete_prefix(&self, prefix: &str) -> RegistryResult<usize> {
        (**self).delete_prefix(prefix)
    }
}

/// In-memory backend for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> RegistryError {
    RegistryError::Backend("memory store lock poisoned".to_string())
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> RegistryResult<Option<Vec<u8>>> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> RegistryResult<()> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> RegistryResult<bool> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        Ok(entries.remove(key).is_some())
    }

    fn list_prefix(&self, prefix: &str) -> RegistryResult<Vec<(String, Vec<u8>)>> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}
