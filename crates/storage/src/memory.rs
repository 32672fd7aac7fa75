use std::{
    collections::{BTreeMap, HashMap, btree_map::Entry},
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{ObjectStore, StorageError, StorageResult};

/// In-process object store with the same create/write-once semantics as the Blob
/// service.
#[derive(Debug, Default)]
pub struct MemoryStore {
    namespaces: Mutex<HashMap<String, BTreeMap<String, Bytes>>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub fn namespaces(&self) -> Vec<String> {
        let mut names = self.lock().keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }

    /// All objects in `namespace`, ordered by key.
    pub fn objects(&self, namespace: &str) -> Vec<(String, Bytes)> {
        self.lock()
            .get(namespace)
            .map(|objects| objects.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    pub fn object_count(&self) -> usize { self.lock().values().map(BTreeMap::len).sum() }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, BTreeMap<String, Bytes>>> {
        self.namespaces.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn ensure_namespace(&self, name: &str) -> StorageResult<()> {
        self.lock().entry(name.to_string()).or_default();
        Ok(())
    }

    async fn put_object(&self, namespace: &str, key: &str, data: Bytes) -> StorageResult<()> {
        let mut namespaces = self.lock();
        let objects = namespaces
            .get_mut(namespace)
            .ok_or_else(|| StorageError::NamespaceNotFound(namespace.to_string()))?;
        match objects.entry(key.to_string()) {
            Entry::Occupied(_) => Err(StorageError::ObjectExists {
                namespace: namespace.to_string(),
                key: key.to_string(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(data);
                Ok(())
            }
        }
    }
}
