//! In-memory blob store
//!
//! Used for testing and development. Not persistent.

use crate::backend::{check_object_size, BlobStoreSync, StoreStats};
use bytes::Bytes;
use localdriver_core::{Error, Result};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

/// In-memory blob store
pub struct MemoryBlobStore {
    /// container -> key -> object
    containers: RwLock<HashMap<String, BTreeMap<String, Bytes>>>,

    /// Operation counters
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl MemoryBlobStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            containers: RwLock::new(HashMap::new()),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    /// Create a store with the given containers already present
    pub fn with_containers<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        {
            let mut containers = store.containers.write();
            for name in names {
                containers.entry(name.into()).or_default();
            }
        }
        store
    }

    /// Snapshot of every key in a container
    pub fn keys(&self, container: &str) -> Vec<String> {
        self.containers
            .read()
            .get(container)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Clear all stored objects, keeping containers
    pub fn clear(&self) {
        let mut containers = self.containers.write();
        for objects in containers.values_mut() {
            objects.clear();
        }
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

fn missing_container(container: &str) -> Error {
    Error::Store(format!("container '{}' does not exist", container))
}

impl BlobStoreSync for MemoryBlobStore {
    fn create_container(&self, container: &str) -> Result<()> {
        self.containers
            .write()
            .entry(container.to_string())
            .or_default();
        Ok(())
    }

    fn container_exists(&self, container: &str) -> Result<bool> {
        Ok(self.containers.read().contains_key(container))
    }

    fn put(&self, container: &str, key: &str, data: Bytes) -> Result<()> {
        check_object_size(&data)?;

        let mut containers = self.containers.write();
        let objects = containers
            .get_mut(container)
            .ok_or_else(|| missing_container(container))?;
        objects.insert(key.to_string(), data);
        self.writes.fetch_add(1, Ordering::Relaxed);

        Ok(())
    }

    fn get(&self, container: &str, key: &str) -> Result<Option<Bytes>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let containers = self.containers.read();
        let objects = containers
            .get(container)
            .ok_or_else(|| missing_container(container))?;
        Ok(objects.get(key).cloned())
    }

    fn delete(&self, container: &str, key: &str) -> Result<bool> {
        let mut containers = self.containers.write();
        let objects = containers
            .get_mut(container)
            .ok_or_else(|| missing_container(container))?;

        if objects.remove(key).is_some() {
            self.deletes.fetch_add(1, Ordering::Relaxed);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>> {
        let containers = self.containers.read();
        let objects = containers
            .get(container)
            .ok_or_else(|| missing_container(container))?;
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    fn stats(&self) -> Result<StoreStats> {
        let containers = self.containers.read();
        let (object_count, bytes_used) = containers
            .values()
            .flat_map(|objects| objects.values())
            .fold((0u64, 0u64), |(count, bytes), data| {
                (count + 1, bytes + data.len() as u64)
            });
        Ok(StoreStats {
            container_count: containers.len() as u64,
            object_count,
            bytes_used,
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get() {
        let store = MemoryBlobStore::with_containers(["meta"]);
        let data = Bytes::from_static(b"hello world");

        store.put("meta", "hosts/byID/h1", data.clone()).unwrap();
        let retrieved = store.get("meta", "hosts/byID/h1").unwrap().unwrap();
        assert_eq!(retrieved, data);
        assert!(store.get("meta", "hosts/byID/h2").unwrap().is_none());
    }

    #[test]
    fn test_missing_container_is_error() {
        let store = MemoryBlobStore::new();
        assert!(store.get("nope", "k").is_err());
        assert!(store.put("nope", "k", Bytes::new()).is_err());

        store.create_container("nope").unwrap();
        assert!(store.container_exists("nope").unwrap());
        assert!(store.get("nope", "k").unwrap().is_none());
    }

    #[test]
    fn test_delete() {
        let store = MemoryBlobStore::with_containers(["meta"]);
        store.put("meta", "k", Bytes::from_static(b"v")).unwrap();

        assert!(store.delete("meta", "k").unwrap());
        assert!(store.get("meta", "k").unwrap().is_none());

        // Deleting non-existent returns false
        assert!(!store.delete("meta", "k").unwrap());
    }

    #[test]
    fn test_list_by_prefix() {
        let store = MemoryBlobStore::with_containers(["meta"]);
        for key in [
            "hosts/byID/b",
            "hosts/byID/a",
            "hosts/byName/web",
            "networks/byID/n",
        ] {
            store.put("meta", key, Bytes::from_static(b"{}")).unwrap();
        }

        let listed = store.list("meta", "hosts/byID/").unwrap();
        assert_eq!(listed, vec!["hosts/byID/a", "hosts/byID/b"]);
        assert_eq!(store.list("meta", "").unwrap().len(), 4);
    }

    #[test]
    fn test_stats() {
        let store = MemoryBlobStore::with_containers(["meta"]);
        store.put("meta", "a", Bytes::from(vec![0u8; 10])).unwrap();
        store.put("meta", "a", Bytes::from(vec![0u8; 20])).unwrap();
        store.get("meta", "a").unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.container_count, 1);
        assert_eq!(stats.object_count, 1);
        assert_eq!(stats.bytes_used, 20);
        assert_eq!(stats.writes, 2);
        assert_eq!(stats.reads, 1);
    }
}
