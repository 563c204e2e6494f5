//! Sled-based blob store
//!
//! Persistent local object storage. Each container maps to one sled tree;
//! a registry tree records which containers exist.

use crate::backend::{check_object_size, BlobStoreSync, StoreStats};
use bytes::Bytes;
use localdriver_core::{Error, Result};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

const REGISTRY_TREE: &str = "__containers";

fn storage_err(e: sled::Error) -> Error {
    Error::Store(e.to_string())
}

/// Sled-based blob store
pub struct SledBlobStore {
    db: sled::Db,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl SledBlobStore {
    /// Open or create a store
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!(path = ?path.as_ref(), "Opening sled blob store");

        let db = sled::open(path.as_ref())
            .map_err(|e| Error::Store(format!("Failed to open sled: {}", e)))?;

        Ok(Self::from_db(db))
    }

    /// Open an in-memory store (for testing)
    pub fn open_temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| Error::Store(format!("Failed to open sled: {}", e)))?;
        Ok(Self::from_db(db))
    }

    fn from_db(db: sled::Db) -> Self {
        Self {
            db,
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    fn tree_name(container: &str) -> String {
        format!("container:{}", container)
    }

    fn registry(&self) -> Result<sled::Tree> {
        self.db.open_tree(REGISTRY_TREE).map_err(storage_err)
    }

    /// Open the tree of an existing container
    fn container(&self, container: &str) -> Result<sled::Tree> {
        if !self.container_exists(container)? {
            return Err(Error::Store(format!(
                "container '{}' does not exist",
                container
            )));
        }
        self.db
            .open_tree(Self::tree_name(container))
            .map_err(storage_err)
    }

    /// Flush to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }
}

impl BlobStoreSync for SledBlobStore {
    fn create_container(&self, container: &str) -> Result<()> {
        self.registry()?
            .insert(container.as_bytes(), Vec::<u8>::new())
            .map_err(storage_err)?;
        self.db
            .open_tree(Self::tree_name(container))
            .map_err(storage_err)?;
        debug!(container, "Created container");
        Ok(())
    }

    fn container_exists(&self, container: &str) -> Result<bool> {
        self.registry()?
            .contains_key(container.as_bytes())
            .map_err(storage_err)
    }

    fn put(&self, container: &str, key: &str, data: Bytes) -> Result<()> {
        check_object_size(&data)?;
        let tree = self.container(container)?;
        tree.insert(key.as_bytes(), data.as_ref())
            .map_err(storage_err)?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        debug!(container, key, size = data.len(), "Stored object");
        Ok(())
    }

    fn get(&self, container: &str, key: &str) -> Result<Option<Bytes>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let tree = self.container(container)?;
        Ok(tree
            .get(key.as_bytes())
            .map_err(storage_err)?
            .map(|value| Bytes::copy_from_slice(&value)))
    }

    fn delete(&self, container: &str, key: &str) -> Result<bool> {
        let tree = self.container(container)?;
        let removed = tree.remove(key.as_bytes()).map_err(storage_err)?;
        if removed.is_some() {
            self.deletes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(removed.is_some())
    }

    fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>> {
        let tree = self.container(container)?;
        let mut keys = Vec::new();
        for item in tree.scan_prefix(prefix.as_bytes()) {
            let (key, _) = item.map_err(storage_err)?;
            let key = String::from_utf8(key.to_vec())
                .map_err(|e| Error::Store(format!("non UTF-8 key: {}", e)))?;
            keys.push(key);
        }
        Ok(keys)
    }

    fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            ..Default::default()
        };
        for item in self.registry()?.iter() {
            let (name, _) = item.map_err(storage_err)?;
            stats.container_count += 1;
            let tree = self
                .db
                .open_tree(Self::tree_name(&String::from_utf8_lossy(&name)))
                .map_err(storage_err)?;
            for entry in tree.iter() {
                let (_, value) = entry.map_err(storage_err)?;
                stats.object_count += 1;
                stats.bytes_used += value.len() as u64;
            }
        }
        Ok(stats)
    }
}
