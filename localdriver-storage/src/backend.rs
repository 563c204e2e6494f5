//! Blob store trait
//!
//! Defines the interface every object storage implementation must follow.
//! Objects are addressed by (container, key); there is no versioning and no
//! transaction across calls.

use bytes::Bytes;
use localdriver_core::Result;
use std::future::Future;
use std::pin::Pin;

/// Largest object accepted by `put` (1 GiB)
pub const MAX_OBJECT_SIZE: usize = 1024 * 1024 * 1024;

/// Boxed future returned by [`BlobStore`] methods
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Store statistics
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    /// Number of containers
    pub container_count: u64,

    /// Total number of objects across containers
    pub object_count: u64,

    /// Total bytes held by objects
    pub bytes_used: u64,

    /// Number of get operations
    pub reads: u64,

    /// Number of put operations
    pub writes: u64,

    /// Number of delete operations that removed an object
    pub deletes: u64,
}

/// Async blob store trait
///
/// All implementations must be Send + Sync so a store can be shared behind
/// an `Arc` by concurrent callers.
pub trait BlobStore: Send + Sync {
    /// Create a container, succeeding if it already exists
    fn create_container<'a>(&'a self, container: &'a str) -> StoreFuture<'a, ()>;

    /// Check whether a container exists
    fn container_exists<'a>(&'a self, container: &'a str) -> StoreFuture<'a, bool>;

    /// Store an object, replacing any previous content
    fn put<'a>(&'a self, container: &'a str, key: &'a str, data: Bytes) -> StoreFuture<'a, ()>;

    /// Retrieve an object, `None` when the key is absent
    fn get<'a>(&'a self, container: &'a str, key: &'a str) -> StoreFuture<'a, Option<Bytes>>;

    /// Delete an object, returning whether it existed
    fn delete<'a>(&'a self, container: &'a str, key: &'a str) -> StoreFuture<'a, bool>;

    /// List keys starting with `prefix`, in lexicographic order
    fn list<'a>(&'a self, container: &'a str, prefix: &'a str) -> StoreFuture<'a, Vec<String>>;

    /// Get store statistics
    fn stats(&self) -> StoreFuture<'_, StoreStats>;
}

/// Synchronous blob store trait (for embedded implementations)
pub trait BlobStoreSync: Send + Sync {
    fn create_container(&self, container: &str) -> Result<()>;

    fn container_exists(&self, container: &str) -> Result<bool>;

    fn put(&self, container: &str, key: &str, data: Bytes) -> Result<()>;

    fn get(&self, container: &str, key: &str) -> Result<Option<Bytes>>;

    fn delete(&self, container: &str, key: &str) -> Result<bool>;

    fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>>;

    fn stats(&self) -> Result<StoreStats>;
}

/// Wrapper to convert a sync store to async
pub struct AsyncWrapper<T: BlobStoreSync>(pub T);

impl<T: BlobStoreSync + 'static> BlobStore for AsyncWrapper<T> {
    fn create_container<'a>(&'a self, container: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move { self.0.create_container(container) })
    }

    fn container_exists<'a>(&'a self, container: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { self.0.container_exists(container) })
    }

    fn put<'a>(&'a self, container: &'a str, key: &'a str, data: Bytes) -> StoreFuture<'a, ()> {
        Box::pin(async move { self.0.put(container, key, data) })
    }

    fn get<'a>(&'a self, container: &'a str, key: &'a str) -> StoreFuture<'a, Option<Bytes>> {
        Box::pin(async move { self.0.get(container, key) })
    }

    fn delete<'a>(&'a self, container: &'a str, key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { self.0.delete(container, key) })
    }

    fn list<'a>(&'a self, container: &'a str, prefix: &'a str) -> StoreFuture<'a, Vec<String>> {
        Box::pin(async move { self.0.list(container, prefix) })
    }

    fn stats(&self) -> StoreFuture<'_, StoreStats> {
        Box::pin(async move { self.0.stats() })
    }
}

/// Reject objects above [`MAX_OBJECT_SIZE`]
pub(crate) fn check_object_size(data: &Bytes) -> Result<()> {
    if data.len() > MAX_OBJECT_SIZE {
        return Err(localdriver_core::Error::ObjectTooLarge {
            size: data.len(),
            max: MAX_OBJECT_SIZE,
        });
    }
    Ok(())
}
