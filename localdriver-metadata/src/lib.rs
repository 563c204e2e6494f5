//! LocalDriver Metadata
//!
//! Keeps the inventory of hosts, networks and volumes in an object store so
//! the hypervisor can be treated as a managed resource pool.
//!
//! # Layout
//!
//! ```text
//! <bucket>/
//! ├── hosts/byID/<id>        ├── hosts/byName/<name>
//! ├── networks/byID/<id>     ├── networks/byName/<name>
//! └── volumes/byID/<id>      └── volumes/byName/<name>
//! ```
//!
//! Both index entries hold the full serialized record. Nothing is cached in
//! memory: every operation reads the store again, and mutations of one record
//! are serialised through the advisory locks of a shared [`LockTable`].
//!
//! # Usage
//!
//! ```ignore
//! use localdriver_metadata::{MetadataConfig, MetadataContext, host};
//!
//! let ctx = MetadataContext::open(store, &MetadataConfig::default()).await?;
//! host::save_host(&ctx, &new_host).await?;
//! let found = host::load_host(&ctx, "web-1").await?;
//! ```

pub mod attachment;
pub mod gateway;
pub mod host;
pub mod item;
pub mod lock;
pub mod network;
pub mod repair;
pub mod volume;

pub use attachment::{
    normalize_mount_path, parse_block_devices, resolve_new_device, AttachmentInfo, MountSpec,
    VolumeAttacher,
};
pub use gateway::{load_gateway, remove_gateway, save_gateway, GatewayMetadata};
pub use host::HostMetadata;
pub use item::{ItemLock, MetadataItem};
pub use lock::{LockGuard, LockTable};
pub use network::NetworkMetadata;
pub use repair::{reconcile, RepairReport};
pub use volume::VolumeMetadata;

use localdriver_core::Result;
use localdriver_storage::{initialize_bucket, metadata_bucket_name, BlobStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Metadata layer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// Provider tenant id the metadata bucket is named after
    #[serde(default = "default_tenant_id")]
    pub tenant_id: String,

    /// How long to wait for a record lock (seconds)
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
}

fn default_tenant_id() -> String {
    std::env::var("LOCALDRIVER_TENANT_ID").unwrap_or_else(|_| "local".to_string())
}

fn default_lock_timeout_secs() -> u64 {
    std::env::var("LOCALDRIVER_LOCK_TIMEOUT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(30)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            tenant_id: default_tenant_id(),
            lock_timeout_secs: default_lock_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    pub fn bucket(&self) -> String {
        metadata_bucket_name(&self.tenant_id)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}

/// Everything a metadata operation needs, cheap to clone
#[derive(Clone)]
pub struct MetadataContext {
    store: Arc<dyn BlobStore>,
    bucket: String,
    locks: Arc<LockTable>,
    lock_timeout: Duration,
}

impl MetadataContext {
    /// Build a context over an existing bucket
    pub fn new(store: Arc<dyn BlobStore>, bucket: impl Into<String>, lock_timeout: Duration) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            locks: Arc::new(LockTable::new()),
            lock_timeout,
        }
    }

    /// Build a context from configuration, creating the bucket if needed
    pub async fn open(store: Arc<dyn BlobStore>, config: &MetadataConfig) -> Result<Self> {
        let bucket = config.bucket();
        initialize_bucket(store.as_ref(), &bucket).await?;
        Ok(Self::new(store, bucket, config.lock_timeout()))
    }

    pub fn store(&self) -> &dyn BlobStore {
        self.store.as_ref()
    }

    pub fn store_handle(&self) -> Arc<dyn BlobStore> {
        Arc::clone(&self.store)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }
}

/// Context over a fresh in-memory bucket
#[cfg(test)]
pub(crate) async fn test_context() -> MetadataContext {
    let store = localdriver_storage::StoreConfig::Memory.open().unwrap();
    let config = MetadataConfig {
        tenant_id: "test".to_string(),
        lock_timeout_secs: 1,
    };
    MetadataContext::open(store, &config).await.unwrap()
}
