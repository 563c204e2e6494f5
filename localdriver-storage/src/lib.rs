//! LocalDriver Storage Backend
//!
//! Provides the object storage abstraction holding resource metadata:
//! - `BlobStore` trait for pluggable object stores
//! - `SledBlobStore` for persistent local storage
//! - `MemoryBlobStore` for testing

pub mod backend;
pub mod memory;
pub mod sled_backend;

pub use backend::{AsyncWrapper, BlobStore, BlobStoreSync, StoreFuture, StoreStats, MAX_OBJECT_SIZE};
pub use memory::MemoryBlobStore;
pub use sled_backend::SledBlobStore;

use localdriver_core::{Error, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Prefix of the container holding metadata
pub const METADATA_BUCKET_PREFIX: &str = "0.localdriver";

/// Build the name of the metadata container of a tenant
///
/// `tenant_id` comes from the provider, not the human tenant name. The result
/// is lower-cased and restricted to characters accepted by S3-like stores.
pub fn metadata_bucket_name(tenant_id: &str) -> String {
    let sanitized: String = tenant_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    format!("{}-{}", METADATA_BUCKET_PREFIX, sanitized)
}

/// Create the metadata container if it does not exist yet
pub async fn initialize_bucket(store: &dyn BlobStore, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Configuration(
            "metadata bucket name is empty".to_string(),
        ));
    }
    if !store.container_exists(name).await? {
        info!(bucket = %name, "Initializing metadata bucket");
        store.create_container(name).await?;
    }
    Ok(())
}

/// Which object store to open
#[derive(Debug, Clone)]
pub enum StoreConfig {
    /// Volatile store, lost on exit
    Memory,
    /// Sled database at the given path
    Sled { path: PathBuf },
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Sled {
            path: PathBuf::from("./localdriver_data"),
        }
    }
}

impl StoreConfig {
    /// Open the configured store
    pub fn open(&self) -> Result<Arc<dyn BlobStore>> {
        Ok(match self {
            Self::Memory => Arc::new(AsyncWrapper(MemoryBlobStore::new())),
            Self::Sled { path } => Arc::new(AsyncWrapper(SledBlobStore::open(path)?)),
        })
    }
}
