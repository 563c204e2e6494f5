//! Dual-indexed metadata records
//!
//! A [`MetadataItem`] carries at most one record and mirrors it under
//! `{folder}/byID/{id}` and `{folder}/byName/{name}`. The two puts of a write
//! and the two deletes of a delete are separate store calls: a failure in
//! between leaves one index ahead of the other, and retrying the same call
//! converges.

use crate::lock::LockGuard;
use crate::MetadataContext;
use bytes::Bytes;
use localdriver_core::{Error, Record, Result};
use tracing::{debug, trace};

/// Advisory lock on one record
pub type ItemLock = LockGuard;

const BY_ID: &str = "byID";
const BY_NAME: &str = "byName";

fn index_prefix<R: Record>(index: &str) -> String {
    format!("{}/{}/", R::FOLDER, index)
}

fn id_key<R: Record>(id: &str) -> String {
    format!("{}{}", index_prefix::<R>(BY_ID), id)
}

fn name_key<R: Record>(name: &str) -> String {
    format!("{}{}", index_prefix::<R>(BY_NAME), name)
}

/// Lock key of a record
pub(crate) fn lock_key<R: Record>(id: &str) -> String {
    format!("{}/{}", R::FOLDER, id)
}

/// Handle on one stored record
pub struct MetadataItem<R: Record> {
    ctx: MetadataContext,
    record: Option<R>,
    id: String,
    name: String,
}

impl<R: Record> MetadataItem<R> {
    /// Create an empty handle
    pub fn new(ctx: &MetadataContext) -> Self {
        Self {
            ctx: ctx.clone(),
            record: None,
            id: String::new(),
            name: String::new(),
        }
    }

    /// Folder holding the indexes of this kind
    pub fn path(&self) -> &'static str {
        R::FOLDER
    }

    pub fn context(&self) -> &MetadataContext {
        &self.ctx
    }

    /// Bind a record to the handle, replacing any carried one
    pub fn carry(&mut self, record: R) -> &mut Self {
        self.id = record.id().to_string();
        self.name = record.name().to_string();
        self.record = Some(record);
        self
    }

    pub fn get(&self) -> Option<&R> {
        self.record.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut R> {
        self.record.as_mut()
    }

    pub fn into_inner(self) -> Option<R> {
        self.record
    }

    /// Id the handle is indexed under, empty when nothing was ever carried
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Store the carried record under both indexes
    ///
    /// When the record was renamed since it was carried or read, the entry
    /// under the previous name is removed after both puts succeed.
    pub async fn write(&mut self) -> Result<()> {
        let record = self.record.as_ref().ok_or(Error::NothingCarried)?;
        let id = record.id().to_string();
        let name = record.name().to_string();
        let data = Bytes::from(record.to_bytes()?);

        let store = self.ctx.store();
        let bucket = self.ctx.bucket();
        store.put(bucket, &id_key::<R>(&id), data.clone()).await?;
        store.put(bucket, &name_key::<R>(&name), data).await?;

        let previous = std::mem::replace(&mut self.name, name);
        self.id = id;
        if !previous.is_empty() && previous != self.name {
            debug!(folder = R::FOLDER, id = %self.id, from = %previous, to = %self.name, "Record renamed");
            store.delete(bucket, &name_key::<R>(&previous)).await?;
        }

        debug!(folder = R::FOLDER, id = %self.id, name = %self.name, "Wrote metadata");
        Ok(())
    }

    async fn read_key(&mut self, key: &str) -> Result<bool> {
        let Some(data) = self.ctx.store().get(self.ctx.bucket(), key).await? else {
            trace!(key, "Metadata not found");
            return Ok(false);
        };
        let record = R::from_bytes(&data)?;
        self.carry(record);
        Ok(true)
    }

    /// Load the record stored under `id`, `Ok(false)` when there is none
    pub async fn read_by_id(&mut self, id: &str) -> Result<bool> {
        self.read_key(&id_key::<R>(id)).await
    }

    /// Load the record stored under `name`, `Ok(false)` when there is none
    pub async fn read_by_name(&mut self, name: &str) -> Result<bool> {
        self.read_key(&name_key::<R>(name)).await
    }

    /// Read the carried record again from the store
    pub async fn reload(&mut self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::NothingCarried);
        }
        let id = self.id.clone();
        if !self.read_by_id(&id).await? {
            return Err(Error::MetadataVanished {
                kind: R::KIND,
                key: id,
            });
        }
        Ok(())
    }

    /// Remove both index entries, entries already gone are fine
    pub async fn delete(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::NothingCarried);
        }
        let store = self.ctx.store();
        let bucket = self.ctx.bucket();
        store.delete(bucket, &id_key::<R>(&self.id)).await?;
        if !self.name.is_empty() {
            store.delete(bucket, &name_key::<R>(&self.name)).await?;
        }
        debug!(folder = R::FOLDER, id = %self.id, name = %self.name, "Deleted metadata");
        Ok(())
    }

    /// Visit every stored record of this kind
    ///
    /// The id index is listed on each call. Entries removed between the
    /// listing and their fetch are skipped. The first callback error stops
    /// the walk and is returned.
    pub async fn browse<F>(&self, mut callback: F) -> Result<()>
    where
        F: FnMut(R) -> Result<()>,
    {
        let store = self.ctx.store();
        let bucket = self.ctx.bucket();
        let keys = store.list(bucket, &index_prefix::<R>(BY_ID)).await?;
        for key in keys {
            let Some(data) = store.get(bucket, &key).await? else {
                debug!(key = %key, "Metadata vanished while browsing");
                continue;
            };
            callback(R::from_bytes(&data)?)?;
        }
        Ok(())
    }

    /// All stored records of this kind
    pub async fn list(&self) -> Result<Vec<R>> {
        let mut records = Vec::new();
        self.browse(|record| {
            records.push(record);
            Ok(())
        })
        .await?;
        Ok(records)
    }

    /// Take the advisory lock of the carried record
    pub async fn acquire(&self) -> Result<ItemLock> {
        if self.id.is_empty() {
            return Err(Error::NothingCarried);
        }
        self.ctx
            .locks()
            .acquire(&lock_key::<R>(&self.id), self.ctx.lock_timeout())
            .await
    }
}

/// Write a record under both indexes
pub async fn save<R: Record>(ctx: &MetadataContext, record: &R) -> Result<()> {
    let mut item = MetadataItem::new(ctx);
    item.carry(record.clone());
    item.write().await
}

/// Delete both index entries of a record
pub async fn remove<R: Record>(ctx: &MetadataContext, record: &R) -> Result<()> {
    let mut item = MetadataItem::new(ctx);
    item.carry(record.clone());
    item.delete().await
}

pub async fn load_by_id<R: Record>(ctx: &MetadataContext, id: &str) -> Result<Option<MetadataItem<R>>> {
    let mut item = MetadataItem::new(ctx);
    Ok(item.read_by_id(id).await?.then_some(item))
}

pub async fn load_by_name<R: Record>(
    ctx: &MetadataContext,
    name: &str,
) -> Result<Option<MetadataItem<R>>> {
    let mut item = MetadataItem::new(ctx);
    Ok(item.read_by_name(name).await?.then_some(item))
}

/// Load by id, then by name
pub async fn load<R: Record>(ctx: &MetadataContext, reference: &str) -> Result<Option<MetadataItem<R>>> {
    if let Some(item) = load_by_id(ctx, reference).await? {
        return Ok(Some(item));
    }
    load_by_name(ctx, reference).await
}

/// Load a record that must exist
pub async fn require<R: Record>(ctx: &MetadataContext, reference: &str) -> Result<MetadataItem<R>> {
    load(ctx, reference).await?.ok_or_else(|| Error::NotFound {
        kind: R::KIND,
        key: reference.to_string(),
    })
}

/// Locked read-modify-write of the record with id `id`
///
/// The lock is taken before the read so no concurrent update is lost.
pub async fn update<R, F, T>(ctx: &MetadataContext, id: &str, f: F) -> Result<T>
where
    R: Record,
    F: FnOnce(&mut R) -> Result<T>,
{
    let _lock = ctx
        .locks()
        .acquire(&lock_key::<R>(id), ctx.lock_timeout())
        .await?;

    let mut item = MetadataItem::<R>::new(ctx);
    if !item.read_by_id(id).await? {
        return Err(Error::MetadataVanished {
            kind: R::KIND,
            key: id.to_string(),
        });
    }
    let record = item.get_mut().ok_or(Error::NothingCarried)?;
    let out = f(record)?;
    item.write().await?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_context;
    use localdriver_core::props::HostVolumesV1;
    use localdriver_core::Host;
    use localdriver_storage::{BlobStore, StoreFuture, StoreStats};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_write_then_read_both_indexes() {
        let ctx = test_context().await;
        let host = Host::new("web-1");
        save(&ctx, &host).await.unwrap();

        let by_id = load_by_id::<Host>(&ctx, &host.id).await.unwrap().unwrap();
        let by_name = load_by_name::<Host>(&ctx, "web-1").await.unwrap().unwrap();
        assert_eq!(by_id.get(), Some(&host));
        assert_eq!(by_name.get(), Some(&host));
        assert_eq!(by_id.path(), "hosts");
    }

    #[tokio::test]
    async fn test_overwrite_is_idempotent() {
        let ctx = test_context().await;
        let host = Host::new("web-1");
        save(&ctx, &host).await.unwrap();
        let keys = ctx.store().list(ctx.bucket(), "").await.unwrap();

        save(&ctx, &host).await.unwrap();
        assert_eq!(ctx.store().list(ctx.bucket(), "").await.unwrap(), keys);
        assert_eq!(keys.len(), 2);
    }

    #[tokio::test]
    async fn test_absent_is_not_an_error() {
        let ctx = test_context().await;
        let mut item = MetadataItem::<Host>::new(&ctx);
        assert!(!item.read_by_id("nope").await.unwrap());
        assert!(!item.read_by_name("nope").await.unwrap());
        assert!(item.get().is_none());
        assert!(load::<Host>(&ctx, "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unset_property_on_fresh_record() {
        let ctx = test_context().await;
        let host = Host::new("fresh");
        save(&ctx, &host).await.unwrap();

        let item = load_by_name::<Host>(&ctx, "fresh").await.unwrap().unwrap();
        let volumes: HostVolumesV1 = item.get().unwrap().properties.get().unwrap();
        assert_eq!(volumes, HostVolumesV1::default());
    }

    #[tokio::test]
    async fn test_delete_removes_both_indexes() {
        let ctx = test_context().await;
        let host = Host::new("web-1");
        save(&ctx, &host).await.unwrap();

        remove(&ctx, &host).await.unwrap();
        assert!(load_by_id::<Host>(&ctx, &host.id).await.unwrap().is_none());
        assert!(load_by_name::<Host>(&ctx, "web-1").await.unwrap().is_none());

        // Second delete finds nothing and still succeeds
        remove(&ctx, &host).await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_handle() {
        let ctx = test_context().await;
        let mut item = MetadataItem::<Host>::new(&ctx);
        assert!(matches!(item.write().await, Err(Error::NothingCarried)));
        assert!(matches!(item.delete().await, Err(Error::NothingCarried)));
        assert!(matches!(item.acquire().await, Err(Error::NothingCarried)));
    }

    #[tokio::test]
    async fn test_reload_of_deleted_record() {
        let ctx = test_context().await;
        let host = Host::new("web-1");
        let mut item = MetadataItem::new(&ctx);
        item.carry(host.clone()).write().await.unwrap();

        remove(&ctx, &host).await.unwrap();
        let err = item.reload().await.unwrap_err();
        assert!(matches!(err, Error::MetadataVanished { kind: "host", .. }));
    }

    #[tokio::test]
    async fn test_rename_drops_old_name_entry() {
        let ctx = test_context().await;
        let mut item = MetadataItem::new(&ctx);
        item.carry(Host::new("old")).write().await.unwrap();

        item.get_mut().unwrap().name = "new".to_string();
        item.write().await.unwrap();

        assert!(load_by_name::<Host>(&ctx, "old").await.unwrap().is_none());
        assert!(load_by_name::<Host>(&ctx, "new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_browse_visits_all_and_stops_on_error() {
        let ctx = test_context().await;
        for name in ["a", "b", "c"] {
            save(&ctx, &Host::new(name)).await.unwrap();
        }

        let item = MetadataItem::<Host>::new(&ctx);
        let mut names: Vec<String> = item.list().await.unwrap().into_iter().map(|h| h.name).collect();
        names.sort();
        assert_eq!(names, vec!["a", "b", "c"]);

        let mut visited = 0;
        let err = item
            .browse(|_| {
                visited += 1;
                Err(Error::Inconsistency("stop".to_string()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Inconsistency(_)));
        assert_eq!(visited, 1);
    }

    /// Lists one id that was never written
    struct GhostStore(Arc<dyn BlobStore>);

    impl BlobStore for GhostStore {
        fn create_container<'a>(&'a self, container: &'a str) -> StoreFuture<'a, ()> {
            self.0.create_container(container)
        }

        fn container_exists<'a>(&'a self, container: &'a str) -> StoreFuture<'a, bool> {
            self.0.container_exists(container)
        }

        fn put<'a>(&'a self, container: &'a str, key: &'a str, data: Bytes) -> StoreFuture<'a, ()> {
            self.0.put(container, key, data)
        }

        fn get<'a>(&'a self, container: &'a str, key: &'a str) -> StoreFuture<'a, Option<Bytes>> {
            self.0.get(container, key)
        }

        fn delete<'a>(&'a self, container: &'a str, key: &'a str) -> StoreFuture<'a, bool> {
            self.0.delete(container, key)
        }

        fn list<'a>(&'a self, container: &'a str, prefix: &'a str) -> StoreFuture<'a, Vec<String>> {
            Box::pin(async move {
                let mut keys = self.0.list(container, prefix).await?;
                keys.insert(0, format!("{}ghost", prefix));
                Ok(keys)
            })
        }

        fn stats(&self) -> StoreFuture<'_, StoreStats> {
            self.0.stats()
        }
    }

    #[tokio::test]
    async fn test_browse_skips_vanished_entries() {
        let inner = test_context().await;
        let store: Arc<dyn BlobStore> = Arc::new(GhostStore(inner.store_handle()));
        let ctx = MetadataContext::new(store, inner.bucket(), Duration::from_secs(1));
        save(&ctx, &Host::new("kept")).await.unwrap();

        let item = MetadataItem::<Host>::new(&ctx);
        let hosts = item.list().await.unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].name, "kept");
    }

    #[tokio::test]
    async fn test_update_applies_under_lock() {
        let ctx = test_context().await;
        let host = Host::new("web-1");
        save(&ctx, &host).await.unwrap();

        let device = update::<Host, _, _>(&ctx, &host.id, |h| {
            h.properties
                .update::<HostVolumesV1, _, _>(|v| v.insert("v1", "data", "a1", "/dev/vdb"))?;
            Ok("/dev/vdb".to_string())
        })
        .await
        .unwrap();
        assert_eq!(device, "/dev/vdb");

        let stored = load_by_name::<Host>(&ctx, "web-1").await.unwrap().unwrap();
        let volumes: HostVolumesV1 = stored.get().unwrap().properties.get().unwrap();
        assert!(volumes.volumes_by_id.contains_key("v1"));

        let err = update::<Host, _, _>(&ctx, "missing", |_| Ok(())).await.unwrap_err();
        assert!(matches!(err, Error::MetadataVanished { .. }));
    }

    #[tokio::test]
    async fn test_update_times_out_while_locked() {
        let ctx = test_context().await;
        let host = Host::new("web-1");
        let mut item = MetadataItem::new(&ctx);
        item.carry(host.clone()).write().await.unwrap();

        let _lock = item.acquire().await.unwrap();
        let err = update::<Host, _, _>(&ctx, &host.id, |_| Ok(())).await.unwrap_err();
        assert!(matches!(err, Error::LockTimeout { .. }));
    }
}
