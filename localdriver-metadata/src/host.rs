//! Host metadata

use crate::item::{self, MetadataItem};
use crate::MetadataContext;
use localdriver_core::{Host, Result};

/// Handle on the stored record of a host
pub type HostMetadata = MetadataItem<Host>;

pub async fn save_host(ctx: &MetadataContext, host: &Host) -> Result<()> {
    item::save(ctx, host).await
}

pub async fn remove_host(ctx: &MetadataContext, host: &Host) -> Result<()> {
    item::remove(ctx, host).await
}

pub async fn load_host_by_id(ctx: &MetadataContext, id: &str) -> Result<Option<HostMetadata>> {
    item::load_by_id(ctx, id).await
}

pub async fn load_host_by_name(ctx: &MetadataContext, name: &str) -> Result<Option<HostMetadata>> {
    item::load_by_name(ctx, name).await
}

/// Load a host by id, then by name
pub async fn load_host(ctx: &MetadataContext, reference: &str) -> Result<Option<HostMetadata>> {
    item::load(ctx, reference).await
}

/// Every stored host
pub async fn list_hosts(ctx: &MetadataContext) -> Result<Vec<Host>> {
    HostMetadata::new(ctx).list().await
}
