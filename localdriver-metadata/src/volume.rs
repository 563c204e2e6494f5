//! Volume metadata

use crate::item::{self, MetadataItem};
use crate::MetadataContext;
use localdriver_core::{Result, Volume};

/// Handle on the stored record of a volume
pub type VolumeMetadata = MetadataItem<Volume>;

pub async fn save_volume(ctx: &MetadataContext, volume: &Volume) -> Result<()> {
    item::save(ctx, volume).await
}

pub async fn remove_volume(ctx: &MetadataContext, volume: &Volume) -> Result<()> {
    item::remove(ctx, volume).await
}

pub async fn load_volume_by_id(ctx: &MetadataContext, id: &str) -> Result<Option<VolumeMetadata>> {
    item::load_by_id(ctx, id).await
}

pub async fn load_volume_by_name(ctx: &MetadataContext, name: &str) -> Result<Option<VolumeMetadata>> {
    item::load_by_name(ctx, name).await
}

/// Load a volume by id, then by name
pub async fn load_volume(ctx: &MetadataContext, reference: &str) -> Result<Option<VolumeMetadata>> {
    item::load(ctx, reference).await
}

pub async fn list_volumes(ctx: &MetadataContext) -> Result<Vec<Volume>> {
    VolumeMetadata::new(ctx).list().await
}
