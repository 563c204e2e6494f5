//! Volume attachment workflow
//!
//! The hypervisor does not say which device a newly attached disk gets inside
//! the guest. The attacher lists the guest's disks before and after the
//! attach and takes the single device that appeared. Attachments on one host
//! are serialised by the `attach/{host_id}` lock so two concurrent attaches
//! cannot see each other's device.

use crate::host::HostMetadata;
use crate::item::{self, update};
use crate::volume::VolumeMetadata;
use crate::MetadataContext;
use localdriver_core::props::{HostLocalMount, HostMountsV1, HostVolumesV1, VolumeAttachedV1};
use localdriver_core::{
    Error, Host, Result, Volume, VolumeAttachmentRequest, DEFAULT_FILESYSTEM,
    DEFAULT_VOLUME_MOUNT_POINT,
};
use localdriver_provider::{BlockDeviceMounter, Hypervisor, RemoteExecutor};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Names of the whole disks in `lsblk -l -n -o NAME,TYPE` output
pub fn parse_block_devices(stdout: &str) -> BTreeSet<String> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some(name), Some("disk")) => Some(name.to_string()),
                _ => None,
            }
        })
        .collect()
}

/// The one device present in `after` but not in `before`
///
/// Any other number of new devices is returned as the error, in order.
pub fn resolve_new_device(
    before: &BTreeSet<String>,
    after: &BTreeSet<String>,
) -> std::result::Result<String, Vec<String>> {
    let mut gained: Vec<String> = after.difference(before).cloned().collect();
    if gained.len() == 1 {
        Ok(gained.remove(0))
    } else {
        Err(gained)
    }
}

/// `path` without trailing slashes, `/` kept as is
pub fn normalize_mount_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Where and how to mount an attached volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub path: String,
    pub format: String,
}

impl Default for MountSpec {
    fn default() -> Self {
        Self {
            path: DEFAULT_VOLUME_MOUNT_POINT.to_string(),
            format: DEFAULT_FILESYSTEM.to_string(),
        }
    }
}

/// Result of a successful attach
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentInfo {
    pub volume_id: String,
    pub host_id: String,
    pub attach_id: String,
    /// e.g. `/dev/vdb`
    pub device: String,
    pub path: String,
}

/// Attaches volumes to hosts and keeps both records in step
pub struct VolumeAttacher<'a> {
    ctx: &'a MetadataContext,
    hypervisor: &'a dyn Hypervisor,
    executor: &'a dyn RemoteExecutor,
}

impl<'a> VolumeAttacher<'a> {
    /// `executor` must run commands on the host the volumes go to
    pub fn new(
        ctx: &'a MetadataContext,
        hypervisor: &'a dyn Hypervisor,
        executor: &'a dyn RemoteExecutor,
    ) -> Self {
        Self {
            ctx,
            hypervisor,
            executor,
        }
    }

    async fn load(&self, volume_ref: &str, host_ref: &str) -> Result<(Volume, HostMetadata)> {
        let volume: VolumeMetadata = item::require(self.ctx, volume_ref).await?;
        let host: HostMetadata = item::require(self.ctx, host_ref).await?;
        let volume = volume.into_inner().ok_or(Error::NothingCarried)?;
        Ok((volume, host))
    }

    async fn disks(&self, mounter: &BlockDeviceMounter<'_>) -> Result<BTreeSet<String>> {
        Ok(parse_block_devices(&mounter.list_block_devices().await?))
    }

    /// Attach, locate, mount, then record the attachment on both sides
    ///
    /// When the new device cannot be told apart the hypervisor attachment is
    /// left in place and nothing is mounted or recorded.
    pub async fn attach(&self, volume_ref: &str, host_ref: &str, spec: &MountSpec) -> Result<AttachmentInfo> {
        let (volume, mut host_item) = self.load(volume_ref, host_ref).await?;
        let host_id = host_item.id().to_string();

        let _lock = self
            .ctx
            .locks()
            .acquire(&format!("attach/{}", host_id), self.ctx.lock_timeout())
            .await?;
        host_item.reload().await?;
        let host: Host = host_item.into_inner().ok_or(Error::NothingCarried)?;

        let volumes: HostVolumesV1 = host.properties.get()?;
        if volumes.volumes_by_id.contains_key(&volume.id) {
            return Err(Error::AlreadyAttached {
                volume: volume.name,
                host: host.name,
            });
        }
        let path = normalize_mount_path(&spec.path);
        let mounts: HostMountsV1 = host.properties.get()?;
        if mounts.local_mounts_by_path.contains_key(&path) {
            return Err(Error::MountPathInUse {
                path,
                host: host.name,
            });
        }

        let mounter = BlockDeviceMounter::new(self.executor);
        let before = self.disks(&mounter).await?;
        let attach_id = self
            .hypervisor
            .create_volume_attachment(VolumeAttachmentRequest::new(
                &volume.id,
                &volume.name,
                &host.id,
                &host.name,
            ))
            .await?;
        let after = self.disks(&mounter).await?;

        let device = match resolve_new_device(&before, &after) {
            Ok(device) => format!("/dev/{}", device),
            Err(gained) => {
                warn!(
                    host = %host.name,
                    volume = %volume.name,
                    attach_id = %attach_id,
                    gained = ?gained,
                    "Cannot identify attached device"
                );
                return Err(Error::AmbiguousAttachment {
                    host: host.name,
                    gained,
                });
            }
        };
        if let Some(holder) = volumes.volumes_by_device.get(&device) {
            return Err(Error::Inconsistency(format!(
                "device '{}' on host '{}' is already recorded for volume '{}'",
                device, host.name, holder
            )));
        }
        debug!(host = %host.name, volume = %volume.name, device = %device, "Resolved attached device");

        mounter
            .mount_block_device(&device, &path, &spec.format)
            .await?;

        let mount = HostLocalMount {
            device: device.clone(),
            path: path.clone(),
            file_system: spec.format.clone(),
        };
        update::<Host, _, _>(self.ctx, &host.id, |h| {
            h.properties.update::<HostVolumesV1, _, _>(|v| {
                v.insert(&volume.id, &volume.name, &attach_id, &device)
            })?;
            h.properties
                .update::<HostMountsV1, _, _>(|m| m.insert(mount))
        })
        .await?;
        update::<Volume, _, _>(self.ctx, &volume.id, |v| {
            v.properties.update::<VolumeAttachedV1, _, _>(|a| {
                a.hosts.insert(host.id.clone(), host.name.clone());
            })
        })
        .await?;

        info!(
            host = %host.name,
            volume = %volume.name,
            device = %device,
            path = %path,
            "Volume attached"
        );
        Ok(AttachmentInfo {
            volume_id: volume.id,
            host_id: host.id,
            attach_id,
            device,
            path,
        })
    }

    /// Unmount, detach, then forget the attachment on both sides
    pub async fn detach(&self, volume_ref: &str, host_ref: &str) -> Result<()> {
        let (volume, mut host_item) = self.load(volume_ref, host_ref).await?;
        let host_id = host_item.id().to_string();

        let _lock = self
            .ctx
            .locks()
            .acquire(&format!("attach/{}", host_id), self.ctx.lock_timeout())
            .await?;
        host_item.reload().await?;
        let host: Host = host_item.into_inner().ok_or(Error::NothingCarried)?;

        let volumes: HostVolumesV1 = host.properties.get()?;
        let attachment = volumes
            .volumes_by_id
            .get(&volume.id)
            .cloned()
            .ok_or_else(|| Error::NotAttached {
                volume: volume.name.clone(),
                host: host.name.clone(),
            })?;
        let mounts: HostMountsV1 = host.properties.get()?;
        if mounts.by_device(&attachment.device).is_none() {
            return Err(Error::Inconsistency(format!(
                "no mount recorded for device '{}' of volume '{}' on host '{}'",
                attachment.device, volume.name, host.name
            )));
        }

        BlockDeviceMounter::new(self.executor)
            .unmount_block_device(&attachment.device)
            .await?;
        self.hypervisor
            .delete_volume_attachment(&host.id, &attachment.attach_id)
            .await?;

        update::<Host, _, _>(self.ctx, &host.id, |h| {
            h.properties
                .update::<HostVolumesV1, _, _>(|v| v.remove(&volume.id))?;
            h.properties
                .update::<HostMountsV1, _, _>(|m| m.remove_device(&attachment.device))?;
            Ok(())
        })
        .await?;
        update::<Volume, _, _>(self.ctx, &volume.id, |v| {
            v.properties.update::<VolumeAttachedV1, _, _>(|a| {
                a.hosts.remove(&host.id);
            })
        })
        .await?;

        info!(host = %host.name, volume = %volume.name, device = %attachment.device, "Volume detached");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn set(devices: &[&str]) -> BTreeSet<String> {
        devices.iter().map(|d| d.to_string()).collect()
    }

    #[test]
    fn test_parse_block_devices() {
        let out = "sda disk\nsda1 part\n\nsdb disk\nsr0 rom\n  \n";
        assert_eq!(parse_block_devices(out), set(&["sda", "sdb"]));
        assert!(parse_block_devices("").is_empty());
    }

    #[test]
    fn test_single_new_device() {
        let device = resolve_new_device(&set(&["sda", "sdb"]), &set(&["sda", "sdb", "sdc"]));
        assert_eq!(device, Ok("sdc".to_string()));
    }

    #[test]
    fn test_two_new_devices() {
        let gained = resolve_new_device(&set(&["sda"]), &set(&["sda", "sdb", "sdc"])).unwrap_err();
        assert_eq!(gained, vec!["sdb", "sdc"]);
    }

    #[test]
    fn test_no_new_device() {
        let gained = resolve_new_device(&set(&["sda"]), &set(&["sda"])).unwrap_err();
        assert!(gained.is_empty());
    }

    #[test]
    fn test_lost_device_is_ignored() {
        let device = resolve_new_device(&set(&["sda", "sdb"]), &set(&["sda", "sdc"]));
        assert_eq!(device, Ok("sdc".to_string()));
    }

    #[test]
    fn test_default_mount_spec() {
        let spec = MountSpec::default();
        assert_eq!(spec.path, "/shared/data");
        assert_eq!(spec.format, "ext4");
    }

    #[test]
    fn test_normalize_mount_path() {
        assert_eq!(normalize_mount_path("/data/"), "/data");
        assert_eq!(normalize_mount_path("/data//"), "/data");
        assert_eq!(normalize_mount_path("/data"), "/data");
        assert_eq!(normalize_mount_path("/"), "/");
    }

    proptest! {
        #[test]
        fn prop_one_added_device_is_found(
            before in proptest::collection::btree_set("[a-z]{3}", 0..8),
            added in "[A-Z]{3}",
        ) {
            let mut after = before.clone();
            after.insert(added.clone());
            prop_assert_eq!(resolve_new_device(&before, &after), Ok(added));
        }

        #[test]
        fn prop_unchanged_inventory_is_ambiguous(
            before in proptest::collection::btree_set("[a-z]{3}", 0..8),
        ) {
            prop_assert_eq!(resolve_new_device(&before, &before), Err(vec![]));
        }
    }
}
