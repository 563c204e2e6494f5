//! Version 1 property facets
//!
//! Maps are keyed by resource id unless the field name says otherwise. Every
//! field carries `#[serde(default)]` so facets written by an older build
//! decode cleanly after fields are added.

use crate::property::{HostDomain, NetworkDomain, Property, VolumeDomain};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ===== Network =====

/// Hosts attached to a network (the gateway is not listed here)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkHostsV1 {
    /// host id -> host name
    #[serde(default)]
    pub by_id: BTreeMap<String, String>,
    /// host name -> host id
    #[serde(default)]
    pub by_name: BTreeMap<String, String>,
}

impl Property for NetworkHostsV1 {
    type Domain = NetworkDomain;
    const KEY: &'static str = "hosts.v1";
}

// ===== Host =====

/// Free-form description of a host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostDescriptionV1 {
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub creator: String,
    #[serde(default)]
    pub purpose: String,
}

impl Property for HostDescriptionV1 {
    type Domain = HostDomain;
    const KEY: &'static str = "description.v1";
}

/// Compute resources of a host or template
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostSize {
    #[serde(default)]
    pub cores: u32,
    /// GB
    #[serde(default)]
    pub ram_size: f32,
    /// GB
    #[serde(default)]
    pub disk_size: u32,
    #[serde(default)]
    pub gpu_number: u32,
    #[serde(default)]
    pub gpu_type: String,
}

/// Requested and allocated sizing of a host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostSizingV1 {
    #[serde(default)]
    pub requested: Option<HostSize>,
    #[serde(default)]
    pub allocated: HostSize,
    #[serde(default)]
    pub template: String,
}

impl Property for HostSizingV1 {
    type Domain = HostDomain;
    const KEY: &'static str = "sizing.v1";
}

/// Network placement of a host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostNetworkV1 {
    #[serde(default)]
    pub is_gateway: bool,
    #[serde(default)]
    pub default_network_id: String,
    #[serde(default)]
    pub default_gateway_id: String,
    /// network id -> network name
    #[serde(default)]
    pub networks_by_id: BTreeMap<String, String>,
    /// network name -> network id
    #[serde(default)]
    pub networks_by_name: BTreeMap<String, String>,
    /// network id -> address
    #[serde(default)]
    pub ipv4_addresses: BTreeMap<String, String>,
}

impl Property for HostNetworkV1 {
    type Domain = HostDomain;
    const KEY: &'static str = "network.v1";
}

/// One volume attached to a host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostVolume {
    /// Attachment id returned by the hypervisor
    #[serde(default)]
    pub attach_id: String,
    /// Device path on the host, e.g. `/dev/vdb`
    #[serde(default)]
    pub device: String,
}

/// Volumes attached to a host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostVolumesV1 {
    #[serde(default)]
    pub volumes_by_id: BTreeMap<String, HostVolume>,
    /// volume name -> volume id
    #[serde(default)]
    pub volumes_by_name: BTreeMap<String, String>,
    /// device -> volume id
    #[serde(default)]
    pub volumes_by_device: BTreeMap<String, String>,
    /// volume id -> device
    #[serde(default)]
    pub devices_by_id: BTreeMap<String, String>,
}

impl HostVolumesV1 {
    /// Record an attachment under every index
    pub fn insert(&mut self, volume_id: &str, volume_name: &str, attach_id: &str, device: &str) {
        self.volumes_by_id.insert(
            volume_id.to_string(),
            HostVolume {
                attach_id: attach_id.to_string(),
                device: device.to_string(),
            },
        );
        self.volumes_by_name
            .insert(volume_name.to_string(), volume_id.to_string());
        self.volumes_by_device
            .insert(device.to_string(), volume_id.to_string());
        self.devices_by_id
            .insert(volume_id.to_string(), device.to_string());
    }

    /// Forget an attachment under every index, returning what was recorded
    pub fn remove(&mut self, volume_id: &str) -> Option<HostVolume> {
        let attachment = self.volumes_by_id.remove(volume_id)?;
        self.volumes_by_name.retain(|_, id| id != volume_id);
        self.volumes_by_device.remove(&attachment.device);
        self.devices_by_id.remove(volume_id);
        Some(attachment)
    }
}

impl Property for HostVolumesV1 {
    type Domain = HostDomain;
    const KEY: &'static str = "volumes.v1";
}

/// A block device mounted on a host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostLocalMount {
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub file_system: String,
}

/// Local mounts of a host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostMountsV1 {
    #[serde(default)]
    pub local_mounts_by_path: BTreeMap<String, HostLocalMount>,
    /// device -> mount path
    #[serde(default)]
    pub local_mounts_by_device: BTreeMap<String, String>,
}

impl HostMountsV1 {
    pub fn insert(&mut self, mount: HostLocalMount) {
        self.local_mounts_by_device
            .insert(mount.device.clone(), mount.path.clone());
        self.local_mounts_by_path.insert(mount.path.clone(), mount);
    }

    /// Mount recorded for a device, if both indexes agree
    pub fn by_device(&self, device: &str) -> Option<&HostLocalMount> {
        let path = self.local_mounts_by_device.get(device)?;
        self.local_mounts_by_path.get(path)
    }

    pub fn remove_device(&mut self, device: &str) -> Option<HostLocalMount> {
        let path = self.local_mounts_by_device.remove(device)?;
        self.local_mounts_by_path.remove(&path)
    }
}

impl Property for HostMountsV1 {
    type Domain = HostDomain;
    const KEY: &'static str = "mounts.v1";
}

// ===== Volume =====

/// Hosts a volume is attached to
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeAttachedV1 {
    /// host id -> host name
    #[serde(default)]
    pub hosts: BTreeMap<String, String>,
}

impl Property for VolumeAttachedV1 {
    type Domain = VolumeDomain;
    const KEY: &'static str = "attached.v1";
}

/// Free-form description of a volume
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeDescriptionV1 {
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
}

impl Property for VolumeDescriptionV1 {
    type Domain = VolumeDomain;
    const KEY: &'static str = "description.v1";
}
