//! Requests sent to the hypervisor driver and catalog entries it returns

use crate::model::{IpVersion, Network, VolumeSpeed};
use crate::props::HostSize;
use serde::{Deserialize, Serialize};

/// OS image available to new hosts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    pub name: String,
    /// Path of the disk image on the hypervisor
    #[serde(default)]
    pub path: String,
}

/// Predefined host size
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostTemplate {
    pub id: String,
    pub name: String,
    pub size: HostSize,
}

/// Minimum resources a host must get
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SizingRequirements {
    pub min_cores: u32,
    /// GB
    pub min_ram_size: f32,
    /// GB
    pub min_disk_size: u32,
    pub min_gpu: u32,
    /// GHz
    pub min_freq: f32,
}

/// SSH key pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyPair {
    pub id: String,
    pub name: String,
    pub public_key: String,
    pub private_key: String,
}

#[derive(Debug, Clone)]
pub struct NetworkRequest {
    pub name: String,
    pub ip_version: IpVersion,
    pub cidr: String,
    pub dns_servers: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub network: Network,
    pub template_id: String,
    pub image_id: String,
    /// Defaults to `gw-<network name>` when empty
    pub name: String,
    pub key_pair: Option<KeyPair>,
}

impl GatewayRequest {
    pub fn host_name(&self) -> String {
        if self.name.is_empty() {
            format!("gw-{}", self.network.name)
        } else {
            self.name.clone()
        }
    }
}

#[derive(Debug, Clone)]
pub struct HostRequest {
    pub name: String,
    pub public_ip: bool,
    pub networks: Vec<Network>,
    /// Id of the gateway host of the default network
    pub default_gateway_id: Option<String>,
    pub template_id: String,
    pub image_id: String,
    pub key_pair: Option<KeyPair>,
}

#[derive(Debug, Clone)]
pub struct VolumeRequest {
    pub name: String,
    /// GB
    pub size: u32,
    pub speed: VolumeSpeed,
}

#[derive(Debug, Clone)]
pub struct VolumeAttachmentRequest {
    pub name: String,
    pub volume_id: String,
    pub host_id: String,
}

impl VolumeAttachmentRequest {
    pub fn new(volume_id: &str, volume_name: &str, host_id: &str, host_name: &str) -> Self {
        Self {
            name: format!("attachment-{}-{}", host_name, volume_name),
            volume_id: volume_id.to_string(),
            host_id: host_id.to_string(),
        }
    }
}
