//! Resource records persisted as metadata
//!
//! Each record carries an opaque id, a human name unique within its kind,
//! and a property bag for versioned facets.

use crate::error::Result;
use crate::property::{HostDomain, NetworkDomain, Properties, VolumeDomain};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A record that can be stored under both its id and its name
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Singular kind name used in messages ("host")
    const KIND: &'static str;

    /// Folder holding the `byID` and `byName` indexes of this kind
    const FOLDER: &'static str;

    fn id(&self) -> &str;

    fn name(&self) -> &str;

    /// Encode the record; unknown fields are dropped by older readers
    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a record, ignoring fields this build does not know
    fn from_bytes(buf: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(buf)?)
    }
}

/// Generate a fresh opaque resource id
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Host state as last observed on the hypervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostState {
    Started,
    Stopped,
    Stopping,
    Error,
}

impl Default for HostState {
    fn default() -> Self {
        Self::Error
    }
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started => write!(f, "started"),
            Self::Stopped => write!(f, "stopped"),
            Self::Stopping => write!(f, "stopping"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// IP version of a network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum IpVersion {
    #[default]
    IPv4,
    IPv6,
}

/// A compute host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub private_key: String,
    #[serde(default)]
    pub last_state: HostState,
    #[serde(default)]
    pub properties: Properties<HostDomain>,
}

impl Host {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            private_key: String::new(),
            last_state: HostState::default(),
            properties: Properties::new(),
        }
    }
}

impl Record for Host {
    const KIND: &'static str = "host";
    const FOLDER: &'static str = "hosts";

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A private network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    pub name: String,
    pub cidr: String,
    #[serde(default)]
    pub ip_version: IpVersion,
    /// Id of the host acting as gateway, empty when there is none
    #[serde(default)]
    pub gateway_id: String,
    #[serde(default)]
    pub properties: Properties<NetworkDomain>,
}

impl Network {
    pub fn new(name: impl Into<String>, cidr: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            cidr: cidr.into(),
            ip_version: IpVersion::default(),
            gateway_id: String::new(),
            properties: Properties::new(),
        }
    }

    pub fn has_gateway(&self) -> bool {
        !self.gateway_id.is_empty()
    }
}

impl Record for Network {
    const KIND: &'static str = "network";
    const FOLDER: &'static str = "networks";

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Speed class of a block volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VolumeSpeed {
    Cold,
    #[default]
    Hdd,
    Ssd,
}

/// A block volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub id: String,
    pub name: String,
    /// GB
    pub size: u32,
    #[serde(default)]
    pub speed: VolumeSpeed,
    #[serde(default)]
    pub properties: Properties<VolumeDomain>,
}

impl Volume {
    pub fn new(name: impl Into<String>, size: u32) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            size,
            speed: VolumeSpeed::default(),
            properties: Properties::new(),
        }
    }
}

impl Record for Volume {
    const KIND: &'static str = "volume";
    const FOLDER: &'static str = "volumes";

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::props::{HostVolumesV1, NetworkHostsV1};

    #[test]
    fn test_record_roundtrip_keeps_properties() {
        let mut host = Host::new("web-1");
        host.properties
            .update::<HostVolumesV1, _, _>(|v| v.insert("vol", "data", "att", "/dev/vdb"))
            .unwrap();

        let decoded = Host::from_bytes(&host.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, host);
        let volumes: HostVolumesV1 = decoded.properties.get().unwrap();
        assert_eq!(volumes.devices_by_id.get("vol").unwrap(), "/dev/vdb");
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let json = br#"{"id":"n1","name":"net1","cidr":"10.0.0.0/24","zone":"eu-west","properties":{}}"#;
        let network = Network::from_bytes(json).unwrap();
        assert_eq!(network.name, "net1");
        assert!(!network.has_gateway());
        let hosts: NetworkHostsV1 = network.properties.get().unwrap();
        assert!(hosts.by_id.is_empty());
    }

    #[test]
    fn test_new_ids_are_unique() {
        let a = Volume::new("a", 10);
        let b = Volume::new("a", 10);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_host_state_display() {
        assert_eq!(HostState::Started.to_string(), "started");
        assert_eq!(HostState::default(), HostState::Error);
    }
}
