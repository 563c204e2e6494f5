//! LocalDriver Core Library
//!
//! Core abstractions shared by every LocalDriver crate:
//! - Resource records (hosts, networks, volumes) and the `Record` contract
//! - Versioned property bags embedded in each record
//! - Requests and catalog entries exchanged with the hypervisor driver
//! - Common error handling

pub mod error;
pub mod model;
pub mod property;
pub mod props;
pub mod request;

pub use error::{Error, Result};
pub use model::{new_id, Host, HostState, IpVersion, Network, Record, Volume, VolumeSpeed};
pub use property::{Domain, HostDomain, NetworkDomain, Properties, Property, VolumeDomain};
pub use request::{
    GatewayRequest, HostRequest, HostTemplate, Image, KeyPair, NetworkRequest,
    SizingRequirements, VolumeAttachmentRequest, VolumeRequest,
};

/// Mount point used when none is given
pub const DEFAULT_VOLUME_MOUNT_POINT: &str = "/shared/data";

/// Filesystem used when none is given
pub const DEFAULT_FILESYSTEM: &str = "ext4";

/// CIDR of networks created without an explicit one
pub const DEFAULT_CIDR: &str = "192.168.0.0/24";
