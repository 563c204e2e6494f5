//! Driver configuration
//!
//! Settings of the hypervisor connection, the image/template catalogs and
//! remote command execution. Every field has a default so a partial TOML
//! section is accepted.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Hypervisor driver settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// libvirt connection URI
    #[serde(default = "default_uri")]
    pub uri: String,

    /// Storage pool holding host disks and volumes
    #[serde(default = "default_storage_pool")]
    pub storage_pool: String,

    /// Directory backing the storage pool
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,

    /// JSON catalog of OS images
    #[serde(default = "default_images_catalog")]
    pub images_catalog: PathBuf,

    /// JSON catalog of host templates
    #[serde(default = "default_templates_catalog")]
    pub templates_catalog: PathBuf,

    /// Host interface bridged for public addresses
    #[serde(default = "default_public_interface")]
    pub public_interface: String,

    /// Upper bound of any driver or remote command, in seconds
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Remote user for SSH sessions
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,

    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            storage_pool: default_storage_pool(),
            storage_path: default_storage_path(),
            images_catalog: default_images_catalog(),
            templates_catalog: default_templates_catalog(),
            public_interface: default_public_interface(),
            command_timeout_secs: default_command_timeout_secs(),
            ssh_user: default_ssh_user(),
            ssh_port: default_ssh_port(),
        }
    }
}

impl ProviderConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

fn default_uri() -> String {
    std::env::var("LOCALDRIVER_LIBVIRT_URI").unwrap_or_else(|_| "qemu:///system".to_string())
}

fn default_storage_pool() -> String {
    std::env::var("LOCALDRIVER_STORAGE_POOL").unwrap_or_else(|_| "default".to_string())
}

fn default_storage_path() -> PathBuf {
    std::env::var("LOCALDRIVER_STORAGE_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/lib/libvirt/images"))
}

fn default_images_catalog() -> PathBuf {
    std::env::var("LOCALDRIVER_IMAGES_CATALOG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/etc/localdriver/images.json"))
}

fn default_templates_catalog() -> PathBuf {
    std::env::var("LOCALDRIVER_TEMPLATES_CATALOG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/etc/localdriver/templates.json"))
}

fn default_public_interface() -> String {
    std::env::var("LOCALDRIVER_PUBLIC_INTERFACE").unwrap_or_else(|_| "enp2s0".to_string())
}

fn default_command_timeout_secs() -> u64 {
    300
}

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_section_uses_defaults() {
        let config: ProviderConfig = serde_json::from_str(r#"{"storage_pool":"vms"}"#).unwrap();
        assert_eq!(config.storage_pool, "vms");
        assert_eq!(config.ssh_port, 22);
        assert_eq!(config.command_timeout(), Duration::from_secs(300));
    }
}
