//! Hypervisor driver interface
//!
//! The hypervisor is the source of truth for resource state. Every lookup
//! taking a `reference` accepts either the resource id or its name.

use localdriver_core::{
    Error, GatewayRequest, Host, HostRequest, HostState, HostTemplate, Image, KeyPair, Network,
    NetworkRequest, Result, Volume, VolumeAttachmentRequest, VolumeRequest,
};

/// Operations a hypervisor driver provides
#[async_trait::async_trait]
pub trait Hypervisor: Send + Sync {
    // ===== Catalog =====

    async fn list_images(&self) -> Result<Vec<Image>>;

    async fn get_image(&self, reference: &str) -> Result<Image>;

    async fn list_templates(&self) -> Result<Vec<HostTemplate>>;

    async fn get_template(&self, reference: &str) -> Result<HostTemplate>;

    // ===== Key pairs =====

    /// Generate a new SSH key pair; nothing is stored driver-side
    async fn create_key_pair(&self, name: &str) -> Result<KeyPair>;

    async fn get_key_pair(&self, id: &str) -> Result<KeyPair> {
        Err(Error::Unsupported(format!("get_key_pair({})", id)))
    }

    async fn list_key_pairs(&self) -> Result<Vec<KeyPair>> {
        Err(Error::Unsupported("list_key_pairs".to_string()))
    }

    async fn delete_key_pair(&self, id: &str) -> Result<()> {
        Err(Error::Unsupported(format!("delete_key_pair({})", id)))
    }

    // ===== Hosts =====

    async fn create_host(&self, request: HostRequest) -> Result<Host>;

    /// Fetch a host with its state refreshed
    async fn get_host(&self, reference: &str) -> Result<Host>;

    async fn list_hosts(&self) -> Result<Vec<Host>>;

    async fn delete_host(&self, reference: &str) -> Result<()>;

    async fn start_host(&self, reference: &str) -> Result<()>;

    async fn stop_host(&self, reference: &str) -> Result<()>;

    async fn reboot_host(&self, reference: &str) -> Result<()>;

    async fn get_host_state(&self, reference: &str) -> Result<HostState> {
        Ok(self.get_host(reference).await?.last_state)
    }

    // ===== Networks =====

    async fn create_network(&self, request: NetworkRequest) -> Result<Network>;

    async fn get_network(&self, reference: &str) -> Result<Network>;

    async fn list_networks(&self) -> Result<Vec<Network>>;

    async fn delete_network(&self, reference: &str) -> Result<()>;

    /// Create the host acting as gateway of a network
    async fn create_gateway(&self, request: GatewayRequest) -> Result<Host>;

    // ===== Volumes =====

    async fn create_volume(&self, request: VolumeRequest) -> Result<Volume>;

    async fn get_volume(&self, reference: &str) -> Result<Volume>;

    async fn list_volumes(&self) -> Result<Vec<Volume>>;

    async fn delete_volume(&self, reference: &str) -> Result<()>;

    /// Attach a volume to a host, returning the attachment id
    ///
    /// The device name seen by the guest is not reported; callers infer it.
    async fn create_volume_attachment(&self, request: VolumeAttachmentRequest) -> Result<String>;

    async fn delete_volume_attachment(&self, host_id: &str, attachment_id: &str) -> Result<()>;
}
