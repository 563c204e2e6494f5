//! Gateway metadata
//!
//! A gateway is an ordinary host record referenced by the `gateway_id` of its
//! network. Writes store the host before the pointer and deletes clear the
//! pointer before the host, so an interrupted call never leaves the network
//! pointing at a missing record.

use crate::host::{self, HostMetadata};
use crate::network::{self, NetworkMetadata};
use crate::MetadataContext;
use localdriver_core::{Error, Host, Result};
use tracing::{debug, info};

/// Gateway host of one network
pub struct GatewayMetadata {
    ctx: MetadataContext,
    network: NetworkMetadata,
    host: Option<HostMetadata>,
}

impl GatewayMetadata {
    /// Bind to the network with id `network_id`, which must have metadata
    pub async fn new(ctx: &MetadataContext, network_id: &str) -> Result<Self> {
        let network = network::load_network_by_id(ctx, network_id)
            .await?
            .ok_or_else(|| Error::NetworkMetadataMissing(network_id.to_string()))?;
        Ok(Self::with_network(ctx, network))
    }

    fn with_network(ctx: &MetadataContext, network: NetworkMetadata) -> Self {
        Self {
            ctx: ctx.clone(),
            network,
            host: None,
        }
    }

    pub fn carry(&mut self, host: Host) -> &mut Self {
        let mut item = HostMetadata::new(&self.ctx);
        item.carry(host);
        self.host = Some(item);
        self
    }

    pub fn get(&self) -> Option<&Host> {
        self.host.as_ref().and_then(|item| item.get())
    }

    pub fn network(&self) -> &NetworkMetadata {
        &self.network
    }

    /// Load the current gateway of the network
    ///
    /// Returns `Ok(false)` when the network has no gateway or when the
    /// referenced host has no metadata.
    pub async fn read(&mut self) -> Result<bool> {
        self.network.reload().await?;
        self.host = None;

        let gateway_id = match self.network.get() {
            Some(network) if network.has_gateway() => network.gateway_id.clone(),
            _ => return Ok(false),
        };
        match host::load_host_by_id(&self.ctx, &gateway_id).await? {
            Some(item) => {
                self.host = Some(item);
                Ok(true)
            }
            None => {
                debug!(network = %self.network.id(), gateway = %gateway_id, "Gateway host has no metadata");
                Ok(false)
            }
        }
    }

    pub async fn reload(&mut self) -> Result<()> {
        if !self.read().await? {
            return Err(Error::MetadataVanished {
                kind: "gateway",
                key: self.network.id().to_string(),
            });
        }
        Ok(())
    }

    /// Store the gateway host, then point the network at it
    pub async fn write(&mut self) -> Result<()> {
        let host = self.host.as_mut().ok_or(Error::NothingCarried)?;
        host.write().await?;
        let host_id = host.id().to_string();

        let _lock = self.network.acquire().await?;
        self.network.reload().await?;
        let network = self.network.get_mut().ok_or(Error::NothingCarried)?;
        network.gateway_id = host_id.clone();
        self.network.write().await?;

        info!(network = %self.network.id(), gateway = %host_id, "Recorded gateway");
        Ok(())
    }

    /// Clear the network pointer, then delete the gateway host record
    pub async fn delete(&mut self) -> Result<()> {
        if self.host.is_none() {
            self.read().await?;
        }

        {
            let _lock = self.network.acquire().await?;
            self.network.reload().await?;
            let network = self.network.get_mut().ok_or(Error::NothingCarried)?;
            if network.has_gateway() {
                network.gateway_id.clear();
                self.network.write().await?;
            }
        }

        if let Some(host) = self.host.take() {
            host.delete().await?;
            info!(network = %self.network.id(), gateway = %host.id(), "Removed gateway");
        }
        Ok(())
    }

    /// Take the advisory lock of the gateway host record
    pub async fn acquire(&self) -> Result<crate::ItemLock> {
        self.host.as_ref().ok_or(Error::NothingCarried)?.acquire().await
    }
}

/// Load the gateway of a network given by id or name
///
/// An unknown network is an error; a network without gateway is `Ok(None)`.
pub async fn load_gateway(ctx: &MetadataContext, network_ref: &str) -> Result<Option<GatewayMetadata>> {
    let network = network::load_network(ctx, network_ref)
        .await?
        .ok_or_else(|| Error::NetworkMetadataMissing(network_ref.to_string()))?;
    let mut gateway = GatewayMetadata::with_network(ctx, network);
    Ok(gateway.read().await?.then_some(gateway))
}

/// Store `host` as the gateway of a network
pub async fn save_gateway(ctx: &MetadataContext, host: &Host, network_id: &str) -> Result<()> {
    let mut gateway = GatewayMetadata::new(ctx, network_id).await?;
    gateway.carry(host.clone());
    gateway.write().await
}

/// Forget the gateway of a network, if any
pub async fn remove_gateway(ctx: &MetadataContext, network_id: &str) -> Result<()> {
    let mut gateway = GatewayMetadata::new(ctx, network_id).await?;
    gateway.delete().await
}
