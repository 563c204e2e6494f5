//! Handles shared by every command

use crate::config::LocalDriverConfig;
use anyhow::{bail, Context, Result};
use localdriver_core::props::HostNetworkV1;
use localdriver_core::Host;
use localdriver_metadata::host::{load_host, load_host_by_id};
use localdriver_metadata::MetadataContext;
use localdriver_provider::{Hypervisor, SshExecutor, SshTarget, VirshHypervisor};
use std::sync::Arc;
use tracing::debug;

/// Hypervisor driver plus the metadata it is mirrored into
pub struct App {
    pub config: LocalDriverConfig,
    pub hypervisor: Arc<dyn Hypervisor>,
    pub metadata: MetadataContext,
}

impl App {
    pub fn new(
        config: LocalDriverConfig,
        hypervisor: Arc<dyn Hypervisor>,
        metadata: MetadataContext,
    ) -> Self {
        Self {
            config,
            hypervisor,
            metadata,
        }
    }

    /// Open the metadata store and connect the virsh driver
    pub async fn open(config: LocalDriverConfig) -> Result<Self> {
        let store = config
            .store
            .store_config()
            .open()
            .context("Failed to open metadata store")?;
        let metadata = MetadataContext::open(store, &config.metadata)
            .await
            .context("Failed to initialize metadata bucket")?;
        let hypervisor = VirshHypervisor::new(config.provider.clone())
            .context("Failed to initialize hypervisor driver")?;
        debug!(bucket = %metadata.bucket(), uri = %config.provider.uri, "Opened application context");
        Ok(Self::new(config, Arc::new(hypervisor), metadata))
    }

    pub fn hypervisor(&self) -> &dyn Hypervisor {
        self.hypervisor.as_ref()
    }

    /// Host record from metadata, by id or name
    pub async fn require_host(&self, reference: &str) -> Result<Host> {
        match load_host(&self.metadata, reference).await? {
            Some(item) => item
                .into_inner()
                .with_context(|| format!("Host '{}' has no record", reference)),
            None => bail!("Host '{}' not found", reference),
        }
    }

    /// SSH access to a host, jumping through its gateway when it has one
    pub async fn ssh_target(&self, reference: &str) -> Result<SshTarget> {
        let host = self.require_host(reference).await?;
        let user = &self.config.provider.ssh_user;
        let port = self.config.provider.ssh_port;
        let target = SshTarget::for_host(&host, user, port)
            .with_context(|| format!("Cannot reach host '{}'", host.name))?;

        let network: HostNetworkV1 = host.properties.get()?;
        if network.default_gateway_id.is_empty() || network.is_gateway {
            return Ok(target);
        }
        let gateway = load_host_by_id(&self.metadata, &network.default_gateway_id)
            .await?
            .and_then(|item| item.into_inner())
            .with_context(|| {
                format!(
                    "Gateway '{}' of host '{}' not found",
                    network.default_gateway_id, host.name
                )
            })?;
        let gateway = SshTarget::for_host(&gateway, user, port)
            .with_context(|| format!("Cannot reach gateway '{}'", gateway.name))?;
        Ok(target.with_gateway(gateway))
    }

    pub async fn executor(&self, reference: &str) -> Result<SshExecutor> {
        let target = self.ssh_target(reference).await?;
        Ok(SshExecutor::new(target, self.config.provider.command_timeout()))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use localdriver_provider::InMemoryHypervisor;
    use localdriver_storage::StoreConfig;

    /// Application over a memory store and the in-memory hypervisor
    pub async fn memory_app() -> (App, Arc<InMemoryHypervisor>) {
        let mut config = LocalDriverConfig::default();
        config.metadata.tenant_id = "cli".to_string();
        config.metadata.lock_timeout_secs = 2;

        let store = StoreConfig::Memory.open().unwrap();
        let metadata = MetadataContext::open(store, &config.metadata).await.unwrap();
        let hypervisor = Arc::new(InMemoryHypervisor::new());
        let app = App::new(config, hypervisor.clone(), metadata);
        (app, hypervisor)
    }
}
