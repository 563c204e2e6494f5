//! Network metadata and its host membership

use crate::host;
use crate::item::{self, MetadataItem};
use crate::MetadataContext;
use localdriver_core::props::NetworkHostsV1;
use localdriver_core::{Error, Host, Network, Result};
use tracing::debug;

/// Handle on the stored record of a network
pub type NetworkMetadata = MetadataItem<Network>;

impl MetadataItem<Network> {
    fn carried(&mut self) -> Result<&mut Network> {
        self.get_mut().ok_or(Error::NothingCarried)
    }

    /// Add `host` to the members of the carried network
    ///
    /// Only the carried copy changes. Nothing reaches the store until
    /// [`MetadataItem::write`] is called, so a crash in between loses the
    /// membership. Use [`MetadataItem::link_host`] to mutate and persist in
    /// one call.
    pub fn attach_host(&mut self, host: &Host) -> Result<()> {
        let (id, name) = (host.id.clone(), host.name.clone());
        self.carried()?
            .properties
            .update::<NetworkHostsV1, _, _>(|hosts| {
                hosts.by_id.insert(id.clone(), name.clone());
                hosts.by_name.insert(name, id);
            })
    }

    /// Remove a host from the members of the carried network
    ///
    /// Unknown hosts are ignored. As with [`MetadataItem::attach_host`], the
    /// change is not persisted until [`MetadataItem::write`].
    pub fn detach_host(&mut self, host_id: &str) -> Result<()> {
        self.carried()?
            .properties
            .update::<NetworkHostsV1, _, _>(|hosts| {
                if let Some(name) = hosts.by_id.remove(host_id) {
                    hosts.by_name.remove(&name);
                }
            })
    }

    /// Load every member host
    ///
    /// A member whose record is gone is reported as an inconsistency.
    pub async fn list_hosts(&self) -> Result<Vec<Host>> {
        let network = self.get().ok_or(Error::NothingCarried)?;
        let members: NetworkHostsV1 = network.properties.get()?;

        let mut hosts = Vec::with_capacity(members.by_id.len());
        for (id, name) in &members.by_id {
            let item = host::load_host_by_id(self.context(), id).await?.ok_or_else(|| {
                Error::Inconsistency(format!(
                    "network '{}' lists host '{}' ({}) which has no metadata",
                    network.name, name, id
                ))
            })?;
            hosts.extend(item.into_inner());
        }
        Ok(hosts)
    }

    /// Attach a host and persist under the network lock
    pub async fn link_host(&mut self, host: &Host) -> Result<()> {
        let _lock = self.acquire().await?;
        self.reload().await?;
        self.attach_host(host)?;
        self.write().await?;
        debug!(network = %self.id(), host = %host.id, "Linked host to network");
        Ok(())
    }

    /// Detach a host and persist under the network lock
    pub async fn unlink_host(&mut self, host_id: &str) -> Result<()> {
        let _lock = self.acquire().await?;
        self.reload().await?;
        self.detach_host(host_id)?;
        self.write().await?;
        debug!(network = %self.id(), host = %host_id, "Unlinked host from network");
        Ok(())
    }
}

pub async fn save_network(ctx: &MetadataContext, network: &Network) -> Result<()> {
    item::save(ctx, network).await
}

pub async fn remove_network(ctx: &MetadataContext, network: &Network) -> Result<()> {
    item::remove(ctx, network).await
}

pub async fn load_network_by_id(ctx: &MetadataContext, id: &str) -> Result<Option<NetworkMetadata>> {
    item::load_by_id(ctx, id).await
}

pub async fn load_network_by_name(
    ctx: &MetadataContext,
    name: &str,
) -> Result<Option<NetworkMetadata>> {
    item::load_by_name(ctx, name).await
}

/// Load a network by id, then by name
pub async fn load_network(ctx: &MetadataContext, reference: &str) -> Result<Option<NetworkMetadata>> {
    item::load(ctx, reference).await
}

pub async fn list_networks(ctx: &MetadataContext) -> Result<Vec<Network>> {
    NetworkMetadata::new(ctx).list().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::save_host;
    use crate::test_context;

    async fn stored_members(ctx: &MetadataContext, id: &str) -> NetworkHostsV1 {
        let item = load_network_by_id(ctx, id).await.unwrap().unwrap();
        item.get().unwrap().properties.get().unwrap()
    }

    #[tokio::test]
    async fn test_attach_host_needs_write() {
        let ctx = test_context().await;
        let network = Network::new("net1", "10.0.0.0/24");
        save_network(&ctx, &network).await.unwrap();
        let host = Host::new("host1");
        save_host(&ctx, &host).await.unwrap();

        let mut item = load_network(&ctx, "net1").await.unwrap().unwrap();
        item.attach_host(&host).unwrap();
        assert!(stored_members(&ctx, &network.id).await.by_id.is_empty());

        item.write().await.unwrap();
        let members = stored_members(&ctx, &network.id).await;
        assert_eq!(members.by_id.get(&host.id).unwrap(), "host1");
        assert_eq!(members.by_name.get("host1").unwrap(), &host.id);

        let hosts = item.list_hosts().await.unwrap();
        assert_eq!(hosts, vec![host]);
    }

    #[tokio::test]
    async fn test_detach_unknown_host_is_noop() {
        let ctx = test_context().await;
        let mut item = NetworkMetadata::new(&ctx);
        item.carry(Network::new("net1", "10.0.0.0/24"));
        item.detach_host("ghost").unwrap();
        let members: NetworkHostsV1 = item.get().unwrap().properties.get().unwrap();
        assert!(members.by_id.is_empty());
    }

    #[tokio::test]
    async fn test_list_hosts_reports_missing_host() {
        let ctx = test_context().await;
        let host = Host::new("gone");
        let mut item = NetworkMetadata::new(&ctx);
        item.carry(Network::new("net1", "10.0.0.0/24"));
        item.attach_host(&host).unwrap();
        item.write().await.unwrap();

        let err = item.list_hosts().await.unwrap_err();
        assert!(matches!(err, Error::Inconsistency(_)));
    }

    #[tokio::test]
    async fn test_link_and_unlink_persist() {
        let ctx = test_context().await;
        let network = Network::new("net1", "10.0.0.0/24");
        save_network(&ctx, &network).await.unwrap();
        let host = Host::new("host1");

        let mut item = load_network(&ctx, &network.id).await.unwrap().unwrap();
        item.link_host(&host).await.unwrap();
        assert!(stored_members(&ctx, &network.id).await.by_id.contains_key(&host.id));

        item.unlink_host(&host.id).await.unwrap();
        let members = stored_members(&ctx, &network.id).await;
        assert!(members.by_id.is_empty());
        assert!(members.by_name.is_empty());
    }

    #[tokio::test]
    async fn test_link_keeps_concurrent_membership() {
        let ctx = test_context().await;
        let network = Network::new("net1", "10.0.0.0/24");
        save_network(&ctx, &network).await.unwrap();

        // Two handles loaded before either links
        let mut first = load_network(&ctx, "net1").await.unwrap().unwrap();
        let mut second = load_network(&ctx, "net1").await.unwrap().unwrap();
        first.link_host(&Host::new("a")).await.unwrap();
        second.link_host(&Host::new("b")).await.unwrap();

        let members = stored_members(&ctx, &network.id).await;
        assert_eq!(members.by_name.len(), 2);
        assert_eq!(list_networks(&ctx).await.unwrap().len(), 1);

        remove_network(&ctx, &network).await.unwrap();
        assert!(load_network_by_name(&ctx, "net1").await.unwrap().is_none());
    }
}
