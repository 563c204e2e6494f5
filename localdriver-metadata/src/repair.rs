//! Repair of cross references between metadata records
//!
//! Only records are compared with each other; the hypervisor is never
//! consulted. Host records are authoritative for volume attachments since
//! they hold the device and mount.

use crate::host;
use crate::item::update;
use crate::network;
use crate::volume;
use crate::MetadataContext;
use localdriver_core::props::{HostVolumesV1, NetworkHostsV1, VolumeAttachedV1};
use localdriver_core::{Host, Network, Result, Volume};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

/// What a repair pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Network memberships of hosts without metadata
    pub pruned_network_hosts: usize,
    /// Gateway pointers to hosts without metadata
    pub cleared_gateways: usize,
    /// Volume edges with no matching host attachment
    pub removed_volume_edges: usize,
    /// Host attachments missing on the volume side
    pub added_volume_edges: usize,
    /// Problems seen but left alone
    pub notes: Vec<String>,
}

impl RepairReport {
    /// Whether nothing had to be changed
    pub fn is_clean(&self) -> bool {
        self.pruned_network_hosts == 0
            && self.cleared_gateways == 0
            && self.removed_volume_edges == 0
            && self.added_volume_edges == 0
    }
}

/// Bring network and volume cross references in line with host records
///
/// Every change is a locked read-modify-write of one record, so a second
/// pass right after the first changes nothing. Records are listed once at
/// the start; run it while no attach or detach is in flight.
pub async fn reconcile(ctx: &MetadataContext) -> Result<RepairReport> {
    let mut report = RepairReport::default();

    let hosts: BTreeMap<String, Host> = host::list_hosts(ctx)
        .await?
        .into_iter()
        .map(|h| (h.id.clone(), h))
        .collect();

    for network in network::list_networks(ctx).await? {
        repair_network(ctx, &network, &hosts, &mut report).await?;
    }

    let volumes: BTreeMap<String, Volume> = volume::list_volumes(ctx)
        .await?
        .into_iter()
        .map(|v| (v.id.clone(), v))
        .collect();

    // volume id -> host id -> host name, as the hosts see it
    let mut expected: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    for host in hosts.values() {
        let attached: HostVolumesV1 = host.properties.get()?;
        for volume_id in attached.volumes_by_id.keys() {
            if volumes.contains_key(volume_id) {
                expected
                    .entry(volume_id.clone())
                    .or_default()
                    .insert(host.id.clone(), host.name.clone());
            } else {
                warn!(host = %host.name, volume = %volume_id, "Host references unknown volume");
                report.notes.push(format!(
                    "host '{}' references volume '{}' which has no metadata",
                    host.name, volume_id
                ));
            }
        }
    }

    for volume in volumes.values() {
        let wanted = expected.remove(&volume.id).unwrap_or_default();
        repair_volume(ctx, volume, &wanted, &mut report).await?;
    }

    if report.is_clean() {
        info!("Metadata cross references are consistent");
    } else {
        info!(
            pruned_network_hosts = report.pruned_network_hosts,
            cleared_gateways = report.cleared_gateways,
            removed_volume_edges = report.removed_volume_edges,
            added_volume_edges = report.added_volume_edges,
            "Repaired metadata cross references"
        );
    }
    Ok(report)
}

async fn repair_network(
    ctx: &MetadataContext,
    network: &Network,
    hosts: &BTreeMap<String, Host>,
    report: &mut RepairReport,
) -> Result<()> {
    let members: NetworkHostsV1 = network.properties.get()?;
    let dangling_member = members.by_id.keys().any(|id| !hosts.contains_key(id));
    let dangling_gateway = network.has_gateway() && !hosts.contains_key(&network.gateway_id);
    if !dangling_member && !dangling_gateway {
        return Ok(());
    }

    let (pruned, cleared) = update::<Network, _, _>(ctx, &network.id, |n| {
        let pruned = n.properties.update::<NetworkHostsV1, _, _>(|m| {
            let gone: Vec<String> = m
                .by_id
                .keys()
                .filter(|id| !hosts.contains_key(*id))
                .cloned()
                .collect();
            for id in &gone {
                if let Some(name) = m.by_id.remove(id) {
                    m.by_name.remove(&name);
                }
            }
            gone.len()
        })?;
        let cleared = n.has_gateway() && !hosts.contains_key(&n.gateway_id);
        if cleared {
            n.gateway_id.clear();
        }
        Ok((pruned, cleared))
    })
    .await?;

    if pruned > 0 {
        warn!(network = %network.name, pruned, "Pruned hosts without metadata from network");
    }
    if cleared {
        warn!(network = %network.name, "Cleared gateway without metadata");
        report.cleared_gateways += 1;
    }
    report.pruned_network_hosts += pruned;
    Ok(())
}

async fn repair_volume(
    ctx: &MetadataContext,
    volume: &Volume,
    wanted: &BTreeMap<String, String>,
    report: &mut RepairReport,
) -> Result<()> {
    let attached: VolumeAttachedV1 = volume.properties.get()?;
    let current: BTreeSet<&String> = attached.hosts.keys().collect();
    let target: BTreeSet<&String> = wanted.keys().collect();
    if current == target {
        return Ok(());
    }

    let (added, removed) = update::<Volume, _, _>(ctx, &volume.id, |v| {
        v.properties.update::<VolumeAttachedV1, _, _>(|a| {
            let before = a.hosts.len();
            a.hosts.retain(|id, _| wanted.contains_key(id));
            let removed = before - a.hosts.len();
            let mut added = 0;
            for (id, name) in wanted {
                if a.hosts.insert(id.clone(), name.clone()).is_none() {
                    added += 1;
                }
            }
            (added, removed)
        })
    })
    .await?;

    warn!(volume = %volume.name, added, removed, "Repaired volume attachments");
    report.added_volume_edges += added;
    report.removed_volume_edges += removed;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::save_host;
    use crate::network::{load_network, save_network};
    use crate::test_context;
    use crate::volume::{load_volume, save_volume};

    #[tokio::test]
    async fn test_clean_inventory() {
        let ctx = test_context().await;
        save_host(&ctx, &Host::new("h1")).await.unwrap();
        save_network(&ctx, &Network::new("n1", "10.0.0.0/24")).await.unwrap();

        let report = reconcile(&ctx).await.unwrap();
        assert!(report.is_clean());
        assert!(report.notes.is_empty());
    }

    #[tokio::test]
    async fn test_network_references_pruned() {
        let ctx = test_context().await;
        let alive = Host::new("alive");
        save_host(&ctx, &alive).await.unwrap();

        let mut item = network::NetworkMetadata::new(&ctx);
        let mut net = Network::new("n1", "10.0.0.0/24");
        net.gateway_id = "gone-gw".to_string();
        item.carry(net);
        item.attach_host(&alive).unwrap();
        item.attach_host(&Host::new("ghost")).unwrap();
        item.write().await.unwrap();

        let report = reconcile(&ctx).await.unwrap();
        assert_eq!(report.pruned_network_hosts, 1);
        assert_eq!(report.cleared_gateways, 1);

        let stored = load_network(&ctx, "n1").await.unwrap().unwrap();
        let members: NetworkHostsV1 = stored.get().unwrap().properties.get().unwrap();
        assert_eq!(members.by_name.keys().collect::<Vec<_>>(), vec!["alive"]);
        assert!(!stored.get().unwrap().has_gateway());

        assert!(reconcile(&ctx).await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn test_volume_edges_follow_hosts() {
        let ctx = test_context().await;
        let data = Volume::new("data", 10);
        let mut logs = Volume::new("logs", 5);
        let mut host = Host::new("h1");
        host.properties
            .update::<HostVolumesV1, _, _>(|v| {
                v.insert(&data.id, "data", "a1", "/dev/vdb");
                v.insert("vanished", "old", "a2", "/dev/vdc");
            })
            .unwrap();
        // Edge without host-side attachment
        logs.properties
            .update::<VolumeAttachedV1, _, _>(|a| {
                a.hosts.insert(host.id.clone(), host.name.clone());
            })
            .unwrap();
        save_host(&ctx, &host).await.unwrap();
        save_volume(&ctx, &data).await.unwrap();
        save_volume(&ctx, &logs).await.unwrap();

        let report = reconcile(&ctx).await.unwrap();
        assert_eq!(report.added_volume_edges, 1);
        assert_eq!(report.removed_volume_edges, 1);
        assert_eq!(report.notes.len(), 1);

        let stored = load_volume(&ctx, "data").await.unwrap().unwrap();
        let attached: VolumeAttachedV1 = stored.get().unwrap().properties.get().unwrap();
        assert_eq!(attached.hosts.get(&host.id).unwrap(), "h1");
        let stored = load_volume(&ctx, "logs").await.unwrap().unwrap();
        let attached: VolumeAttachedV1 = stored.get().unwrap().properties.get().unwrap();
        assert!(attached.hosts.is_empty());

        let again = reconcile(&ctx).await.unwrap();
        assert!(again.is_clean());
        assert_eq!(again.notes.len(), 1);
    }
}
