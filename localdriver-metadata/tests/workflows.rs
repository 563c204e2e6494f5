//! Gateway, membership and attachment workflows against the in-memory
//! hypervisor

use localdriver_core::props::{HostMountsV1, HostVolumesV1, NetworkHostsV1, VolumeAttachedV1};
use localdriver_core::{
    Error, GatewayRequest, Host, HostRequest, Network, NetworkRequest, Volume, VolumeRequest,
    VolumeSpeed,
};
use localdriver_metadata::host::{load_host, save_host};
use localdriver_metadata::network::{load_network, save_network};
use localdriver_metadata::volume::{load_volume, save_volume};
use localdriver_metadata::{
    load_gateway, reconcile, remove_gateway, save_gateway, MetadataConfig, MetadataContext,
    MountSpec, VolumeAttacher,
};
use localdriver_provider::{CommandOutput, Hypervisor, InMemoryHypervisor};
use localdriver_storage::StoreConfig;
use std::sync::Arc;
use std::time::Duration;

async fn memory_context() -> MetadataContext {
    let store = StoreConfig::Memory.open().unwrap();
    let config = MetadataConfig {
        tenant_id: "workflows".to_string(),
        lock_timeout_secs: 2,
    };
    MetadataContext::open(store, &config).await.unwrap()
}

fn mount_at(path: &str) -> MountSpec {
    MountSpec {
        path: path.to_string(),
        ..MountSpec::default()
    }
}

/// Hypervisor with one public host and one volume, both recorded
async fn host_and_volume(ctx: &MetadataContext) -> (Arc<InMemoryHypervisor>, Host, Volume) {
    let hv = Arc::new(InMemoryHypervisor::new());
    let host = hv
        .create_host(HostRequest {
            name: "host1".to_string(),
            public_ip: true,
            networks: vec![],
            default_gateway_id: None,
            template_id: "tpl-small".to_string(),
            image_id: "ubuntu-18.04".to_string(),
            key_pair: None,
        })
        .await
        .unwrap();
    let volume = hv
        .create_volume(VolumeRequest {
            name: "vol1".to_string(),
            size: 10,
            speed: VolumeSpeed::Hdd,
        })
        .await
        .unwrap();
    save_host(ctx, &host).await.unwrap();
    save_volume(ctx, &volume).await.unwrap();
    (hv, host, volume)
}

async fn stored_host(ctx: &MetadataContext, reference: &str) -> Host {
    load_host(ctx, reference)
        .await
        .unwrap()
        .unwrap()
        .into_inner()
        .unwrap()
}

async fn stored_volume(ctx: &MetadataContext, reference: &str) -> Volume {
    load_volume(ctx, reference)
        .await
        .unwrap()
        .unwrap()
        .into_inner()
        .unwrap()
}

#[tokio::test]
async fn test_gateway_create_load_delete() {
    let ctx = memory_context().await;
    let hv = InMemoryHypervisor::new();
    let network = hv
        .create_network(NetworkRequest {
            name: "net1".to_string(),
            ip_version: Default::default(),
            cidr: "10.0.0.0/24".to_string(),
            dns_servers: vec![],
        })
        .await
        .unwrap();
    save_network(&ctx, &network).await.unwrap();

    let gateway = hv
        .create_gateway(GatewayRequest {
            network: network.clone(),
            template_id: "tpl-small".to_string(),
            image_id: "ubuntu-18.04".to_string(),
            name: String::new(),
            key_pair: None,
        })
        .await
        .unwrap();
    save_gateway(&ctx, &gateway, &network.id).await.unwrap();

    let loaded = load_gateway(&ctx, "net1").await.unwrap().unwrap();
    assert_eq!(loaded.get(), Some(&gateway));
    assert_eq!(loaded.get().unwrap().name, "gw-net1");

    remove_gateway(&ctx, &network.id).await.unwrap();
    assert!(load_gateway(&ctx, "net1").await.unwrap().is_none());
    let network = load_network(&ctx, "net1").await.unwrap().unwrap();
    assert!(network.get().unwrap().gateway_id.is_empty());
}

#[tokio::test]
async fn test_attach_then_detach_keeps_both_sides_in_step() {
    let ctx = memory_context().await;
    let (hv, host, volume) = host_and_volume(&ctx).await;
    let shell = hv.shell(&host.id);
    let attacher = VolumeAttacher::new(&ctx, hv.as_ref(), &shell);

    let info = attacher.attach("vol1", "host1", &mount_at("/data")).await.unwrap();
    assert_eq!(info.device, "/dev/vdb");
    assert_eq!(info.path, "/data");

    let stored = stored_host(&ctx, "host1").await;
    let volumes: HostVolumesV1 = stored.properties.get().unwrap();
    let volume_id = volumes.volumes_by_name.get("vol1").unwrap();
    assert_eq!(volume_id, &volume.id);
    assert_eq!(volumes.devices_by_id.get(volume_id).unwrap(), &info.device);
    assert_eq!(volumes.volumes_by_id.get(volume_id).unwrap().attach_id, info.attach_id);
    let mounts: HostMountsV1 = stored.properties.get().unwrap();
    assert_eq!(mounts.by_device(&info.device).unwrap().path, "/data");

    let attached: VolumeAttachedV1 = stored_volume(&ctx, "vol1").await.properties.get().unwrap();
    assert_eq!(attached.hosts.get(&host.id).unwrap(), "host1");

    assert!(shell
        .history()
        .iter()
        .any(|c| c.contains("mkfs") && c.contains("/dev/vdb") && c.contains("/data")));

    attacher.detach("vol1", "host1").await.unwrap();

    let stored = stored_host(&ctx, "host1").await;
    let volumes: HostVolumesV1 = stored.properties.get().unwrap();
    assert!(volumes.volumes_by_name.is_empty());
    assert!(volumes.devices_by_id.is_empty());
    let mounts: HostMountsV1 = stored.properties.get().unwrap();
    assert!(mounts.local_mounts_by_path.is_empty());
    let attached: VolumeAttachedV1 = stored_volume(&ctx, "vol1").await.properties.get().unwrap();
    assert!(attached.hosts.is_empty());

    assert!(hv.attachments(&host.id).is_empty());
    assert!(shell.history().iter().any(|c| c.contains("umount")));
}

#[tokio::test]
async fn test_two_new_devices_abort_attach() {
    let ctx = memory_context().await;
    let (hv, host, _) = host_and_volume(&ctx).await;
    let shell = hv.shell(&host.id);
    let attacher = VolumeAttacher::new(&ctx, hv.as_ref(), &shell);

    hv.plug_disk_on_next_attachment(&host.id, "vdz");
    match attacher.attach("vol1", "host1", &mount_at("/data")).await {
        Err(Error::AmbiguousAttachment { host, gained }) => {
            assert_eq!(host, "host1");
            assert_eq!(gained, vec!["vdb", "vdz"]);
        }
        other => panic!("unexpected result: {:?}", other),
    }

    assert!(!shell.history().iter().any(|c| c.contains("mount")));
    let volumes: HostVolumesV1 = stored_host(&ctx, "host1").await.properties.get().unwrap();
    assert!(volumes.volumes_by_id.is_empty());
    let attached: VolumeAttachedV1 = stored_volume(&ctx, "vol1").await.properties.get().unwrap();
    assert!(attached.hosts.is_empty());
}

#[tokio::test]
async fn test_no_new_device_aborts_attach() {
    let ctx = memory_context().await;
    let (hv, host, _) = host_and_volume(&ctx).await;
    let shell = hv.shell(&host.id);
    let attacher = VolumeAttacher::new(&ctx, hv.as_ref(), &shell);

    hv.hide_next_attachment(&host.id);
    match attacher.attach("vol1", "host1", &mount_at("/data")).await {
        Err(Error::AmbiguousAttachment { gained, .. }) => assert!(gained.is_empty()),
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(!shell.history().iter().any(|c| c.contains("mount")));
    // The hypervisor attachment itself is not rolled back
    assert_eq!(hv.attachments(&host.id).len(), 1);
}

#[tokio::test]
async fn test_attach_rejections() {
    let ctx = memory_context().await;
    let (hv, host, _) = host_and_volume(&ctx).await;
    let other = hv
        .create_volume(VolumeRequest {
            name: "vol2".to_string(),
            size: 5,
            speed: VolumeSpeed::Ssd,
        })
        .await
        .unwrap();
    save_volume(&ctx, &other).await.unwrap();
    let shell = hv.shell(&host.id);
    let attacher = VolumeAttacher::new(&ctx, hv.as_ref(), &shell);

    assert!(matches!(
        attacher.detach("vol1", "host1").await,
        Err(Error::NotAttached { .. })
    ));
    assert!(attacher
        .attach("missing", "host1", &MountSpec::default())
        .await
        .unwrap_err()
        .is_not_found());

    let info = attacher.attach("vol1", "host1", &mount_at("/data/")).await.unwrap();
    assert_eq!(info.path, "/data");
    assert!(matches!(
        attacher.attach("vol1", "host1", &mount_at("/other")).await,
        Err(Error::AlreadyAttached { .. })
    ));
    match attacher.attach("vol2", "host1", &mount_at("/data")).await {
        Err(Error::MountPathInUse { path, host }) => {
            assert_eq!(path, "/data");
            assert_eq!(host, "host1");
        }
        other => panic!("unexpected result: {:?}", other),
    }
    match attacher.attach("vol2", "host1", &mount_at("/data//")).await {
        Err(Error::MountPathInUse { path, .. }) => assert_eq!(path, "/data"),
        other => panic!("unexpected result: {:?}", other),
    }
    // Rejections happen before the hypervisor is asked
    assert_eq!(hv.attachments(&host.id).len(), 1);
}

#[tokio::test]
async fn test_mount_failure_records_nothing() {
    let ctx = memory_context().await;
    let (hv, host, _) = host_and_volume(&ctx).await;
    let shell = hv.shell(&host.id);
    shell.fail_next("mkfs", CommandOutput::failed(1, "mkfs: device busy\n"));
    let attacher = VolumeAttacher::new(&ctx, hv.as_ref(), &shell);

    match attacher.attach("vol1", "host1", &MountSpec::default()).await {
        Err(Error::RemoteCommand { exit_code, stderr, .. }) => {
            assert_eq!(exit_code, 1);
            assert_eq!(stderr, "mkfs: device busy");
        }
        other => panic!("unexpected result: {:?}", other),
    }
    let volumes: HostVolumesV1 = stored_host(&ctx, "host1").await.properties.get().unwrap();
    assert!(volumes.volumes_by_id.is_empty());
}

#[tokio::test]
async fn test_concurrent_attaches_on_one_host() {
    let ctx = memory_context().await;
    let (hv, host, _) = host_and_volume(&ctx).await;
    let second = hv
        .create_volume(VolumeRequest {
            name: "vol2".to_string(),
            size: 5,
            speed: VolumeSpeed::Hdd,
        })
        .await
        .unwrap();
    save_volume(&ctx, &second).await.unwrap();
    // Each attach waits after its disk shows up, so an unserialised second
    // attach would list the first one's disk as its own
    hv.set_attachment_latency(Duration::from_millis(50));
    let shell = hv.shell(&host.id);
    let attacher = VolumeAttacher::new(&ctx, hv.as_ref(), &shell);

    let (at_a, at_b) = (mount_at("/a"), mount_at("/b"));
    let (a, b) = tokio::join!(
        attacher.attach("vol1", "host1", &at_a),
        attacher.attach("vol2", "host1", &at_b),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.device, "/dev/vdb");
    assert_eq!(b.device, "/dev/vdc");

    let stored = stored_host(&ctx, "host1").await;
    let volumes: HostVolumesV1 = stored.properties.get().unwrap();
    assert_eq!(volumes.volumes_by_id.len(), 2);
    assert_eq!(volumes.volumes_by_device.len(), 2);
    let mounts: HostMountsV1 = stored.properties.get().unwrap();
    assert_eq!(mounts.local_mounts_by_path.len(), 2);
    assert_eq!(mounts.by_device("/dev/vdc").unwrap().path, "/b");
}

#[tokio::test]
async fn test_attach_refuses_device_recorded_for_another_volume() {
    let ctx = memory_context().await;
    let (hv, host, volume) = host_and_volume(&ctx).await;
    let second = hv
        .create_volume(VolumeRequest {
            name: "vol2".to_string(),
            size: 5,
            speed: VolumeSpeed::Hdd,
        })
        .await
        .unwrap();
    save_volume(&ctx, &second).await.unwrap();
    let shell = hv.shell(&host.id);
    let attacher = VolumeAttacher::new(&ctx, hv.as_ref(), &shell);

    let first = attacher.attach("vol1", "host1", &mount_at("/data")).await.unwrap();
    // Detached behind our back: vdb is free again but still recorded for vol1
    hv.delete_volume_attachment(&host.id, &first.attach_id).await.unwrap();

    match attacher.attach("vol2", "host1", &mount_at("/other")).await {
        Err(Error::Inconsistency(message)) => {
            assert!(message.contains("/dev/vdb"));
            assert!(message.contains(&volume.id));
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(shell.history().iter().filter(|c| c.contains("mkfs")).count(), 1);

    let volumes: HostVolumesV1 = stored_host(&ctx, "host1").await.properties.get().unwrap();
    assert_eq!(volumes.volumes_by_device.get("/dev/vdb").unwrap(), &volume.id);
    assert!(!volumes.volumes_by_id.contains_key(&second.id));
    let attached: VolumeAttachedV1 = stored_volume(&ctx, "vol2").await.properties.get().unwrap();
    assert!(attached.hosts.is_empty());
}

#[tokio::test]
async fn test_unpersisted_membership_is_lost() {
    let ctx = memory_context().await;
    let network = Network::new("net1", "10.0.0.0/24");
    save_network(&ctx, &network).await.unwrap();
    let host = Host::new("host1");
    save_host(&ctx, &host).await.unwrap();

    {
        let mut item = load_network(&ctx, "net1").await.unwrap().unwrap();
        item.attach_host(&host).unwrap();
        // Dropped before write, as after a crash
    }

    let reloaded = load_network(&ctx, "net1").await.unwrap().unwrap();
    let members: NetworkHostsV1 = reloaded.get().unwrap().properties.get().unwrap();
    assert!(members.by_id.is_empty());
    assert!(reloaded.list_hosts().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_repair_after_partial_detach() {
    let ctx = memory_context().await;
    let (hv, host, _) = host_and_volume(&ctx).await;
    let shell = hv.shell(&host.id);
    let attacher = VolumeAttacher::new(&ctx, hv.as_ref(), &shell);
    attacher.attach("vol1", "host1", &mount_at("/data")).await.unwrap();

    // Host side forgotten, volume side left behind
    let mut stale = stored_host(&ctx, "host1").await;
    stale.properties.set(&HostVolumesV1::default()).unwrap();
    stale.properties.set(&HostMountsV1::default()).unwrap();
    save_host(&ctx, &stale).await.unwrap();

    let report = reconcile(&ctx).await.unwrap();
    assert_eq!(report.removed_volume_edges, 1);
    let attached: VolumeAttachedV1 = stored_volume(&ctx, "vol1").await.properties.get().unwrap();
    assert!(attached.hosts.is_empty());

    assert!(reconcile(&ctx).await.unwrap().is_clean());
}
