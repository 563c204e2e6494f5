//! libvirt driver built on the `virsh` command line
//!
//! Hosts are libvirt domains, networks are libvirt networks and volumes are
//! qcow2 files in one storage pool. Volume files are named
//! `<name>--<id>.qcow2` so both keys survive a listing.

use crate::catalog::Catalog;
use crate::config::ProviderConfig;
use crate::hypervisor::Hypervisor;
use localdriver_core::props::{HostNetworkV1, HostSize, HostSizingV1};
use localdriver_core::{
    new_id, Error, GatewayRequest, Host, HostRequest, HostState, HostTemplate, Image, IpVersion,
    KeyPair, Network, NetworkRequest, Result, Volume, VolumeAttachmentRequest, VolumeRequest,
    DEFAULT_CIDR,
};
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Map the output of `virsh domstate` to a host state
pub fn parse_domain_state(output: &str) -> HostState {
    match output.trim() {
        "running" => HostState::Started,
        "shut off" | "crashed" => HostState::Stopped,
        "in shutdown" => HostState::Stopping,
        _ => HostState::Error,
    }
}

/// Rows of a `virsh` table, after the dashed separator line
fn table_rows(output: &str) -> impl Iterator<Item = Vec<&str>> {
    output
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("---"))
        .skip(1)
        .map(|line| line.split_whitespace().collect::<Vec<_>>())
        .filter(|row| !row.is_empty())
}

/// Value of a `Key: value` line
fn field<'a>(output: &'a str, key: &str) -> Option<&'a str> {
    output.lines().find_map(|line| {
        let (k, v) = line.split_once(':')?;
        (k.trim() == key).then(|| v.trim())
    })
}

/// Cores and RAM (GB) from `virsh dominfo`
pub fn parse_dominfo(output: &str) -> (u32, f32) {
    let cores = field(output, "CPU(s)")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let ram_kib: f64 = field(output, "Max memory")
        .and_then(|v| v.split_whitespace().next())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0.0);
    (cores, (ram_kib / (1024.0 * 1024.0)) as f32)
}

/// (interface, IPv4 address) pairs from `virsh domifaddr`
pub fn parse_domifaddr(output: &str) -> Vec<(String, String)> {
    table_rows(output)
        .filter(|row| row.len() >= 4 && row[2] == "ipv4")
        .map(|row| {
            let address = row[3].split('/').next().unwrap_or(row[3]);
            (row[0].to_string(), address.to_string())
        })
        .collect()
}

/// (interface, network name) pairs from `virsh domiflist`
pub fn parse_domiflist(output: &str) -> Vec<(String, String)> {
    table_rows(output)
        .filter(|row| row.len() >= 3 && row[1] == "network")
        .map(|row| (row[0].to_string(), row[2].to_string()))
        .collect()
}

/// (target, source) disk pairs from `virsh domblklist --details`
pub fn parse_domblklist(output: &str) -> Vec<(String, String)> {
    table_rows(output)
        .filter(|row| row.len() >= 4 && row[1] == "disk")
        .map(|row| (row[2].to_string(), row[3].to_string()))
        .collect()
}

/// Volume file name carrying both name and id
pub fn volume_file(name: &str, id: &str) -> String {
    format!("{}--{}.qcow2", name, id)
}

/// Split a volume file name back into (name, id)
pub fn parse_volume_file(file: &str) -> Option<(String, String)> {
    let stem = file.strip_suffix(".qcow2")?;
    let (name, id) = stem.rsplit_once("--")?;
    if name.is_empty() || id.is_empty() {
        return None;
    }
    Some((name.to_string(), id.to_string()))
}

/// Parse an IPv4 CIDR into its network address and prefix length
pub fn parse_cidr(cidr: &str) -> Result<(Ipv4Addr, u8)> {
    let invalid = || Error::Hypervisor(format!("invalid IPv4 CIDR '{}'", cidr));
    let (address, prefix) = cidr.split_once('/').ok_or_else(invalid)?;
    let address: Ipv4Addr = address.parse().map_err(|_| invalid())?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    if !(8..=30).contains(&prefix) {
        return Err(invalid());
    }
    let mask = u32::MAX << (32 - prefix);
    Ok((Ipv4Addr::from(u32::from(address) & mask), prefix))
}

/// libvirt definition of a NAT network with DHCP over the whole range
pub fn network_xml(name: &str, cidr: &str) -> Result<String> {
    let (network, prefix) = parse_cidr(cidr)?;
    let base = u32::from(network);
    let mask = u32::MAX << (32 - prefix);
    let broadcast = base | !mask;
    Ok(format!(
        "<network>\n  <name>{}</name>\n  <forward mode='nat'/>\n  <ip address='{}' netmask='{}'>\n    <dhcp>\n      <range start='{}' end='{}'/>\n    </dhcp>\n  </ip>\n</network>\n",
        name,
        Ipv4Addr::from(base + 1),
        Ipv4Addr::from(mask),
        Ipv4Addr::from(base + 2),
        Ipv4Addr::from(broadcast - 1),
    ))
}

fn xml_attr<'a>(xml: &'a str, element: &str, attr: &str) -> Option<&'a str> {
    let start = xml.find(&format!("<{} ", element))?;
    let tag = &xml[start..start + xml[start..].find('>')?];
    let key = format!("{}='", attr);
    let value_start = tag.find(&key)? + key.len();
    let value_len = tag[value_start..].find('\'')?;
    Some(&tag[value_start..value_start + value_len])
}

/// CIDR of a network from `virsh net-dumpxml`
pub fn parse_network_cidr(xml: &str) -> Option<String> {
    let address: Ipv4Addr = xml_attr(xml, "ip", "address")?.parse().ok()?;
    let prefix = match xml_attr(xml, "ip", "prefix") {
        Some(prefix) => prefix.parse().ok()?,
        None => {
            let netmask: Ipv4Addr = xml_attr(xml, "ip", "netmask")?.parse().ok()?;
            u32::from(netmask).count_ones() as u8
        }
    };
    let mask = u32::MAX.checked_shl(32 - prefix as u32).unwrap_or(0);
    Some(format!("{}/{}", Ipv4Addr::from(u32::from(address) & mask), prefix))
}

fn is_lookup_failure(err: &Error) -> bool {
    matches!(err, Error::Hypervisor(msg) if msg.contains("failed to get"))
}

/// Hypervisor driving a local libvirt daemon
pub struct VirshHypervisor {
    config: ProviderConfig,
    catalog: Catalog,
}

impl VirshHypervisor {
    /// Create a driver, loading the catalogs named in the configuration
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let catalog = Catalog::load(&config.images_catalog, &config.templates_catalog)?;
        Ok(Self::with_catalog(config, catalog))
    }

    pub fn with_catalog(config: ProviderConfig, catalog: Catalog) -> Self {
        Self { config, catalog }
    }

    async fn exec(&self, program: &str, args: &[String]) -> Result<String> {
        let label = format!("{} {}", program, args.join(" "));
        debug!(command = %label, "Running driver command");

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let timeout = self.config.command_timeout();
        let output = tokio::time::timeout(timeout, command.output())
            .await
            .map_err(|_| Error::Timeout(label.clone(), timeout))??;

        if !output.status.success() {
            return Err(Error::Hypervisor(format!(
                "'{}' failed: {}",
                label,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn virsh(&self, args: &[&str]) -> Result<String> {
        let mut full = vec!["-c".to_string(), self.config.uri.clone()];
        full.extend(args.iter().map(|a| a.to_string()));
        self.exec("virsh", &full).await
    }

    async fn domain_uuid(&self, reference: &str) -> Result<String> {
        match self.virsh(&["domuuid", reference]).await {
            Ok(uuid) => Ok(uuid.trim().to_string()),
            Err(e) if is_lookup_failure(&e) => Err(Error::NotFound {
                kind: "host",
                key: reference.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    async fn network_name(&self, reference: &str) -> Result<String> {
        // net-name only resolves uuids; anything else is taken as a name
        let name = match self.virsh(&["net-name", reference]).await {
            Ok(name) => name.trim().to_string(),
            Err(_) => reference.to_string(),
        };
        match self.virsh(&["net-info", &name]).await {
            Ok(_) => Ok(name),
            Err(e) if is_lookup_failure(&e) => Err(Error::NotFound {
                kind: "network",
                key: reference.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    async fn host_from_domain(&self, uuid: &str) -> Result<Host> {
        let name = self.virsh(&["domname", uuid]).await?.trim().to_string();
        let state = parse_domain_state(&self.virsh(&["domstate", uuid]).await?);
        let (cores, ram_size) = parse_dominfo(&self.virsh(&["dominfo", uuid]).await?);

        let mut disk_size = 0u32;
        for (target, _) in parse_domblklist(&self.virsh(&["domblklist", uuid, "--details"]).await?) {
            let info = self.virsh(&["domblkinfo", uuid, &target]).await?;
            let bytes: f64 = field(&info, "Capacity")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.0);
            disk_size += (bytes / GIB) as u32;
        }

        let mut network = HostNetworkV1::default();
        let interfaces = parse_domiflist(&self.virsh(&["domiflist", uuid]).await?);
        let addresses = if state == HostState::Started {
            parse_domifaddr(&self.virsh(&["domifaddr", uuid]).await.unwrap_or_default())
        } else {
            Vec::new()
        };
        for (interface, network_name) in interfaces {
            let network_id = self
                .virsh(&["net-uuid", &network_name])
                .await?
                .trim()
                .to_string();
            if network.default_network_id.is_empty() {
                network.default_network_id = network_id.clone();
            }
            if let Some((_, address)) = addresses.iter().find(|(i, _)| *i == interface) {
                network
                    .ipv4_addresses
                    .insert(network_id.clone(), address.clone());
            }
            network
                .networks_by_name
                .insert(network_name.clone(), network_id.clone());
            network.networks_by_id.insert(network_id, network_name);
        }

        let mut host = Host::new(name);
        host.id = uuid.to_string();
        host.last_state = state;
        host.properties.set(&network)?;
        host.properties.set(&HostSizingV1 {
            requested: None,
            allocated: HostSize {
                cores,
                ram_size,
                disk_size,
                ..Default::default()
            },
            template: String::new(),
        })?;
        Ok(host)
    }

    async fn network_from_name(&self, name: &str) -> Result<Network> {
        let id = self.virsh(&["net-uuid", name]).await?.trim().to_string();
        let xml = self.virsh(&["net-dumpxml", name]).await?;
        let cidr = parse_network_cidr(&xml).unwrap_or_default();
        let mut network = Network::new(name, cidr);
        network.id = id;
        Ok(network)
    }

    async fn volume_files(&self) -> Result<Vec<(String, String, String)>> {
        let listing = self
            .virsh(&["vol-list", "--pool", &self.config.storage_pool])
            .await?;
        Ok(table_rows(&listing)
            .filter_map(|row| {
                let file = row.first()?.to_string();
                let (name, id) = parse_volume_file(&file)?;
                Some((file, name, id))
            })
            .collect())
    }

    async fn find_volume_file(&self, reference: &str) -> Result<(String, String, String)> {
        self.volume_files()
            .await?
            .into_iter()
            .find(|(_, name, id)| id == reference || name == reference)
            .ok_or_else(|| Error::NotFound {
                kind: "volume",
                key: reference.to_string(),
            })
    }

    async fn volume_from_file(&self, file: &str, name: &str, id: &str) -> Result<Volume> {
        let info = self
            .virsh(&["vol-info", "--pool", &self.config.storage_pool, "--bytes", file])
            .await?;
        let bytes: f64 = field(&info, "Capacity")
            .and_then(|v| v.split_whitespace().next())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0);
        let mut volume = Volume::new(name, (bytes / GIB).round() as u32);
        volume.id = id.to_string();
        Ok(volume)
    }
}

#[async_trait::async_trait]
impl Hypervisor for VirshHypervisor {
    async fn list_images(&self) -> Result<Vec<Image>> {
        Ok(self.catalog.images.clone())
    }

    async fn get_image(&self, reference: &str) -> Result<Image> {
        self.catalog.image(reference)
    }

    async fn list_templates(&self) -> Result<Vec<HostTemplate>> {
        Ok(self.catalog.templates.clone())
    }

    async fn get_template(&self, reference: &str) -> Result<HostTemplate> {
        self.catalog.template(reference)
    }

    async fn create_key_pair(&self, name: &str) -> Result<KeyPair> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("key");
        let args = [
            "-t", "rsa", "-b", "2048", "-N", "", "-q", "-C", name, "-f",
        ]
        .iter()
        .map(|a| a.to_string())
        .chain(std::iter::once(path.display().to_string()))
        .collect::<Vec<_>>();
        self.exec("ssh-keygen", &args).await?;

        Ok(KeyPair {
            id: new_id(),
            name: name.to_string(),
            public_key: std::fs::read_to_string(path.with_extension("pub"))?,
            private_key: std::fs::read_to_string(&path)?,
        })
    }

    async fn create_host(&self, request: HostRequest) -> Result<Host> {
        if request.name.is_empty() {
            return Err(Error::Hypervisor("host name is mandatory".to_string()));
        }
        if request.networks.is_empty() && !request.public_ip {
            return Err(Error::Hypervisor(format!(
                "host '{}' must be on a network or be public",
                request.name
            )));
        }
        let template = self.catalog.template(&request.template_id)?;
        let image = self.catalog.image(&request.image_id)?;
        match self.domain_uuid(&request.name).await {
            Ok(_) => {
                return Err(Error::Hypervisor(format!(
                    "host '{}' already exists",
                    request.name
                )))
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        let key_pair = match request.key_pair.clone() {
            Some(key_pair) => key_pair,
            None => self.create_key_pair(&format!("key_{}", request.name)).await?,
        };

        let extension = Path::new(&image.path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("qcow2");
        let disk = self
            .config
            .storage_path
            .join(format!("{}.{}", request.name, extension))
            .display()
            .to_string();

        info!(host = %request.name, template = %template.name, image = %image.name, "Creating host");
        self.exec("cp", &[image.path.clone(), disk.clone()]).await?;
        self.exec(
            "qemu-img",
            &[
                "resize".to_string(),
                disk.clone(),
                format!("{}G", template.size.disk_size.max(1)),
            ],
        )
        .await?;
        self.exec(
            "virt-sysprep",
            &[
                "-a".to_string(),
                disk.clone(),
                "--hostname".to_string(),
                request.name.clone(),
                "--ssh-inject".to_string(),
                format!("root:string:{}", key_pair.public_key.trim()),
                "--operations".to_string(),
                "all,-ssh-hostkeys".to_string(),
            ],
        )
        .await?;

        let mut args = vec![
            format!("--connect={}", self.config.uri),
            format!("--name={}", request.name),
            format!("--vcpus={}", template.size.cores),
            format!("--memory={}", (template.size.ram_size * 1024.0) as u32),
            "--import".to_string(),
            format!("--disk={}", disk),
            "--os-variant=generic".to_string(),
            "--noautoconsole".to_string(),
        ];
        for network in &request.networks {
            args.push(format!("--network=network={}", network.name));
        }
        if request.public_ip {
            args.push(format!(
                "--network=type=direct,source={}",
                self.config.public_interface
            ));
        }
        self.exec("virt-install", &args).await?;

        let mut host = match self.get_host(&request.name).await {
            Ok(host) => host,
            Err(e) => {
                warn!(host = %request.name, error = %e, "Created host cannot be read back, deleting it");
                if let Err(cleanup) = self.delete_host(&request.name).await {
                    warn!(host = %request.name, error = %cleanup, "Cleanup failed");
                }
                return Err(e);
            }
        };
        host.private_key = key_pair.private_key;
        host.properties.update::<HostSizingV1, _, _>(|s| {
            s.template = template.name.clone();
        })?;
        host.properties.update::<HostNetworkV1, _, _>(|n| {
            n.default_gateway_id = request.default_gateway_id.clone().unwrap_or_default();
        })?;
        Ok(host)
    }

    async fn get_host(&self, reference: &str) -> Result<Host> {
        let uuid = self.domain_uuid(reference).await?;
        self.host_from_domain(&uuid).await
    }

    async fn list_hosts(&self) -> Result<Vec<Host>> {
        let listing = self.virsh(&["list", "--all", "--uuid"]).await?;
        let mut hosts = Vec::new();
        for uuid in listing.lines().map(str::trim).filter(|l| !l.is_empty()) {
            hosts.push(self.host_from_domain(uuid).await?);
        }
        Ok(hosts)
    }

    async fn delete_host(&self, reference: &str) -> Result<()> {
        let uuid = self.domain_uuid(reference).await?;
        let state = parse_domain_state(&self.virsh(&["domstate", &uuid]).await?);
        if matches!(state, HostState::Started | HostState::Stopping) {
            self.virsh(&["destroy", &uuid]).await?;
        }

        // Only the boot disk goes with the domain, attached volumes are kept
        let disks = parse_domblklist(&self.virsh(&["domblklist", &uuid, "--details"]).await?);
        match disks.first() {
            Some((target, _)) => {
                self.virsh(&["undefine", &uuid, "--storage", target]).await?;
            }
            None => {
                self.virsh(&["undefine", &uuid]).await?;
            }
        }
        info!(host = %reference, "Deleted host");
        Ok(())
    }

    async fn start_host(&self, reference: &str) -> Result<()> {
        let uuid = self.domain_uuid(reference).await?;
        self.virsh(&["start", &uuid]).await.map(|_| ())
    }

    async fn stop_host(&self, reference: &str) -> Result<()> {
        let uuid = self.domain_uuid(reference).await?;
        self.virsh(&["shutdown", &uuid]).await.map(|_| ())
    }

    async fn reboot_host(&self, reference: &str) -> Result<()> {
        let uuid = self.domain_uuid(reference).await?;
        self.virsh(&["reboot", &uuid]).await.map(|_| ())
    }

    async fn get_host_state(&self, reference: &str) -> Result<HostState> {
        let uuid = self.domain_uuid(reference).await?;
        Ok(parse_domain_state(&self.virsh(&["domstate", &uuid]).await?))
    }

    async fn create_network(&self, request: NetworkRequest) -> Result<Network> {
        if request.ip_version != IpVersion::IPv4 {
            return Err(Error::Unsupported("IPv6 networks".to_string()));
        }
        let cidr = if request.cidr.is_empty() {
            DEFAULT_CIDR
        } else {
            request.cidr.as_str()
        };
        let xml = network_xml(&request.name, cidr)?;
        let mut file = tempfile::Builder::new()
            .prefix("localdriver-net")
            .suffix(".xml")
            .tempfile()?;
        file.write_all(xml.as_bytes())?;
        file.flush()?;
        let path = file.path().display().to_string();

        self.virsh(&["net-define", &path]).await?;
        self.virsh(&["net-start", &request.name]).await?;
        self.virsh(&["net-autostart", &request.name]).await?;
        info!(network = %request.name, cidr, "Created network");
        self.network_from_name(&request.name).await
    }

    async fn get_network(&self, reference: &str) -> Result<Network> {
        let name = self.network_name(reference).await?;
        self.network_from_name(&name).await
    }

    async fn list_networks(&self) -> Result<Vec<Network>> {
        let listing = self.virsh(&["net-list", "--all", "--name"]).await?;
        let mut networks = Vec::new();
        for name in listing.lines().map(str::trim).filter(|l| !l.is_empty()) {
            networks.push(self.network_from_name(name).await?);
        }
        Ok(networks)
    }

    async fn delete_network(&self, reference: &str) -> Result<()> {
        let name = self.network_name(reference).await?;
        let info = self.virsh(&["net-info", &name]).await?;
        if field(&info, "Active") == Some("yes") {
            self.virsh(&["net-destroy", &name]).await?;
        }
        self.virsh(&["net-undefine", &name]).await?;
        info!(network = %name, "Deleted network");
        Ok(())
    }

    async fn create_gateway(&self, request: GatewayRequest) -> Result<Host> {
        let host_request = HostRequest {
            name: request.host_name(),
            public_ip: true,
            networks: vec![request.network.clone()],
            default_gateway_id: None,
            template_id: request.template_id,
            image_id: request.image_id,
            key_pair: request.key_pair,
        };
        let mut host = self.create_host(host_request).await?;
        host.properties
            .update::<HostNetworkV1, _, _>(|n| n.is_gateway = true)?;
        Ok(host)
    }

    async fn create_volume(&self, request: VolumeRequest) -> Result<Volume> {
        if request.size == 0 {
            return Err(Error::Hypervisor("volume size must be positive".to_string()));
        }
        if self
            .volume_files()
            .await?
            .iter()
            .any(|(_, name, _)| *name == request.name)
        {
            return Err(Error::Hypervisor(format!(
                "volume '{}' already exists",
                request.name
            )));
        }
        let id = new_id();
        let file = volume_file(&request.name, &id);
        self.virsh(&[
            "vol-create-as",
            &self.config.storage_pool,
            &file,
            &format!("{}G", request.size),
            "--format",
            "qcow2",
        ])
        .await?;
        info!(volume = %request.name, size = request.size, "Created volume");

        let mut volume = Volume::new(request.name, request.size);
        volume.id = id;
        volume.speed = request.speed;
        Ok(volume)
    }

    async fn get_volume(&self, reference: &str) -> Result<Volume> {
        let (file, name, id) = self.find_volume_file(reference).await?;
        self.volume_from_file(&file, &name, &id).await
    }

    async fn list_volumes(&self) -> Result<Vec<Volume>> {
        let mut volumes = Vec::new();
        for (file, name, id) in self.volume_files().await? {
            volumes.push(self.volume_from_file(&file, &name, &id).await?);
        }
        Ok(volumes)
    }

    async fn delete_volume(&self, reference: &str) -> Result<()> {
        let (file, _, _) = self.find_volume_file(reference).await?;
        self.virsh(&["vol-delete", "--pool", &self.config.storage_pool, &file])
            .await?;
        info!(volume = %reference, "Deleted volume");
        Ok(())
    }

    async fn create_volume_attachment(&self, request: VolumeAttachmentRequest) -> Result<String> {
        let uuid = self.domain_uuid(&request.host_id).await?;
        let (file, _, _) = self.find_volume_file(&request.volume_id).await?;
        let path = self
            .virsh(&["vol-path", "--pool", &self.config.storage_pool, &file])
            .await?
            .trim()
            .to_string();

        let used: Vec<String> = parse_domblklist(&self.virsh(&["domblklist", &uuid, "--details"]).await?)
            .into_iter()
            .map(|(target, _)| target)
            .collect();
        let target = ('b'..='z')
            .map(|letter| format!("vd{}", letter))
            .find(|t| !used.contains(t))
            .ok_or_else(|| Error::Hypervisor("no free disk target".to_string()))?;

        self.virsh(&[
            "attach-disk",
            &uuid,
            &path,
            &target,
            "--driver",
            "qemu",
            "--subdriver",
            "qcow2",
            "--targetbus",
            "virtio",
            "--persistent",
        ])
        .await?;
        info!(attachment = %request.name, target = %target, "Attached volume");
        Ok(target)
    }

    async fn delete_volume_attachment(&self, host_id: &str, attachment_id: &str) -> Result<()> {
        let uuid = self.domain_uuid(host_id).await?;
        self.virsh(&["detach-disk", &uuid, attachment_id, "--persistent"])
            .await?;
        info!(host = %host_id, target = %attachment_id, "Detached volume");
        Ok(())
    }
}
