//! Host Commands
//!
//! Hosts are created on a network, the default one unless told otherwise,
//! and reach the outside through that network's gateway.

use crate::app::App;
use crate::commands::network::{self, GatewaySizing, NetworkCreateConfig};
use crate::symbols;
use anyhow::{bail, Context, Result};
use chrono::Utc;
use console::style;
use localdriver_core::props::{HostDescriptionV1, HostNetworkV1, HostSize, HostSizingV1, HostVolumesV1};
use localdriver_core::{Host, HostRequest, HostState, Network, SizingRequirements};
use localdriver_metadata::host::{list_hosts, load_host, remove_host, save_host};
use localdriver_metadata::item::update;
use localdriver_metadata::load_gateway;
use localdriver_metadata::network::{load_network, load_network_by_id};
use localdriver_provider::select_template_by_size;
use tracing::{info, warn};

/// Network hosts land on when none is given
pub const DEFAULT_NETWORK_NAME: &str = "net-localdriver";

/// CIDR of the default network
pub const DEFAULT_NETWORK_CIDR: &str = "10.0.0.0/24";

/// Host creation settings
#[derive(Debug, Clone)]
pub struct HostCreateConfig {
    pub name: String,
    pub network: Option<String>,
    pub cpu: u32,
    /// GB
    pub ram: f32,
    /// GB
    pub disk: u32,
    pub gpu: u32,
    /// GHz
    pub cpu_freq: f32,
    pub os: String,
    pub public: bool,
}

impl HostCreateConfig {
    fn sizing(&self) -> SizingRequirements {
        SizingRequirements {
            min_cores: self.cpu,
            min_ram_size: self.ram,
            min_disk_size: self.disk,
            min_gpu: self.gpu,
            min_freq: self.cpu_freq,
        }
    }
}

/// Network named by the user, or the default one created on first use
async fn host_network(app: &App, reference: Option<&str>) -> Result<Network> {
    if let Some(reference) = reference {
        return load_network(&app.metadata, reference)
            .await?
            .and_then(|item| item.into_inner())
            .with_context(|| format!("Network '{}' not found", reference));
    }

    if let Some(network) = load_network(&app.metadata, DEFAULT_NETWORK_NAME)
        .await?
        .and_then(|item| item.into_inner())
    {
        return Ok(network);
    }
    info!(network = DEFAULT_NETWORK_NAME, "Creating default network");
    network::create_network(
        app,
        &NetworkCreateConfig {
            name: DEFAULT_NETWORK_NAME.to_string(),
            cidr: DEFAULT_NETWORK_CIDR.to_string(),
            gateway: GatewaySizing::default(),
            gateway_name: None,
        },
    )
    .await
}

/// Create a host and record it as a member of its network
pub async fn create_host(app: &App, config: &HostCreateConfig) -> Result<Host> {
    let ctx = &app.metadata;
    if load_host(ctx, &config.name).await?.is_some() {
        bail!("Host '{}' already exists", config.name);
    }

    let network = host_network(app, config.network.as_deref()).await?;
    let default_gateway_id = load_gateway(ctx, &network.id)
        .await?
        .and_then(|gateway| gateway.get().map(|host| host.id.clone()));

    let sizing = config.sizing();
    let templates = app.hypervisor().list_templates().await?;
    let template = select_template_by_size(&sizing, &templates)
        .with_context(|| format!("No template fits host '{}'", config.name))?;
    let image = app
        .hypervisor()
        .get_image(&config.os)
        .await
        .with_context(|| format!("Unknown image '{}'", config.os))?;

    let mut host = app
        .hypervisor()
        .create_host(HostRequest {
            name: config.name.clone(),
            public_ip: config.public,
            networks: vec![network.clone()],
            default_gateway_id,
            template_id: template.id.clone(),
            image_id: image.id,
            key_pair: None,
        })
        .await
        .with_context(|| format!("Failed to create host '{}'", config.name))?;

    host.properties.set(&HostDescriptionV1 {
        created: Some(Utc::now()),
        creator: std::env::var("USER").unwrap_or_default(),
        ..Default::default()
    })?;
    host.properties.update::<HostSizingV1, _, _>(|s| {
        s.requested = Some(HostSize {
            cores: config.cpu,
            ram_size: config.ram,
            disk_size: config.disk,
            gpu_number: config.gpu,
            ..Default::default()
        });
    })?;

    if let Err(e) = save_host(ctx, &host).await {
        if let Err(cleanup) = app.hypervisor().delete_host(&host.id).await {
            warn!(host = %host.name, error = %cleanup, "Failed to delete host");
        }
        return Err(e).context("Failed to record host metadata");
    }

    let mut item = load_network_by_id(ctx, &network.id)
        .await?
        .with_context(|| format!("Metadata of network '{}' vanished", network.name))?;
    item.link_host(&host).await?;

    info!(host = %host.name, id = %host.id, template = %template.name, "Created host");
    Ok(host)
}

/// Run host create command
pub async fn run_create(app: &App, config: HostCreateConfig) -> Result<()> {
    let host = create_host(app, &config).await?;
    let sizing: HostSizingV1 = host.properties.get()?;
    println!(
        "{} Host {} created",
        style(symbols::CHECK).green(),
        style(&host.name).cyan()
    );
    println!("  ID:       {}", host.id);
    println!("  Template: {}", sizing.template);
    println!("  State:    {}", host.last_state);
    Ok(())
}

/// Delete a host and forget it
///
/// Refused while volumes are attached or when the host is a gateway.
pub async fn delete_host(app: &App, reference: &str) -> Result<()> {
    let ctx = &app.metadata;
    let host = app.require_host(reference).await?;

    let volumes: HostVolumesV1 = host.properties.get()?;
    if !volumes.volumes_by_name.is_empty() {
        let names: Vec<&str> = volumes.volumes_by_name.keys().map(String::as_str).collect();
        bail!(
            "Host '{}' still has volumes attached: {}",
            host.name,
            names.join(", ")
        );
    }
    let networks: HostNetworkV1 = host.properties.get()?;
    if networks.is_gateway {
        bail!(
            "Host '{}' is a gateway; delete its network instead",
            host.name
        );
    }

    for network_id in networks.networks_by_id.keys() {
        match load_network_by_id(ctx, network_id).await? {
            Some(mut item) => item.unlink_host(&host.id).await?,
            None => warn!(host = %host.name, network = %network_id, "Network has no metadata"),
        }
    }

    match app.hypervisor().delete_host(&host.id).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => {
            warn!(host = %host.name, "Host already gone from hypervisor");
        }
        Err(e) => return Err(e).context("Failed to delete host"),
    }
    remove_host(ctx, &host).await?;
    info!(host = %host.name, "Deleted host");
    Ok(())
}

/// Run host delete command
pub async fn run_delete(app: &App, names: &[String]) -> Result<()> {
    for name in names {
        delete_host(app, name).await?;
        println!("{} Host {} deleted", style(symbols::CHECK).green(), style(name).cyan());
    }
    Ok(())
}

/// Run host list command
pub async fn run_list(app: &App) -> Result<()> {
    let hosts = list_hosts(&app.metadata).await?;
    if hosts.is_empty() {
        println!("{} No hosts found", style("Info:").cyan());
        return Ok(());
    }

    println!(
        "{:<24} {:<10} {:<12} {}",
        style("NAME").bold(),
        style("STATE").bold(),
        style("TEMPLATE").bold(),
        style("ID").bold()
    );
    for host in &hosts {
        let sizing: HostSizingV1 = host.properties.get()?;
        println!(
            "{:<24} {:<10} {:<12} {}",
            host.name,
            host.last_state.to_string(),
            sizing.template,
            host.id
        );
    }
    Ok(())
}

/// Run host inspect command
pub async fn run_inspect(app: &App, reference: &str) -> Result<()> {
    let host = app.require_host(reference).await?;
    println!("{}", serde_json::to_string_pretty(&host)?);
    Ok(())
}

/// Power operation on a host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    Start,
    Stop,
    Reboot,
}

/// Apply a power action, then store the state the hypervisor reports
pub async fn power(app: &App, reference: &str, action: PowerAction) -> Result<HostState> {
    let host = app.require_host(reference).await?;
    let hypervisor = app.hypervisor();
    let outcome = match action {
        PowerAction::Start => hypervisor.start_host(&host.id).await,
        PowerAction::Stop => hypervisor.stop_host(&host.id).await,
        PowerAction::Reboot => hypervisor.reboot_host(&host.id).await,
    };
    outcome.with_context(|| format!("Failed to {:?} host '{}'", action, host.name))?;

    refresh_state(app, &host).await
}

async fn refresh_state(app: &App, host: &Host) -> Result<HostState> {
    let state = app.hypervisor().get_host_state(&host.id).await?;
    update::<Host, _, _>(&app.metadata, &host.id, |h| {
        h.last_state = state;
        Ok(())
    })
    .await?;
    Ok(state)
}

/// Run host start/stop/reboot command
pub async fn run_power(app: &App, reference: &str, action: PowerAction) -> Result<()> {
    let state = power(app, reference, action).await?;
    println!(
        "{} Host {} is {}",
        style(symbols::CHECK).green(),
        style(reference).cyan(),
        state
    );
    Ok(())
}

/// Run host status command
pub async fn run_status(app: &App, reference: &str) -> Result<()> {
    let host = app.require_host(reference).await?;
    let state = refresh_state(app, &host).await?;
    println!("{}: {}", host.name, state);
    Ok(())
}

/// Run host ssh command, showing how the host is reached
pub async fn run_ssh_config(app: &App, reference: &str) -> Result<()> {
    let target = app.ssh_target(reference).await?;
    println!("{}", style(reference).bold());
    println!("{}", symbols::HLINE);
    println!("  Destination: {}", target.destination());
    println!("  Port:        {}", target.port);
    match &target.gateway {
        Some(gateway) => println!(
            "  {} Gateway:   {}:{}",
            symbols::LINK,
            gateway.destination(),
            gateway.port
        ),
        None => println!("  Gateway:     (direct)"),
    }
    Ok(())
}
