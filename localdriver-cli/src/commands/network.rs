//! Network Commands
//!
//! A network is created together with its gateway host; both are mirrored
//! into metadata, and the network keeps a pointer to the gateway.

use crate::app::App;
use crate::symbols;
use anyhow::{bail, Context, Result};
use console::style;
use localdriver_core::props::NetworkHostsV1;
use localdriver_core::{GatewayRequest, IpVersion, Network, NetworkRequest, SizingRequirements};
use localdriver_metadata::network::{list_networks, load_network, remove_network, save_network};
use localdriver_metadata::{load_gateway, remove_gateway, save_gateway};
use localdriver_provider::select_template_by_size;
use tracing::{info, warn};

/// Network creation settings
#[derive(Debug, Clone)]
pub struct NetworkCreateConfig {
    pub name: String,
    pub cidr: String,
    pub gateway: GatewaySizing,
    /// Defaults to `gw-<network>`
    pub gateway_name: Option<String>,
}

/// Size and OS of a gateway host
#[derive(Debug, Clone)]
pub struct GatewaySizing {
    pub cpu: u32,
    /// GB
    pub ram: f32,
    /// GB
    pub disk: u32,
    pub os: String,
}

impl Default for GatewaySizing {
    fn default() -> Self {
        Self {
            cpu: 1,
            ram: 1.0,
            disk: 16,
            os: "ubuntu-18.04".to_string(),
        }
    }
}

/// Create a network and its gateway, then record both
///
/// The network is removed again if its gateway cannot be created.
pub async fn create_network(app: &App, config: &NetworkCreateConfig) -> Result<Network> {
    let ctx = &app.metadata;
    if load_network(ctx, &config.name).await?.is_some() {
        bail!("Network '{}' already exists", config.name);
    }

    let network = app
        .hypervisor()
        .create_network(NetworkRequest {
            name: config.name.clone(),
            ip_version: IpVersion::IPv4,
            cidr: config.cidr.clone(),
            dns_servers: Vec::new(),
        })
        .await
        .with_context(|| format!("Failed to create network '{}'", config.name))?;
    save_network(ctx, &network).await?;
    info!(network = %network.name, id = %network.id, "Created network");

    match create_gateway(app, &network, config).await {
        Ok(()) => {}
        Err(e) => {
            warn!(network = %network.name, error = %e, "Gateway creation failed, removing network");
            if let Err(cleanup) = app.hypervisor().delete_network(&network.id).await {
                warn!(network = %network.name, error = %cleanup, "Failed to delete network");
            }
            remove_network(ctx, &network).await?;
            return Err(e);
        }
    }

    let stored = load_network(ctx, &network.id)
        .await?
        .and_then(|item| item.into_inner())
        .with_context(|| format!("Metadata of network '{}' vanished", network.name))?;
    Ok(stored)
}

async fn create_gateway(app: &App, network: &Network, config: &NetworkCreateConfig) -> Result<()> {
    let sizing = SizingRequirements {
        min_cores: config.gateway.cpu,
        min_ram_size: config.gateway.ram,
        min_disk_size: config.gateway.disk,
        ..Default::default()
    };
    let templates = app.hypervisor().list_templates().await?;
    let template = select_template_by_size(&sizing, &templates)
        .context("No template fits the gateway size")?;
    let image = app
        .hypervisor()
        .get_image(&config.gateway.os)
        .await
        .with_context(|| format!("Unknown image '{}'", config.gateway.os))?;

    let gateway = app
        .hypervisor()
        .create_gateway(GatewayRequest {
            network: network.clone(),
            template_id: template.id,
            image_id: image.id,
            name: config.gateway_name.clone().unwrap_or_default(),
            key_pair: None,
        })
        .await
        .with_context(|| format!("Failed to create gateway of network '{}'", network.name))?;

    if let Err(e) = save_gateway(&app.metadata, &gateway, &network.id).await {
        if let Err(cleanup) = app.hypervisor().delete_host(&gateway.id).await {
            warn!(gateway = %gateway.name, error = %cleanup, "Failed to delete gateway host");
        }
        return Err(e.into());
    }
    info!(network = %network.name, gateway = %gateway.name, "Created gateway");
    Ok(())
}

/// Run network create command
pub async fn run_create(app: &App, config: NetworkCreateConfig) -> Result<()> {
    let network = create_network(app, &config).await?;
    println!(
        "{} Network {} created ({})",
        style(symbols::CHECK).green(),
        style(&network.name).cyan(),
        network.cidr
    );
    println!("  ID:      {}", network.id);
    println!("  Gateway: {}", network.gateway_id);
    Ok(())
}

/// Delete a network with its gateway
///
/// Refused while hosts other than the gateway are members.
pub async fn delete_network(app: &App, reference: &str) -> Result<()> {
    let ctx = &app.metadata;
    let network = load_network(ctx, reference)
        .await?
        .and_then(|item| item.into_inner())
        .with_context(|| format!("Network '{}' not found", reference))?;

    let members: NetworkHostsV1 = network.properties.get()?;
    if !members.by_name.is_empty() {
        let names: Vec<&str> = members.by_name.keys().map(String::as_str).collect();
        bail!(
            "Network '{}' still has hosts: {}",
            network.name,
            names.join(", ")
        );
    }

    if let Some(gateway) = load_gateway(ctx, &network.id).await? {
        if let Some(host) = gateway.get() {
            match app.hypervisor().delete_host(&host.id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    warn!(gateway = %host.name, "Gateway host already gone from hypervisor");
                }
                Err(e) => return Err(e).context("Failed to delete gateway host"),
            }
        }
    }
    remove_gateway(ctx, &network.id).await?;

    match app.hypervisor().delete_network(&network.id).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => {
            warn!(network = %network.name, "Network already gone from hypervisor");
        }
        Err(e) => return Err(e).context("Failed to delete network"),
    }
    remove_network(ctx, &network).await?;
    info!(network = %network.name, "Deleted network");
    Ok(())
}

/// Run network delete command
pub async fn run_delete(app: &App, names: &[String]) -> Result<()> {
    for name in names {
        delete_network(app, name).await?;
        println!("{} Network {} deleted", style(symbols::CHECK).green(), style(name).cyan());
    }
    Ok(())
}

/// Run network list command
pub async fn run_list(app: &App) -> Result<()> {
    let networks = list_networks(&app.metadata).await?;
    if networks.is_empty() {
        println!("{} No networks found", style("Info:").cyan());
        return Ok(());
    }

    println!(
        "{:<24} {:<20} {:>6} {}",
        style("NAME").bold(),
        style("CIDR").bold(),
        style("HOSTS").bold(),
        style("ID").bold()
    );
    for network in &networks {
        let members: NetworkHostsV1 = network.properties.get()?;
        println!(
            "{:<24} {:<20} {:>6} {}",
            network.name,
            network.cidr,
            members.by_id.len(),
            network.id
        );
    }
    Ok(())
}

/// Run network inspect command
pub async fn run_inspect(app: &App, reference: &str) -> Result<()> {
    let network = load_network(&app.metadata, reference)
        .await?
        .and_then(|item| item.into_inner())
        .with_context(|| format!("Network '{}' not found", reference))?;
    println!("{}", serde_json::to_string_pretty(&network)?);
    Ok(())
}
