//! LocalDriver CLI
//!
//! `virt` manages hosts, networks and volumes on a local libvirt hypervisor
//! and keeps their metadata in the local object store.
//!
//! # Commands
//! - `host` - Create, delete, list, inspect and power hosts
//! - `network` - Create, delete, list and inspect networks with their gateway
//! - `volume` - Create, delete, attach and detach block volumes
//! - `image` / `template` - Show the catalog
//! - `ssh` - Run commands, copy files, open sessions
//! - `repair` - Re-align metadata cross references
//! - `config` - Show or edit configuration
//!
//! # Configuration
//! Config file: ~/.localdriver/config.toml

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use console::style;
use localdriver_core::{VolumeSpeed, DEFAULT_CIDR, DEFAULT_FILESYSTEM, DEFAULT_VOLUME_MOUNT_POINT};
use localdriver_metadata::MountSpec;
use std::path::PathBuf;

mod app;
mod commands;
mod config;
mod symbols;

use app::App;
use commands::host::{HostCreateConfig, PowerAction};
use commands::network::{GatewaySizing, NetworkCreateConfig};
use commands::{catalog, host, network, repair, ssh, volume};

#[derive(Parser)]
#[command(name = "virt")]
#[command(about = "Manage hosts, networks and volumes on a local hypervisor")]
#[command(version)]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// libvirt connection URI (overrides config file)
    #[arg(long, global = true, env = "LOCALDRIVER_LIBVIRT_URI")]
    uri: Option<String>,

    /// Tenant owning the metadata (overrides config file)
    #[arg(long, global = true, env = "LOCALDRIVER_TENANT_ID")]
    tenant: Option<String>,

    /// Metadata database directory (overrides config file)
    #[arg(long, global = true, env = "LOCALDRIVER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage hosts
    Host {
        #[command(subcommand)]
        action: HostAction,
    },

    /// Manage networks
    Network {
        #[command(subcommand)]
        action: NetworkAction,
    },

    /// Manage volumes
    Volume {
        #[command(subcommand)]
        action: VolumeAction,
    },

    /// Show OS images
    Image {
        #[command(subcommand)]
        action: ListAction,
    },

    /// Show host templates
    Template {
        #[command(subcommand)]
        action: ListAction,
    },

    /// Reach hosts over SSH
    Ssh {
        #[command(subcommand)]
        action: SshAction,
    },

    /// Re-align network, gateway and volume references with host records
    Repair,

    /// Show or edit configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum HostAction {
    /// Create a host
    Create {
        name: String,

        /// Network to put the host on (default network if omitted)
        #[arg(long)]
        net: Option<String>,

        /// Minimum number of cores
        #[arg(long, default_value = "1")]
        cpu: u32,

        /// Minimum RAM in GB
        #[arg(long, default_value = "1")]
        ram: f32,

        /// Minimum system disk in GB
        #[arg(long, default_value = "16")]
        disk: u32,

        /// Minimum number of GPUs
        #[arg(long, default_value = "0")]
        gpu: u32,

        /// Minimum CPU frequency in GHz
        #[arg(long, default_value = "0")]
        cpu_freq: f32,

        /// OS image id or name
        #[arg(long, default_value = "Ubuntu 18.04")]
        os: String,

        /// Give the host a public address
        #[arg(long)]
        public: bool,
    },

    /// Delete hosts
    Delete {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// List hosts
    List,

    /// Show a host record
    Inspect { name: String },

    /// Start a host
    Start { name: String },

    /// Stop a host
    Stop { name: String },

    /// Reboot a host
    Reboot { name: String },

    /// Show the state of a host
    Status { name: String },

    /// Show how a host is reached over SSH
    Ssh { name: String },
}

#[derive(Subcommand)]
enum NetworkAction {
    /// Create a network with its gateway
    Create {
        name: String,

        #[arg(long, default_value = DEFAULT_CIDR)]
        cidr: String,

        /// Gateway cores
        #[arg(long, default_value = "1")]
        cpu: u32,

        /// Gateway RAM in GB
        #[arg(long, default_value = "1")]
        ram: f32,

        /// Gateway disk in GB
        #[arg(long, default_value = "16")]
        disk: u32,

        /// Gateway OS image id or name
        #[arg(long, default_value = "Ubuntu 18.04")]
        os: String,

        /// Gateway host name (default gw-<network>)
        #[arg(long)]
        gwname: Option<String>,
    },

    /// Delete networks and their gateway
    Delete {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// List networks
    List,

    /// Show a network record
    Inspect { name: String },
}

#[derive(Subcommand)]
enum VolumeAction {
    /// Create a volume
    Create {
        name: String,

        /// Size in GB
        #[arg(long, default_value = "10")]
        size: u32,

        /// Speed class: cold, hdd or ssd
        #[arg(long, default_value = "hdd", value_parser = volume::parse_speed)]
        speed: VolumeSpeed,
    },

    /// Delete volumes
    Delete {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// List volumes
    List,

    /// Show a volume record
    Inspect { name: String },

    /// Attach a volume to a host and mount it
    Attach {
        volume: String,
        host: String,

        /// Mount point on the host
        #[arg(long, default_value = DEFAULT_VOLUME_MOUNT_POINT)]
        path: String,

        /// Filesystem to format the volume with
        #[arg(long, default_value = DEFAULT_FILESYSTEM)]
        format: String,
    },

    /// Unmount a volume and detach it from a host
    Detach { volume: String, host: String },
}

#[derive(Subcommand)]
enum ListAction {
    /// List entries
    List,
}

#[derive(Subcommand)]
enum SshAction {
    /// Run a command on a host
    Run {
        host: String,

        #[arg(short, long)]
        command: String,
    },

    /// Copy a file to or from a host; the remote side is written host:path
    Copy { from: String, to: String },

    /// Open an interactive session on a host
    Connect { host: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show config file path
    Path,

    /// Create default config file
    Init {
        /// Overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();

    // Load configuration from ~/.localdriver/config.toml
    let mut cfg = config::load_config();

    // CLI args override config file
    if let Some(uri) = cli.uri {
        cfg.provider.uri = uri;
    }
    if let Some(tenant) = cli.tenant {
        cfg.metadata.tenant_id = tenant;
    }
    if let Some(data_dir) = cli.data_dir {
        cfg.store.path = data_dir;
    }

    if let Commands::Config { action } = cli.command {
        return handle_config_command(action, &cfg);
    }

    let app = App::open(cfg).await?;

    match cli.command {
        Commands::Host { action } => match action {
            HostAction::Create {
                name,
                net,
                cpu,
                ram,
                disk,
                gpu,
                cpu_freq,
                os,
                public,
            } => {
                host::run_create(
                    &app,
                    HostCreateConfig {
                        name,
                        network: net,
                        cpu,
                        ram,
                        disk,
                        gpu,
                        cpu_freq,
                        os,
                        public,
                    },
                )
                .await?;
            }
            HostAction::Delete { names } => host::run_delete(&app, &names).await?,
            HostAction::List => host::run_list(&app).await?,
            HostAction::Inspect { name } => host::run_inspect(&app, &name).await?,
            HostAction::Start { name } => host::run_power(&app, &name, PowerAction::Start).await?,
            HostAction::Stop { name } => host::run_power(&app, &name, PowerAction::Stop).await?,
            HostAction::Reboot { name } => {
                host::run_power(&app, &name, PowerAction::Reboot).await?
            }
            HostAction::Status { name } => host::run_status(&app, &name).await?,
            HostAction::Ssh { name } => host::run_ssh_config(&app, &name).await?,
        },

        Commands::Network { action } => match action {
            NetworkAction::Create {
                name,
                cidr,
                cpu,
                ram,
                disk,
                os,
                gwname,
            } => {
                network::run_create(
                    &app,
                    NetworkCreateConfig {
                        name,
                        cidr,
                        gateway: GatewaySizing { cpu, ram, disk, os },
                        gateway_name: gwname,
                    },
                )
                .await?;
            }
            NetworkAction::Delete { names } => network::run_delete(&app, &names).await?,
            NetworkAction::List => network::run_list(&app).await?,
            NetworkAction::Inspect { name } => network::run_inspect(&app, &name).await?,
        },

        Commands::Volume { action } => match action {
            VolumeAction::Create { name, size, speed } => {
                volume::run_create(&app, &name, size, speed).await?
            }
            VolumeAction::Delete { names } => volume::run_delete(&app, &names).await?,
            VolumeAction::List => volume::run_list(&app).await?,
            VolumeAction::Inspect { name } => volume::run_inspect(&app, &name).await?,
            VolumeAction::Attach {
                volume: volume_name,
                host: host_name,
                path,
                format,
            } => {
                volume::run_attach(&app, &volume_name, &host_name, MountSpec { path, format })
                    .await?
            }
            VolumeAction::Detach {
                volume: volume_name,
                host: host_name,
            } => volume::run_detach(&app, &volume_name, &host_name).await?,
        },

        Commands::Image {
            action: ListAction::List,
        } => catalog::run_images(&app).await?,

        Commands::Template {
            action: ListAction::List,
        } => catalog::run_templates(&app).await?,

        Commands::Ssh { action } => match action {
            SshAction::Run { host, command } => ssh::run_command(&app, &host, &command).await?,
            SshAction::Copy { from, to } => ssh::run_copy(&app, &from, &to).await?,
            SshAction::Connect { host } => ssh::run_connect(&app, &host).await?,
        },

        Commands::Repair => repair::run(&app).await?,

        Commands::Config { .. } => unreachable!("handled before opening the store"),
    }

    Ok(())
}

fn handle_config_command(action: ConfigAction, cfg: &config::LocalDriverConfig) -> Result<()> {
    match action {
        ConfigAction::Show => {
            println!("{}", style("LocalDriver Configuration").bold());
            println!("{}", symbols::HLINE);
            println!();
            println!("{}", style("[provider]").cyan());
            println!("  uri               = \"{}\"", cfg.provider.uri);
            println!("  storage_pool      = \"{}\"", cfg.provider.storage_pool);
            println!("  images_catalog    = \"{}\"", cfg.provider.images_catalog.display());
            println!("  templates_catalog = \"{}\"", cfg.provider.templates_catalog.display());
            println!("  ssh_user          = \"{}\"", cfg.provider.ssh_user);
            println!();
            println!("{}", style("[metadata]").cyan());
            println!("  tenant_id         = \"{}\"", cfg.metadata.tenant_id);
            println!("  lock_timeout_secs = {}", cfg.metadata.lock_timeout_secs);
            println!("  bucket            = \"{}\"", cfg.metadata.bucket());
            println!();
            println!("{}", style("[store]").cyan());
            println!("  backend           = {:?}", cfg.store.backend);
            println!("  path              = \"{}\"", cfg.store.path.display());
            println!();
            if let Ok(path) = config::config_file_path() {
                println!(
                    "Config file: {}",
                    if path.exists() {
                        path.display().to_string()
                    } else {
                        format!("{} (not created)", path.display())
                    }
                );
            }
        }
        ConfigAction::Path => {
            let path = config::config_file_path()?;
            println!("{}", path.display());
        }
        ConfigAction::Init { force } => {
            let path = config::config_file_path()?;
            if path.exists() && !force {
                bail!(
                    "Config file already exists at {}. Use --force to overwrite.",
                    path.display()
                );
            }
            config::save_config(&config::LocalDriverConfig::default())?;
            println!(
                "{} Created config file: {}",
                style(symbols::CHECK).green(),
                path.display()
            );
        }
    }
    Ok(())
}
