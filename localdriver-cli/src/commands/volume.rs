//! Volume Commands

use crate::app::App;
use crate::symbols;
use anyhow::{bail, Context, Result};
use chrono::Utc;
use console::style;
use localdriver_core::props::{VolumeAttachedV1, VolumeDescriptionV1};
use localdriver_core::{Volume, VolumeRequest, VolumeSpeed};
use localdriver_metadata::volume::{list_volumes, load_volume, remove_volume, save_volume};
use localdriver_metadata::{AttachmentInfo, MountSpec, VolumeAttacher};
use localdriver_provider::RemoteExecutor;
use tracing::{info, warn};

/// Parse a speed class given on the command line
pub fn parse_speed(value: &str) -> std::result::Result<VolumeSpeed, String> {
    match value.to_ascii_lowercase().as_str() {
        "cold" => Ok(VolumeSpeed::Cold),
        "hdd" => Ok(VolumeSpeed::Hdd),
        "ssd" => Ok(VolumeSpeed::Ssd),
        other => Err(format!("unknown speed '{}', expected cold, hdd or ssd", other)),
    }
}

async fn require_volume(app: &App, reference: &str) -> Result<Volume> {
    load_volume(&app.metadata, reference)
        .await?
        .and_then(|item| item.into_inner())
        .with_context(|| format!("Volume '{}' not found", reference))
}

/// Create a volume and record it
pub async fn create_volume(app: &App, name: &str, size: u32, speed: VolumeSpeed) -> Result<Volume> {
    let ctx = &app.metadata;
    if load_volume(ctx, name).await?.is_some() {
        bail!("Volume '{}' already exists", name);
    }

    let mut volume = app
        .hypervisor()
        .create_volume(VolumeRequest {
            name: name.to_string(),
            size,
            speed,
        })
        .await
        .with_context(|| format!("Failed to create volume '{}'", name))?;
    volume.properties.set(&VolumeDescriptionV1 {
        created: Some(Utc::now()),
        ..Default::default()
    })?;

    if let Err(e) = save_volume(ctx, &volume).await {
        if let Err(cleanup) = app.hypervisor().delete_volume(&volume.id).await {
            warn!(volume = %volume.name, error = %cleanup, "Failed to delete volume");
        }
        return Err(e).context("Failed to record volume metadata");
    }
    info!(volume = %volume.name, id = %volume.id, size, "Created volume");
    Ok(volume)
}

/// Run volume create command
pub async fn run_create(app: &App, name: &str, size: u32, speed: VolumeSpeed) -> Result<()> {
    let volume = create_volume(app, name, size, speed).await?;
    println!(
        "{} Volume {} created ({} GB)",
        style(symbols::CHECK).green(),
        style(&volume.name).cyan(),
        volume.size
    );
    println!("  ID: {}", volume.id);
    Ok(())
}

/// Delete a volume that is attached nowhere
pub async fn delete_volume(app: &App, reference: &str) -> Result<()> {
    let volume = require_volume(app, reference).await?;
    let attached: VolumeAttachedV1 = volume.properties.get()?;
    if !attached.hosts.is_empty() {
        let hosts: Vec<&str> = attached.hosts.values().map(String::as_str).collect();
        bail!(
            "Volume '{}' is still attached to: {}",
            volume.name,
            hosts.join(", ")
        );
    }

    match app.hypervisor().delete_volume(&volume.id).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => {
            warn!(volume = %volume.name, "Volume already gone from hypervisor");
        }
        Err(e) => return Err(e).context("Failed to delete volume"),
    }
    remove_volume(&app.metadata, &volume).await?;
    info!(volume = %volume.name, "Deleted volume");
    Ok(())
}

/// Run volume delete command
pub async fn run_delete(app: &App, names: &[String]) -> Result<()> {
    for name in names {
        delete_volume(app, name).await?;
        println!("{} Volume {} deleted", style(symbols::CHECK).green(), style(name).cyan());
    }
    Ok(())
}

/// Run volume list command
pub async fn run_list(app: &App) -> Result<()> {
    let volumes = list_volumes(&app.metadata).await?;
    if volumes.is_empty() {
        println!("{} No volumes found", style("Info:").cyan());
        return Ok(());
    }

    println!(
        "{:<24} {:>8} {:<6} {:<24} {}",
        style("NAME").bold(),
        style("SIZE").bold(),
        style("SPEED").bold(),
        style("ATTACHED TO").bold(),
        style("ID").bold()
    );
    for volume in &volumes {
        let attached: VolumeAttachedV1 = volume.properties.get()?;
        let hosts: Vec<&str> = attached.hosts.values().map(String::as_str).collect();
        println!(
            "{:<24} {:>5} GB {:<6} {:<24} {}",
            volume.name,
            volume.size,
            format!("{:?}", volume.speed).to_lowercase(),
            if hosts.is_empty() { "-".to_string() } else { hosts.join(",") },
            volume.id
        );
    }
    Ok(())
}

/// Run volume inspect command
pub async fn run_inspect(app: &App, reference: &str) -> Result<()> {
    let volume = require_volume(app, reference).await?;
    println!("{}", serde_json::to_string_pretty(&volume)?);
    Ok(())
}

/// Attach a volume, running guest commands through `executor`
pub async fn attach_with(
    app: &App,
    executor: &dyn RemoteExecutor,
    volume: &str,
    host: &str,
    spec: &MountSpec,
) -> Result<AttachmentInfo> {
    let attacher = VolumeAttacher::new(&app.metadata, app.hypervisor(), executor);
    attacher
        .attach(volume, host, spec)
        .await
        .with_context(|| format!("Failed to attach volume '{}' to host '{}'", volume, host))
}

/// Detach a volume, running guest commands through `executor`
pub async fn detach_with(
    app: &App,
    executor: &dyn RemoteExecutor,
    volume: &str,
    host: &str,
) -> Result<()> {
    let attacher = VolumeAttacher::new(&app.metadata, app.hypervisor(), executor);
    attacher
        .detach(volume, host)
        .await
        .with_context(|| format!("Failed to detach volume '{}' from host '{}'", volume, host))
}

/// Run volume attach command
pub async fn run_attach(app: &App, volume: &str, host: &str, spec: MountSpec) -> Result<()> {
    let executor = app.executor(host).await?;
    let info = attach_with(app, &executor, volume, host, &spec).await?;
    println!(
        "{} Volume {} attached to {} as {}, mounted on {}",
        style(symbols::CHECK).green(),
        style(volume).cyan(),
        style(host).cyan(),
        info.device,
        info.path
    );
    Ok(())
}

/// Run volume detach command
pub async fn run_detach(app: &App, volume: &str, host: &str) -> Result<()> {
    let executor = app.executor(host).await?;
    detach_with(app, &executor, volume, host).await?;
    println!(
        "{} Volume {} detached from {}",
        style(symbols::CHECK).green(),
        style(volume).cyan(),
        style(host).cyan()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::memory_app;
    use crate::commands::host::{create_host, delete_host, HostCreateConfig};

    fn host_config(name: &str) -> HostCreateConfig {
        HostCreateConfig {
            name: name.to_string(),
            network: None,
            cpu: 1,
            ram: 1.0,
            disk: 16,
            gpu: 0,
            cpu_freq: 0.0,
            os: "ubuntu-18.04".to_string(),
            public: false,
        }
    }

    #[test]
    fn test_parse_speed() {
        assert_eq!(parse_speed("SSD").unwrap(), VolumeSpeed::Ssd);
        assert_eq!(parse_speed("cold").unwrap(), VolumeSpeed::Cold);
        assert!(parse_speed("fast").is_err());
    }

    #[tokio::test]
    async fn test_create_records_description() {
        let (app, _hv) = memory_app().await;
        create_volume(&app, "data", 10, VolumeSpeed::Ssd).await.unwrap();

        let volume = require_volume(&app, "data").await.unwrap();
        assert_eq!(volume.speed, VolumeSpeed::Ssd);
        let description: VolumeDescriptionV1 = volume.properties.get().unwrap();
        assert!(description.created.is_some());

        assert!(create_volume(&app, "data", 10, VolumeSpeed::Hdd).await.is_err());
    }

    #[tokio::test]
    async fn test_attached_volume_and_host_are_protected() {
        let (app, hv) = memory_app().await;
        let host = create_host(&app, &host_config("web")).await.unwrap();
        create_volume(&app, "data", 10, VolumeSpeed::Hdd).await.unwrap();
        let shell = hv.shell(&host.id);

        let info = attach_with(&app, &shell, "data", "web", &MountSpec::default())
            .await
            .unwrap();
        assert_eq!(info.device, "/dev/vdb");

        let err = delete_volume(&app, "data").await.unwrap_err();
        assert!(err.to_string().contains("web"));
        let err = delete_host(&app, "web").await.unwrap_err();
        assert!(err.to_string().contains("data"));

        detach_with(&app, &shell, "data", "web").await.unwrap();
        delete_volume(&app, "data").await.unwrap();
        delete_host(&app, "web").await.unwrap();
    }
}
