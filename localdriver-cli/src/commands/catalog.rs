//! Image and template listings

use crate::app::App;
use anyhow::{Context, Result};
use console::style;
use localdriver_provider::rank_drf;

/// Run image list command
pub async fn run_images(app: &App) -> Result<()> {
    let images = app
        .hypervisor()
        .list_images()
        .await
        .context("Failed to list images")?;
    if images.is_empty() {
        println!("{} No images found", style("Info:").cyan());
        return Ok(());
    }

    println!("{:<24} {}", style("ID").bold(), style("NAME").bold());
    for image in &images {
        println!("{:<24} {}", image.id, image.name);
    }
    Ok(())
}

/// Run template list command, cheapest first
pub async fn run_templates(app: &App) -> Result<()> {
    let mut templates = app
        .hypervisor()
        .list_templates()
        .await
        .context("Failed to list templates")?;
    if templates.is_empty() {
        println!("{} No templates found", style("Info:").cyan());
        return Ok(());
    }
    templates.sort_by(|a, b| rank_drf(&a.size).total_cmp(&rank_drf(&b.size)));

    println!(
        "{:<16} {:>5} {:>8} {:>8} {:>4}",
        style("NAME").bold(),
        style("CPU").bold(),
        style("RAM").bold(),
        style("DISK").bold(),
        style("GPU").bold()
    );
    for template in &templates {
        println!(
            "{:<16} {:>5} {:>5} GB {:>5} GB {:>4}",
            template.name,
            template.size.cores,
            template.size.ram_size,
            template.size.disk_size,
            template.size.gpu_number
        );
    }
    Ok(())
}
