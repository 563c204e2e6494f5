//! Repair Command
//!
//! Re-aligns network memberships, gateway pointers and volume attachments
//! with the host records.

use crate::app::App;
use crate::symbols;
use anyhow::{Context, Result};
use console::style;
use localdriver_metadata::reconcile;

/// Run repair command
pub async fn run(app: &App) -> Result<()> {
    let report = reconcile(&app.metadata)
        .await
        .context("Failed to repair metadata")?;

    if report.is_clean() {
        println!("{} Metadata is consistent", style(symbols::CHECK).green());
    } else {
        println!("{} Metadata repaired", style(symbols::CHECK).green());
        println!("  Network members pruned: {}", report.pruned_network_hosts);
        println!("  Gateways cleared:       {}", report.cleared_gateways);
        println!("  Volume edges removed:   {}", report.removed_volume_edges);
        println!("  Volume edges added:     {}", report.added_volume_edges);
    }
    for note in &report.notes {
        println!("{} {}", style(symbols::WARN).yellow(), note);
    }
    Ok(())
}
