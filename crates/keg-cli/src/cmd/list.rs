//! List command

use anyhow::{Context, Result};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::{Cell, Table};
use keg_core::Paths;
use keg_core::receipt::ReceiptStore;

/// List installed packages from their receipts
pub fn list(paths: &Paths) -> Result<()> {
    let receipts = ReceiptStore::new(paths.receipts())
        .list()
        .context("Failed to read install receipts")?;

    if receipts.is_empty() {
        println!();
        println!("  No packages installed.");
        println!("  Run 'keg install <descriptor.toml>' to get started.");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .set_header(vec!["Name", "Version", "Platform", "Installed", "Verified"]);

    for r in &receipts {
        let date = chrono::DateTime::from_timestamp(r.installed_at, 0)
            .unwrap_or_default()
            .format("%Y-%m-%d")
            .to_string();
        table.add_row(vec![
            Cell::new(&r.name),
            Cell::new(&r.version),
            Cell::new(r.platform),
            Cell::new(date),
            Cell::new(if r.verified { "yes" } else { "no" }),
        ]);
    }

    println!("{table}");
    println!("{} package(s)", receipts.len());
    Ok(())
}
