//! Formula command

use std::path::Path;

use anyhow::{Context, Result};
use keg_core::formula::FormulaRenderer;

use super::load_descriptor;

/// Render a Homebrew formula to stdout or `output`.
pub fn formula(descriptor: &Path, output: Option<&Path>) -> Result<()> {
    let d = load_descriptor(descriptor)?;
    d.validate()
        .with_context(|| format!("{} is not a valid descriptor", descriptor.display()))?;

    let rendered = FormulaRenderer.render(&d)?;
    match output {
        Some(path) => std::fs::write(path, rendered)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => print!("{rendered}"),
    }
    Ok(())
}
