//! Hash command

use std::path::PathBuf;

use anyhow::{Context, Result};
use keg_core::io::hash::sha256_file;

/// Compute SHA256 hash of files
pub fn hash(files: &[PathBuf]) -> Result<()> {
    for file in files {
        let digest =
            sha256_file(file).with_context(|| format!("Failed to read {}", file.display()))?;
        println!("{digest}  {}", file.display());
    }
    Ok(())
}
