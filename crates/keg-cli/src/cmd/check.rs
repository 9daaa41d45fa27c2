//! Check command

use std::path::PathBuf;

use anyhow::{Result, bail};
use crossterm::style::Stylize;
use keg_core::PackageDescriptor;

/// Load and validate each descriptor, reporting every failure.
pub fn check(paths: &[PathBuf], quiet: bool) -> Result<()> {
    let mut failed = 0usize;

    for path in paths {
        let result = PackageDescriptor::from_file(path).and_then(|d| d.validate().map(|()| d));
        match result {
            Ok(d) => {
                if !quiet {
                    println!(
                        "{} {} ({} {}, {} source(s))",
                        "ok".green(),
                        path.display(),
                        d.name(),
                        d.version(),
                        d.sources.len()
                    );
                }
            }
            Err(e) => {
                failed += 1;
                eprintln!("{} {}: {e}", "invalid".red().bold(), path.display());
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} descriptor(s) failed validation", paths.len());
    }
    Ok(())
}
