//! Resolve command

use std::path::Path;

use anyhow::{Context, Result};
use keg_core::descriptor::expected_digest;
use keg_core::resolver::select_variant;
use keg_schema::Platform;

use super::load_descriptor;

/// Print the variant `platform` would install.
pub fn resolve(descriptor: &Path, platform: Option<Platform>) -> Result<()> {
    let d = load_descriptor(descriptor)?;
    d.validate()
        .with_context(|| format!("{} is not a valid descriptor", descriptor.display()))?;

    let platform = platform.unwrap_or_else(Platform::current);
    let variant = select_variant(&d.sources, platform)?;

    println!("platform  {platform}");
    println!("variant   {}", variant.label());
    println!("url       {}", variant.url);
    println!("sha256    {}", expected_digest(variant)?);
    if let Some(dep) = &variant.build_dep {
        println!("build dep {dep}");
    }
    Ok(())
}
