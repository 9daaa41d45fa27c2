//! CLI subcommands

pub mod check;
pub mod completions;
pub mod formula;
pub mod hash;
pub mod install;
pub mod list;
pub mod resolve;

use std::path::Path;

use anyhow::{Context, Result};
use keg_core::{PackageDescriptor, PipelineError};

/// Load a descriptor, naming the file in any error.
pub fn load_descriptor(path: &Path) -> Result<PackageDescriptor> {
    PackageDescriptor::from_file(path)
        .with_context(|| format!("Failed to load descriptor {}", path.display()))
}

/// HTTP client shared by commands that fetch.
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(keg_core::USER_AGENT)
        .connect_timeout(std::time::Duration::from_secs(30))
        .build()
        .context("Failed to build HTTP client")
}

/// Attach the failing pipeline stage to `err`.
pub(crate) fn stage_failed(err: PipelineError, descriptor: &PackageDescriptor) -> anyhow::Error {
    let stage = err.stage();
    anyhow::Error::new(err).context(format!(
        "{stage} stage failed for {} {}",
        descriptor.name(),
        descriptor.version()
    ))
}
