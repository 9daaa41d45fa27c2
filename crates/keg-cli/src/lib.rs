//! keg - install packages from versioned TOML descriptors
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
//!
//! # Overview
//!
//! A descriptor names one release of one tool: where to download it for
//! each platform, the SHA-256 the download must have, how to install it and
//! how to check that the install works. `keg install` runs that pipeline;
//! the other commands inspect descriptors and installs.
//!
//! # Directory Layout
//!
//! ```text
//! ~/.keg/
//! ├── bin/                      # Symlinks to installed binaries
//! ├── Cellar/<name>/<version>/  # Install prefixes
//! ├── cache/                    # Verified artifacts
//! ├── receipts/                 # One JSON receipt per install
//! └── tmp/                      # Staging
//! ```

pub mod cmd;
pub mod ui;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use keg_core::Paths;
use keg_schema::Platform;

pub use keg_core::USER_AGENT;

#[derive(Debug, Parser)]
#[command(name = "keg")]
#[command(author, version, about = "keg - install packages from versioned TOML descriptors")]
pub struct Cli {
    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// keg home directory
    #[arg(long, global = true, env = "KEG_HOME")]
    pub home: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Resolve the keg home from `--home`/`KEG_HOME`, else `~/.keg`.
    pub fn paths(&self) -> Result<Paths> {
        match &self.home {
            Some(home) => Ok(Paths::new(home)),
            None => Paths::from_env().context("Could not determine home directory; set KEG_HOME"),
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Resolve, fetch, verify, install and test a descriptor
    Install {
        /// Path to the descriptor
        descriptor: PathBuf,
        /// Platform to resolve for (intel-mac, arm-mac, intel-linux, arm-linux)
        #[arg(long, env = "KEG_PLATFORM")]
        platform: Option<Platform>,
        /// Show what would happen without making changes
        #[arg(long)]
        dry_run: bool,
        /// Extra download attempts after a transient failure
        #[arg(long, env = "KEG_FETCH_RETRIES", default_value_t = 2)]
        retries: u32,
        /// Per-step smoke test timeout in seconds
        #[arg(long, env = "KEG_TEST_TIMEOUT", default_value_t = 120)]
        test_timeout: u64,
    },
    /// Validate descriptors
    Check {
        /// Descriptor files
        #[arg(required = true)]
        descriptors: Vec<PathBuf>,
    },
    /// Show which source variant a platform would use
    Resolve {
        /// Path to the descriptor
        descriptor: PathBuf,
        /// Platform to resolve for
        #[arg(long, env = "KEG_PLATFORM")]
        platform: Option<Platform>,
    },
    /// Re-run the smoke test of an installed descriptor
    Test {
        /// Path to the descriptor
        descriptor: PathBuf,
        /// Per-step smoke test timeout in seconds
        #[arg(long, env = "KEG_TEST_TIMEOUT", default_value_t = 120)]
        test_timeout: u64,
    },
    /// Render a Homebrew formula for a descriptor
    Formula {
        /// Path to the descriptor
        descriptor: PathBuf,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Compute SHA256 hash of a file (for descriptor authoring)
    Hash {
        /// Files to hash
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// List installed packages
    List,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}
