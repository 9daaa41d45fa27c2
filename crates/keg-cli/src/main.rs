//! keg - install packages from versioned TOML descriptors

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use keg_cli::cmd;
use keg_cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let quiet = cli.quiet;

    match &cli.command {
        Commands::Install {
            descriptor,
            platform,
            dry_run,
            retries,
            test_timeout,
        } => {
            let opts = cmd::install::InstallArgs {
                platform: *platform,
                dry_run: *dry_run,
                retries: *retries,
                test_timeout: *test_timeout,
            };
            cmd::install::install(&cli.paths()?, descriptor, &opts, quiet).await
        }
        Commands::Check { descriptors } => cmd::check::check(descriptors, quiet).map(ok),
        Commands::Resolve {
            descriptor,
            platform,
        } => cmd::resolve::resolve(descriptor, *platform).map(ok),
        Commands::Test {
            descriptor,
            test_timeout,
        } => cmd::test::test(&cli.paths()?, descriptor, *test_timeout, quiet),
        Commands::Formula { descriptor, output } => {
            cmd::formula::formula(descriptor, output.as_deref()).map(ok)
        }
        Commands::Hash { files } => cmd::hash::hash(files).map(ok),
        Commands::List => cmd::list::list(&cli.paths()?).map(ok),
        Commands::Completions { shell } => {
            cmd::completions::completions(*shell);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn ok(_: ()) -> ExitCode {
    ExitCode::SUCCESS
}
