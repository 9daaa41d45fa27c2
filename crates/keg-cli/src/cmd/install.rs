//! Install command

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use crossterm::style::Stylize;
use keg_core::pipeline::{InstallOutcome, Plan};
use keg_core::{Paths, Pipeline, PipelineOptions};
use keg_schema::Platform;

use super::{http_client, load_descriptor, stage_failed};
use crate::ui::ConsoleReporter;

/// Exit status for "installed, but the smoke test failed".
pub const EXIT_VERIFICATION_FAILED: u8 = 3;

/// Flags of `keg install`.
#[derive(Debug, Clone)]
pub struct InstallArgs {
    pub platform: Option<Platform>,
    pub dry_run: bool,
    pub retries: u32,
    pub test_timeout: u64,
}

/// Run the full pipeline for one descriptor.
pub async fn install(paths: &Paths, descriptor: &Path, args: &InstallArgs, quiet: bool) -> Result<ExitCode> {
    let descriptor = load_descriptor(descriptor)?;

    let options = PipelineOptions {
        platform: args.platform.unwrap_or_else(Platform::current),
        fetch_retries: args.retries,
        test_timeout: Duration::from_secs(args.test_timeout),
        dry_run: args.dry_run,
        ..PipelineOptions::default()
    };

    let pipeline = Pipeline::new(http_client()?, paths.clone(), options)
        .with_reporter(Arc::new(ConsoleReporter::new(quiet)));

    let outcome = pipeline
        .run(&descriptor)
        .await
        .map_err(|err| stage_failed(err, &descriptor))?;

    Ok(report_outcome(&outcome))
}

pub(crate) fn report_outcome(outcome: &InstallOutcome) -> ExitCode {
    match outcome {
        InstallOutcome::Installed(report) => {
            for link in &report.linked {
                tracing::debug!(link = %link.display(), "Linked");
            }
            ExitCode::SUCCESS
        }
        InstallOutcome::VerificationFailed { report, error } => {
            eprintln!(
                "{} {} {} is installed at {} but failed verification:\n{error}",
                "error:".red().bold(),
                report.receipt.name,
                report.receipt.version,
                report.prefix.display()
            );
            ExitCode::from(EXIT_VERIFICATION_FAILED)
        }
        InstallOutcome::Planned(plan) => {
            print_plan(plan);
            ExitCode::SUCCESS
        }
    }
}

fn print_plan(plan: &Plan) {
    println!("{} {} ({})", plan.name.as_str().bold(), plan.version, plan.platform);
    println!("  variant   {}", plan.variant);
    println!("  url       {}", plan.url);
    println!("  sha256    {}", plan.sha256);
    if let Some(dep) = &plan.build_dep {
        println!("  build dep {dep}");
    }
    println!("  prefix    {}", plan.prefix.display());
    println!("  cached    {}", if plan.cached { "yes" } else { "no" });
    println!("  install:");
    for step in &plan.install_steps {
        println!("    {step}");
    }
    println!("  test:");
    for step in &plan.test_steps {
        println!("    {step}");
    }
}
