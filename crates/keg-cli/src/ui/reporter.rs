//! Console reporter
//!
//! Line-oriented progress on stderr, so stdout stays clean for command
//! output (`keg formula`, `keg hash`).

use crossterm::style::Stylize;
use keg_core::Reporter;
use keg_schema::{PackageName, Sha256Digest, Version};

/// Writes pipeline progress to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleReporter {
    quiet: bool,
}

impl ConsoleReporter {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

impl Reporter for ConsoleReporter {
    fn section(&self, title: &str) {
        if !self.quiet {
            eprintln!("{} {}", "==>".blue().bold(), title.bold());
        }
    }

    fn downloading(&self, name: &PackageName, version: &Version, current: u64, total: Option<u64>) {
        if self.quiet || current != 0 {
            return;
        }
        let size = total.map(|t| format!(" ({})", format_size(t))).unwrap_or_default();
        eprintln!("    {} {name} {version}{size}", "fetching".dim());
    }

    fn verified(&self, _name: &PackageName, _version: &Version, digest: &Sha256Digest) {
        if !self.quiet {
            eprintln!("    {} sha256 {}", "verified".green(), digest.as_str().dim());
        }
    }

    fn installing(&self, _name: &PackageName, _version: &Version, step: &str) {
        if !self.quiet {
            eprintln!("    {} {step}", "$".dim());
        }
    }

    fn testing(&self, _name: &PackageName, _version: &Version, step: &str) {
        if !self.quiet {
            eprintln!("    {} {step}", "$".dim());
        }
    }

    fn done(&self, name: &PackageName, version: &Version, detail: &str) {
        eprintln!("{} {} {} {}", "✓".green().bold(), name.as_str().bold(), version, detail.dim());
    }

    fn failed(&self, name: &PackageName, version: &Version, reason: &str) {
        eprintln!("{} {} {} {}", "✗".red().bold(), name.as_str().bold(), version, reason.red());
    }

    fn info(&self, msg: &str) {
        if !self.quiet {
            eprintln!("    {msg}");
        }
    }

    fn warning(&self, msg: &str) {
        eprintln!("{} {msg}", "warning:".yellow().bold());
    }
}
