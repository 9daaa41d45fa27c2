//! Reporter trait for dependency injection
//!
//! This trait allows the pipeline to report progress and status without
//! being coupled to a specific terminal implementation.

use keg_schema::{PackageName, Sha256Digest, Version};

/// Sink for user-facing pipeline progress.
pub trait Reporter: Send + Sync {
    /// Indicates a new stage has started (e.g. "Fetching", "Installing").
    fn section(&self, title: &str);

    /// Updates the progress of a download.
    fn downloading(&self, name: &PackageName, version: &Version, current: u64, total: Option<u64>);

    /// The artifact's hash matched the descriptor.
    fn verified(&self, name: &PackageName, version: &Version, digest: &Sha256Digest);

    /// An install step is about to run.
    fn installing(&self, name: &PackageName, version: &Version, step: &str);

    /// A smoke test step is about to run.
    fn testing(&self, name: &PackageName, version: &Version, step: &str);

    /// Marks a package operation as successfully completed.
    fn done(&self, name: &PackageName, version: &Version, detail: &str);

    /// Marks a package operation as failed with a specific reason.
    fn failed(&self, name: &PackageName, version: &Version, reason: &str);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn section(&self, title: &str) {
        (**self).section(title);
    }
    fn downloading(&self, name: &PackageName, version: &Version, current: u64, total: Option<u64>) {
        (**self).downloading(name, version, current, total);
    }
    fn verified(&self, name: &PackageName, version: &Version, digest: &Sha256Digest) {
        (**self).verified(name, version, digest);
    }
    fn installing(&self, name: &PackageName, version: &Version, step: &str) {
        (**self).installing(name, version, step);
    }
    fn testing(&self, name: &PackageName, version: &Version, step: &str) {
        (**self).testing(name, version, step);
    }
    fn done(&self, name: &PackageName, version: &Version, detail: &str) {
        (**self).done(name, version, detail);
    }
    fn failed(&self, name: &PackageName, version: &Version, reason: &str) {
        (**self).failed(name, version, reason);
    }
    fn info(&self, msg: &str) {
        (**self).info(msg);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
}

/// A no-op reporter for silent operations (e.g., verification, testing).
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn section(&self, _: &str) {}
    fn downloading(&self, _: &PackageName, _: &Version, _: u64, _: Option<u64>) {}
    fn verified(&self, _: &PackageName, _: &Version, _: &Sha256Digest) {}
    fn installing(&self, _: &PackageName, _: &Version, _: &str) {}
    fn testing(&self, _: &PackageName, _: &Version, _: &str) {}
    fn done(&self, _: &PackageName, _: &Version, _: &str) {}
    fn failed(&self, _: &PackageName, _: &Version, _: &str) {}
    fn info(&self, _: &str) {}
    fn warning(&self, _: &str) {}
}
