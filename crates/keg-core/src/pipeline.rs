//! Install Pipeline Typestate Pattern
//!
//! Models one install as a series of explicit state transitions:
//!
//! ```text
//! PackageDescriptor --[Pipeline::resolve()]--> Resolved --[fetch()]--> Verified
//!                   --[install()]--> Installed --[test()]--> InstallOutcome
//! ```
//!
//! Nothing can be extracted before its digest has been checked, and nothing
//! is promoted into the Cellar before every install step has succeeded. Every
//! stage but the last is terminal on failure; a failing smoke test leaves the
//! install in place and is reported as [`InstallOutcome::VerificationFailed`].
//!
//! # Usage
//!
//! ```ignore
//! let pipeline = Pipeline::new(client, paths, PipelineOptions::default());
//! let outcome = pipeline.run(&descriptor).await?;
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use thiserror::Error;

use keg_schema::{PackageName, Platform, Sha256Digest, Version};

use crate::descriptor::{DescriptorError, PackageDescriptor, SourceVariant, expected_digest};
use crate::install::{
    InstallError, InstallExecutor, check_build_dependency, installed_files, link_binaries, promote,
};
use crate::io::download::{DownloadError, FetchRequest};
use crate::io::extract::{ArchiveFormat, extract, working_root};
use crate::io::hash::sha256_file;
use crate::receipt::{Receipt, ReceiptError, ReceiptStore};
use crate::resolver::{ResolveError, select_variant};
use crate::smoke::{DEFAULT_TIMEOUT, SmokeTestError, SmokeTestRunner};
use crate::template::StepContext;
use crate::{NullReporter, Paths, Reporter, filename_from_url};

/// Pipeline stage an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Descriptor validation.
    Validate,
    /// Source variant selection.
    Resolve,
    /// Artifact download.
    Fetch,
    /// Digest comparison.
    Verify,
    /// Extraction, install steps and promotion.
    Install,
    /// Smoke test.
    Test,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Validate => "validate",
            Self::Resolve => "resolve",
            Self::Fetch => "fetch",
            Self::Verify => "verify",
            Self::Install => "install",
            Self::Test => "test",
        })
    }
}

/// Terminal pipeline failures.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The descriptor failed to load or validate.
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(#[from] DescriptorError),

    /// No source variant applies to the platform.
    #[error(transparent)]
    NoMatchingVariant(#[from] ResolveError),

    /// The artifact could not be downloaded.
    #[error("failed to fetch {url} after {attempts} attempt(s): {source}")]
    DownloadFailure {
        /// Artifact URL.
        url: String,
        /// Attempts made, including the first.
        attempts: u32,
        /// Last error.
        #[source]
        source: DownloadError,
    },

    /// The artifact's digest differs from the descriptor's.
    #[error("integrity check failed for {url}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        /// Artifact URL.
        url: String,
        /// Declared digest.
        expected: Sha256Digest,
        /// Digest of the received bytes.
        actual: Sha256Digest,
    },

    /// A source variant's toolchain is not installed.
    #[error("build dependency '{name}' not found (looked for '{probe}' on PATH)")]
    MissingBuildDependency {
        /// Dependency as declared.
        name: String,
        /// Executable that was probed.
        probe: String,
    },

    /// Extraction or an install step failed; nothing was promoted.
    #[error("install failed: {0}")]
    InstallStepFailure(#[source] InstallError),

    /// The same version is already installed from a different artifact.
    #[error(
        "{name} {version} is already installed from a different artifact \
         (recorded {recorded}, descriptor says {incoming}); publish a new version instead"
    )]
    VersionConflict {
        /// Package name.
        name: PackageName,
        /// Package version.
        version: Version,
        /// Digest in the existing receipt.
        recorded: Sha256Digest,
        /// Digest in the descriptor.
        incoming: Sha256Digest,
    },

    /// `retest` was asked about a version that has no receipt or prefix.
    #[error("{name} {version} is not installed")]
    NotInstalled {
        /// Package name.
        name: PackageName,
        /// Package version.
        version: Version,
    },

    /// Filesystem error in the artifact cache.
    #[error("artifact cache error: {0}")]
    CacheIo(#[source] std::io::Error),

    /// Filesystem error in the keg home.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Receipt store error.
    #[error(transparent)]
    Receipt(#[from] ReceiptError),
}

impl From<InstallError> for PipelineError {
    fn from(err: InstallError) -> Self {
        match err {
            InstallError::MissingBuildDependency { name, probe } => {
                Self::MissingBuildDependency { name, probe }
            }
            other => Self::InstallStepFailure(other),
        }
    }
}

impl PipelineError {
    /// The stage that failed.
    pub fn stage(&self) -> Stage {
        match self {
            Self::InvalidDescriptor(_) => Stage::Validate,
            Self::NoMatchingVariant(_) => Stage::Resolve,
            Self::DownloadFailure { .. } | Self::CacheIo(_) => Stage::Fetch,
            Self::IntegrityMismatch { .. } => Stage::Verify,
            Self::MissingBuildDependency { .. }
            | Self::InstallStepFailure(_)
            | Self::VersionConflict { .. }
            | Self::Io(_)
            | Self::Receipt(_) => Stage::Install,
            Self::NotInstalled { .. } => Stage::Test,
        }
    }
}

/// Knobs for one pipeline.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Platform to resolve for.
    pub platform: Platform,
    /// Extra download attempts after a retryable failure.
    pub fetch_retries: u32,
    /// Delay before the first retry; doubles each attempt.
    pub retry_backoff: Duration,
    /// Per-step smoke test timeout.
    pub test_timeout: Duration,
    /// Resolve and report the plan without touching disk or network.
    pub dry_run: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            platform: Platform::current(),
            fetch_retries: 2,
            retry_backoff: Duration::from_millis(500),
            test_timeout: DEFAULT_TIMEOUT,
            dry_run: false,
        }
    }
}

/// What an install would do, as reported by a dry run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Package name.
    pub name: PackageName,
    /// Package version.
    pub version: Version,
    /// Platform resolved for.
    pub platform: Platform,
    /// Label of the selected variant.
    pub variant: String,
    /// Artifact URL.
    pub url: String,
    /// Expected digest.
    pub sha256: Sha256Digest,
    /// Build dependency, for source variants.
    pub build_dep: Option<String>,
    /// Final install prefix.
    pub prefix: PathBuf,
    /// Whether a verified artifact is already cached.
    pub cached: bool,
    /// Install steps, unexpanded.
    pub install_steps: Vec<String>,
    /// Test steps, unexpanded.
    pub test_steps: Vec<String>,
}

/// Summary of a completed install.
#[derive(Debug, Clone)]
pub struct InstallReport {
    /// The receipt that was written.
    pub receipt: Receipt,
    /// Final install prefix.
    pub prefix: PathBuf,
    /// Links created in the keg `bin` directory.
    pub linked: Vec<PathBuf>,
    /// Whether the artifact came from the cache.
    pub cached: bool,
}

/// Result of a pipeline that got past the install stage, or of a dry run.
#[derive(Debug, Clone)]
pub enum InstallOutcome {
    /// Installed and the smoke test passed.
    Installed(InstallReport),
    /// Installed, but the smoke test failed.
    VerificationFailed {
        /// The install that was kept.
        report: InstallReport,
        /// Why verification failed.
        error: SmokeTestError,
    },
    /// Dry run: nothing was changed.
    Planned(Plan),
}

impl InstallOutcome {
    /// `true` unless verification failed.
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::VerificationFailed { .. })
    }
}

/// Drives descriptors through resolve, fetch, verify, install and test.
pub struct Pipeline {
    client: Client,
    paths: Paths,
    options: PipelineOptions,
    reporter: Arc<dyn Reporter>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("paths", &self.paths)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Create a silent pipeline rooted at `paths`.
    pub fn new(client: Client, paths: Paths, options: PipelineOptions) -> Self {
        Self {
            client,
            paths,
            options,
            reporter: Arc::new(NullReporter),
        }
    }

    /// Send progress to `reporter`.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// The keg home layout this pipeline installs into.
    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// Options in effect.
    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    fn receipts(&self) -> ReceiptStore {
        ReceiptStore::new(self.paths.receipts())
    }

    /// Run the full pipeline for `descriptor`.
    ///
    /// # Errors
    ///
    /// Returns the first terminal [`PipelineError`]. A failed smoke test is
    /// not an error; see [`InstallOutcome::VerificationFailed`].
    pub async fn run(&self, descriptor: &PackageDescriptor) -> Result<InstallOutcome, PipelineError> {
        let resolved = self.resolve(descriptor)?;

        if self.options.dry_run {
            return Ok(InstallOutcome::Planned(resolved.plan(self)));
        }

        resolved.fetch(self).await?.install(self)?.test(self)
    }

    /// Validate `descriptor` and select its variant for the configured
    /// platform.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidDescriptor`] or
    /// [`PipelineError::NoMatchingVariant`].
    pub fn resolve<'d>(&self, descriptor: &'d PackageDescriptor) -> Result<Resolved<'d>, PipelineError> {
        descriptor.validate()?;

        let platform = self.options.platform;
        self.reporter.section("Resolving");
        let variant = select_variant(&descriptor.sources, platform)?;
        let expected = expected_digest(variant)?;

        tracing::info!(
            name = %descriptor.name(),
            version = %descriptor.version(),
            %platform,
            variant = variant.label(),
            "Resolved"
        );
        self.reporter.info(&format!(
            "{} {} for {platform}: {} ({})",
            descriptor.name(),
            descriptor.version(),
            variant.url,
            variant.label()
        ));

        Ok(Resolved {
            descriptor,
            variant,
            platform,
            expected,
        })
    }

    /// Re-run the smoke test of an installed version.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NotInstalled`] if there is no receipt or
    /// prefix for the descriptor's version.
    pub fn retest(&self, descriptor: &PackageDescriptor) -> Result<InstallOutcome, PipelineError> {
        descriptor.validate()?;

        let name = descriptor.name();
        let version = descriptor.version();
        let prefix = self.paths.prefix_for(name, version);
        let store = self.receipts();

        let receipt = match store.load(name, version)? {
            Some(r) if prefix.is_dir() => r,
            _ => {
                return Err(PipelineError::NotInstalled {
                    name: name.clone(),
                    version: version.clone(),
                });
            }
        };

        let report = InstallReport {
            receipt,
            prefix,
            linked: Vec::new(),
            cached: true,
        };
        self.verify_install(descriptor, report)
    }

    fn verify_install(
        &self,
        descriptor: &PackageDescriptor,
        mut report: InstallReport,
    ) -> Result<InstallOutcome, PipelineError> {
        let name = descriptor.name();
        let version = descriptor.version();
        let ctx = StepContext::new(name.clone(), version.clone(), &report.prefix);

        self.reporter.section("Testing");
        if descriptor.test_steps().is_empty() {
            self.reporter
                .warning(&format!("{name} {version} declares no test steps"));
        }

        let result = SmokeTestRunner::new(&ctx, self.options.test_timeout)
            .run(descriptor.test_steps(), &*self.reporter);

        report.receipt.verified = result.is_ok();
        self.receipts().save(&report.receipt)?;

        match result {
            Ok(()) => {
                tracing::info!(%name, %version, prefix = %report.prefix.display(), "Installed and verified");
                self.reporter
                    .done(name, version, &report.prefix.display().to_string());
                Ok(InstallOutcome::Installed(report))
            }
            Err(error) => {
                tracing::warn!(%name, %version, %error, "Smoke test failed");
                self.reporter.failed(name, version, &error.to_string());
                Ok(InstallOutcome::VerificationFailed { report, error })
            }
        }
    }

    fn cache_path(&self, resolved: &Resolved<'_>) -> PathBuf {
        let filename = match filename_from_url(&resolved.variant.url) {
            "" => resolved.descriptor.name().as_str(),
            f => f,
        };
        self.paths
            .cache()
            .join(format!("{}-{filename}", resolved.expected))
    }

    async fn download_with_retry(&self, resolved: &Resolved<'_>, dest: &Path) -> Result<(), PipelineError> {
        let url = resolved.variant.url.as_str();
        let mut part = dest.as_os_str().to_owned();
        part.push(".part");
        let part = PathBuf::from(part);
        let max_attempts = self.options.fetch_retries + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = FetchRequest {
                client: &self.client,
                name: resolved.descriptor.name(),
                version: resolved.descriptor.version(),
                url,
                dest: &part,
                expected: &resolved.expected,
                reporter: &*self.reporter,
            }
            .execute()
            .await;

            match result {
                Ok(_) => {
                    tokio::fs::rename(&part, dest)
                        .await
                        .map_err(PipelineError::CacheIo)?;
                    return Ok(());
                }
                Err(DownloadError::HashMismatch { expected, actual }) => {
                    tracing::error!(%url, %expected, %actual, "Integrity check failed");
                    return Err(PipelineError::IntegrityMismatch {
                        url: url.to_string(),
                        expected,
                        actual,
                    });
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.options.retry_backoff * 2u32.saturating_pow(attempt - 1);
                    tracing::warn!(%url, attempt, error = %e, ?delay, "Fetch failed, retrying");
                    self.reporter.warning(&format!(
                        "fetch attempt {attempt}/{max_attempts} failed: {e}; retrying"
                    ));
                    tokio::time::sleep(delay).await;
                }
                Err(source) => {
                    return Err(PipelineError::DownloadFailure {
                        url: url.to_string(),
                        attempts: attempt,
                        source,
                    });
                }
            }
        }
    }
}

/// State 1: a validated descriptor with exactly one variant selected.
///
/// # Transitions
///
/// - [`fetch()`](Self::fetch) -> [`Verified`]
#[derive(Debug)]
pub struct Resolved<'d> {
    descriptor: &'d PackageDescriptor,
    variant: &'d SourceVariant,
    platform: Platform,
    expected: Sha256Digest,
}

impl<'d> Resolved<'d> {
    /// The selected variant.
    pub fn variant(&self) -> &'d SourceVariant {
        self.variant
    }

    /// The digest the artifact must have.
    pub fn expected(&self) -> &Sha256Digest {
        &self.expected
    }

    fn plan(&self, pipeline: &Pipeline) -> Plan {
        let d = self.descriptor;
        Plan {
            name: d.name().clone(),
            version: d.version().clone(),
            platform: self.platform,
            variant: self.variant.label().to_string(),
            url: self.variant.url.clone(),
            sha256: self.expected.clone(),
            build_dep: self.variant.build_dep.clone(),
            prefix: pipeline.paths.prefix_for(d.name(), d.version()),
            cached: pipeline.cache_path(self).is_file(),
            install_steps: d.install_steps().to_vec(),
            test_steps: d.test_steps().to_vec(),
        }
    }

    /// Obtain a verified artifact, from the cache or the network.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::IntegrityMismatch`] if the bytes do not match
    /// (never retried), or [`PipelineError::DownloadFailure`] once retries are
    /// exhausted.
    pub async fn fetch(self, pipeline: &Pipeline) -> Result<Verified<'d>, PipelineError> {
        let name = self.descriptor.name();
        let version = self.descriptor.version();
        let cache = pipeline.cache_path(&self);
        pipeline.reporter.section("Fetching");

        let mut cached = false;
        if cache.is_file() {
            let digest = sha256_file(&cache).map_err(PipelineError::CacheIo)?;
            if digest == self.expected {
                tracing::debug!(path = %cache.display(), "Cache hit");
                cached = true;
            } else {
                tracing::warn!(path = %cache.display(), %digest, "Discarding corrupt cache entry");
                std::fs::remove_file(&cache).map_err(PipelineError::CacheIo)?;
            }
        }

        if !cached {
            std::fs::create_dir_all(pipeline.paths.cache()).map_err(PipelineError::CacheIo)?;
            pipeline.download_with_retry(&self, &cache).await?;
        }

        pipeline.reporter.verified(name, version, &self.expected);
        Ok(Verified {
            resolved: self,
            artifact: cache,
            cached,
        })
    }
}

/// State 2: the artifact is on disk and matches the declared digest.
///
/// # Transitions
///
/// - [`install()`](Self::install) -> [`Installed`]
#[derive(Debug)]
pub struct Verified<'d> {
    resolved: Resolved<'d>,
    artifact: PathBuf,
    cached: bool,
}

impl<'d> Verified<'d> {
    /// Path of the verified artifact in the cache.
    pub fn artifact(&self) -> &Path {
        &self.artifact
    }

    /// Extract, run install steps in a staging prefix, then promote and link.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingBuildDependency`] before anything is
    /// run, [`PipelineError::VersionConflict`] if the version is already
    /// installed from a different artifact, or
    /// [`PipelineError::InstallStepFailure`] with nothing promoted.
    pub fn install(self, pipeline: &Pipeline) -> Result<Installed<'d>, PipelineError> {
        let descriptor = self.resolved.descriptor;
        let variant = self.resolved.variant;
        let name = descriptor.name();
        let version = descriptor.version();

        if let Some(dep) = &variant.build_dep {
            check_build_dependency(dep)?;
        }

        if let Some(existing) = pipeline.receipts().load(name, version)? {
            if existing.sha256 != self.resolved.expected {
                return Err(PipelineError::VersionConflict {
                    name: name.clone(),
                    version: version.clone(),
                    recorded: existing.sha256,
                    incoming: self.resolved.expected.clone(),
                });
            }
            tracing::info!(%name, %version, "Reinstalling identical artifact");
        }

        pipeline.paths.ensure()?;
        pipeline.reporter.section("Installing");

        let staging = tempfile::Builder::new()
            .prefix(&format!("{name}-{version}-"))
            .tempdir_in(pipeline.paths.tmp())?;
        let src_dir = staging.path().join("src");
        let staged_prefix = staging.path().join("prefix");

        let filename = filename_from_url(&variant.url);
        extract(
            &self.artifact,
            ArchiveFormat::detect(filename),
            &src_dir,
            name,
        )
        .map_err(|e| PipelineError::InstallStepFailure(e.into()))?;
        let workdir = working_root(&src_dir)?;

        let ctx = StepContext::new(name.clone(), version.clone(), &staged_prefix);
        InstallExecutor::new(&ctx, workdir, staging.path().join("install.log"))
            .run(descriptor.install_steps(), &*pipeline.reporter)?;

        let prefix = pipeline.paths.prefix_for(name, version);
        promote(&staged_prefix, &prefix)?;
        let linked = link_binaries(&prefix, &pipeline.paths.bin())?;
        let files = installed_files(&prefix);

        tracing::info!(%name, %version, prefix = %prefix.display(), files = files.len(), "Promoted");

        let receipt = Receipt {
            name: name.clone(),
            version: version.clone(),
            platform: self.resolved.platform,
            url: variant.url.clone(),
            sha256: self.resolved.expected.clone(),
            build_dep: variant.build_dep.clone(),
            installed_at: chrono::Utc::now().timestamp(),
            files,
            verified: false,
        };

        Ok(Installed {
            descriptor,
            report: InstallReport {
                receipt,
                prefix,
                linked,
                cached: self.cached,
            },
        })
    }
}

/// State 3: promoted into the Cellar and linked, not yet tested.
///
/// # Transitions
///
/// - [`test()`](Self::test) -> [`InstallOutcome`]
#[derive(Debug)]
pub struct Installed<'d> {
    descriptor: &'d PackageDescriptor,
    report: InstallReport,
}

impl Installed<'_> {
    /// Final install prefix.
    pub fn prefix(&self) -> &Path {
        &self.report.prefix
    }

    /// Run the smoke test and write the receipt.
    ///
    /// # Errors
    ///
    /// Only receipt persistence can fail here; a failing test is reported as
    /// [`InstallOutcome::VerificationFailed`].
    pub fn test(self, pipeline: &Pipeline) -> Result<InstallOutcome, PipelineError> {
        pipeline.verify_install(self.descriptor, self.report)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::io::hash::sha256_bytes;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use keg_schema::{Arch, Os};
    use mockito::Server;
    use std::sync::Mutex;

    const ARM_MAC: Platform = Platform::new(Os::MacOs, Arch::Arm64);

    fn tarball(script: &str) -> Vec<u8> {
        let enc = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(enc);
        let mut header = tar::Header::new_gnu();
        header.set_size(script.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder
            .append_data(&mut header, "brewup", script.as_bytes())
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn descriptor(url: &str, sha256: &str, extra: &str) -> PackageDescriptor {
        PackageDescriptor::parse(&format!(
            r#"
[package]
name = "brewup"
version = "0.1.0"
homepage = "https://github.com/xcrong/brewup"

[[source]]
platform = "arm-mac"
url = "{url}"
sha256 = "{sha256}"
{extra}

[install]
steps = ["bin.install brewup"]

[test]
steps = ["{{{{bin}}}}/brewup --version"]
"#
        ))
        .unwrap()
    }

    fn pipeline(home: &Path) -> Pipeline {
        Pipeline::new(
            Client::new(),
            Paths::new(home),
            PipelineOptions {
                platform: ARM_MAC,
                retry_backoff: Duration::from_millis(1),
                test_timeout: Duration::from_secs(10),
                ..Default::default()
            },
        )
    }

    #[derive(Default)]
    struct Recording(Mutex<Vec<String>>);

    impl Recording {
        fn events(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
        fn push(&self, e: String) {
            self.0.lock().unwrap().push(e);
        }
    }

    impl Reporter for Recording {
        fn section(&self, title: &str) {
            self.push(format!("section:{title}"));
        }
        fn downloading(&self, _: &PackageName, _: &Version, _: u64, _: Option<u64>) {}
        fn verified(&self, _: &PackageName, _: &Version, _: &Sha256Digest) {
            self.push("verified".into());
        }
        fn installing(&self, _: &PackageName, _: &Version, step: &str) {
            self.push(format!("install:{step}"));
        }
        fn testing(&self, _: &PackageName, _: &Version, step: &str) {
            self.push(format!("test:{step}"));
        }
        fn done(&self, _: &PackageName, _: &Version, _: &str) {
            self.push("done".into());
        }
        fn failed(&self, _: &PackageName, _: &Version, reason: &str) {
            self.push(format!("failed:{reason}"));
        }
        fn info(&self, _: &str) {}
        fn warning(&self, _: &str) {}
    }

    const GOOD: &str = "#!/bin/sh\necho brewup 0.1.0\n";

    #[tokio::test]
    async fn installs_and_verifies() {
        let body = tarball(GOOD);
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/brewup-v0.1.0-aarch64-apple-darwin.tar.gz")
            .with_status(200)
            .with_body(&body)
            .create_async()
            .await;

        let home = tempfile::tempdir().unwrap();
        let url = format!("{}/brewup-v0.1.0-aarch64-apple-darwin.tar.gz", server.url());
        let d = descriptor(&url, sha256_bytes(&body).as_str(), "");
        let p = pipeline(home.path());

        let outcome = p.run(&d).await.unwrap();
        let InstallOutcome::Installed(report) = outcome else {
            panic!("expected Installed, got {outcome:?}");
        };

        assert_eq!(report.prefix, home.path().join("Cellar/brewup/0.1.0"));
        assert!(report.prefix.join("bin/brewup").is_file());
        assert!(home.path().join("bin/brewup").is_symlink());
        assert!(report.receipt.verified);
        assert!(!report.cached);

        let stored = ReceiptStore::new(home.path().join("receipts"))
            .load("brewup", "0.1.0")
            .unwrap()
            .unwrap();
        assert_eq!(stored.sha256, sha256_bytes(&body));
        assert_eq!(stored.files, ["bin/brewup"]);

        // Staging is cleaned up
        assert_eq!(std::fs::read_dir(home.path().join("tmp")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn tampered_artifact_never_installs() {
        let body = tarball(GOOD);
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/brewup.tar.gz")
            .with_status(200)
            .with_body(tarball("#!/bin/sh\necho pwned\n"))
            .create_async()
            .await;

        let home = tempfile::tempdir().unwrap();
        let d = descriptor(
            &format!("{}/brewup.tar.gz", server.url()),
            sha256_bytes(&body).as_str(),
            "",
        );
        let recording = Arc::new(Recording::default());
        let p = pipeline(home.path()).with_reporter(recording.clone());

        let err = p.run(&d).await.unwrap_err();
        assert!(matches!(err, PipelineError::IntegrityMismatch { .. }));
        assert_eq!(err.stage(), Stage::Verify);

        let events = recording.events();
        assert!(!events.iter().any(|e| e.starts_with("install:") || e == "verified"));
        assert!(!home.path().join("Cellar").exists());
        assert_eq!(std::fs::read_dir(home.path().join("cache")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn failing_smoke_test_keeps_install() {
        let body = tarball("#!/bin/sh\nexit 1\n");
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/brewup.tar.gz")
            .with_status(200)
            .with_body(&body)
            .create_async()
            .await;

        let home = tempfile::tempdir().unwrap();
        let d = descriptor(
            &format!("{}/brewup.tar.gz", server.url()),
            sha256_bytes(&body).as_str(),
            "",
        );

        let outcome = pipeline(home.path()).run(&d).await.unwrap();
        assert!(!outcome.is_success());
        let InstallOutcome::VerificationFailed { report, error } = outcome else {
            panic!("expected VerificationFailed");
        };
        assert!(matches!(error, SmokeTestError::StepFailed { exit_code: Some(1), .. }));
        assert!(report.prefix.join("bin/brewup").is_file());
        assert!(!report.receipt.verified);
    }

    #[tokio::test]
    async fn failing_install_step_promotes_nothing() {
        let body = tarball(GOOD);
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/brewup.tar.gz")
            .with_status(200)
            .with_body(&body)
            .create_async()
            .await;

        let home = tempfile::tempdir().unwrap();
        let mut d = descriptor(
            &format!("{}/brewup.tar.gz", server.url()),
            sha256_bytes(&body).as_str(),
            "",
        );
        d.install.steps = vec!["bin.install brewup".into(), "exit 3".into()];

        let err = pipeline(home.path()).run(&d).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InstallStepFailure(InstallError::StepFailed { index: 1, .. })
        ));
        assert!(!home.path().join("Cellar/brewup/0.1.0").exists());
        assert!(!home.path().join("bin/brewup").exists());
    }

    #[tokio::test]
    async fn missing_build_dependency_stops_before_install() {
        let body = tarball(GOOD);
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/brewup.tar.gz")
            .with_status(200)
            .with_body(&body)
            .create_async()
            .await;

        let home = tempfile::tempdir().unwrap();
        let d = descriptor(
            &format!("{}/brewup.tar.gz", server.url()),
            sha256_bytes(&body).as_str(),
            "build_dep = \"keg-no-such-toolchain-xyz\"",
        );

        let err = pipeline(home.path()).run(&d).await.unwrap_err();
        assert!(matches!(err, PipelineError::MissingBuildDependency { .. }));
        assert_eq!(err.stage(), Stage::Install);
        assert!(!home.path().join("Cellar").exists());
    }

    #[tokio::test]
    async fn same_version_different_artifact_conflicts() {
        let first = tarball(GOOD);
        let second = tarball("#!/bin/sh\necho brewup 0.1.0 rebuilt\n");
        let mut server = Server::new_async().await;
        let _a = server
            .mock("GET", "/first.tar.gz")
            .with_status(200)
            .with_body(&first)
            .create_async()
            .await;
        let _b = server
            .mock("GET", "/second.tar.gz")
            .with_status(200)
            .with_body(&second)
            .create_async()
            .await;

        let home = tempfile::tempdir().unwrap();
        let p = pipeline(home.path());

        let d1 = descriptor(
            &format!("{}/first.tar.gz", server.url()),
            sha256_bytes(&first).as_str(),
            "",
        );
        assert!(p.run(&d1).await.unwrap().is_success());

        let d2 = descriptor(
            &format!("{}/second.tar.gz", server.url()),
            sha256_bytes(&second).as_str(),
            "",
        );
        let err = p.run(&d2).await.unwrap_err();
        assert!(matches!(err, PipelineError::VersionConflict { .. }));

        // Reinstalling the identical artifact is allowed
        assert!(p.run(&d1).await.unwrap().is_success());
    }

    #[tokio::test]
    async fn dry_run_touches_nothing() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/brewup.tar.gz")
            .expect(0)
            .create_async()
            .await;

        let home = tempfile::tempdir().unwrap();
        let d = descriptor(
            &format!("{}/brewup.tar.gz", server.url()),
            sha256_bytes(b"anything").as_str(),
            "",
        );
        let mut p = pipeline(&home.path().join("keg"));
        p.options.dry_run = true;

        let InstallOutcome::Planned(plan) = p.run(&d).await.unwrap() else {
            panic!("expected a plan");
        };
        assert_eq!(plan.variant, "arm-mac");
        assert!(!plan.cached);
        assert!(!home.path().join("keg").exists());
        m.assert_async().await;
    }

    #[tokio::test]
    async fn transient_errors_are_retried_then_fail() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/brewup.tar.gz")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let home = tempfile::tempdir().unwrap();
        let d = descriptor(
            &format!("{}/brewup.tar.gz", server.url()),
            sha256_bytes(b"x").as_str(),
            "",
        );

        let err = pipeline(home.path()).run(&d).await.unwrap_err();
        match err {
            PipelineError::DownloadFailure { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected DownloadFailure, got {other:?}"),
        }
        m.assert_async().await;
    }

    #[tokio::test]
    async fn cached_artifact_is_not_downloaded_again() {
        let body = tarball(GOOD);
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/brewup.tar.gz")
            .with_status(200)
            .with_body(&body)
            .expect(1)
            .create_async()
            .await;

        let home = tempfile::tempdir().unwrap();
        let d = descriptor(
            &format!("{}/brewup.tar.gz", server.url()),
            sha256_bytes(&body).as_str(),
            "",
        );
        let p = pipeline(home.path());

        p.run(&d).await.unwrap();
        let InstallOutcome::Installed(report) = p.run(&d).await.unwrap() else {
            panic!("expected Installed");
        };
        assert!(report.cached);
        m.assert_async().await;
    }

    #[tokio::test]
    async fn unmatched_platform_fails_resolution() {
        let home = tempfile::tempdir().unwrap();
        let d = descriptor("https://example.com/brewup.tar.gz", &"a".repeat(64), "");
        let mut p = pipeline(home.path());
        p.options.platform = Platform::new(Os::Linux, Arch::X86_64);

        let err = p.run(&d).await.unwrap_err();
        assert_eq!(err.stage(), Stage::Resolve);
    }

    #[tokio::test]
    async fn source_variant_builds_into_cellar() {
        let work = tempfile::tempdir().unwrap();
        let archive = work.path().join("brewup-0.1.0.tar.gz");
        {
            let enc = GzEncoder::new(std::fs::File::create(&archive).unwrap(), Compression::default());
            let mut builder = tar::Builder::new(enc);
            let mut header = tar::Header::new_gnu();
            header.set_size(GOOD.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, "brewup-0.1.0/brewup.sh", GOOD.as_bytes())
                .unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }
        let digest = sha256_file(&archive).unwrap();

        let d = PackageDescriptor::parse(&format!(
            r#"
[package]
name = "brewup"
version = "0.1.0"
homepage = "https://github.com/xcrong/brewup"

[[source]]
platform = "generic-source"
url = "file://{}"
sha256 = "{digest}"
build_dep = "sh"

[install]
steps = [
    "mkdir -p {{{{prefix}}}}/bin",
    "cp brewup.sh {{{{prefix}}}}/bin/brewup",
    "chmod 755 {{{{prefix}}}}/bin/brewup",
    "echo {{{{std_cargo_args}}}} > {{{{prefix}}}}/cargo-args",
]

[test]
steps = ["{{{{bin}}}}/brewup --version"]
"#,
            archive.display()
        ))
        .unwrap();

        let home = tempfile::tempdir().unwrap();
        let outcome = pipeline(home.path()).run(&d).await.unwrap();
        let InstallOutcome::Installed(report) = outcome else {
            panic!("expected Installed, got {outcome:?}");
        };

        assert_eq!(report.prefix, home.path().join("Cellar/brewup/0.1.0"));
        assert!(report.prefix.join("bin/brewup").is_file());
        assert!(home.path().join("bin/brewup").is_symlink());
        assert_eq!(report.receipt.build_dep.as_deref(), Some("sh"));
        assert!(report.receipt.verified);

        let args = std::fs::read_to_string(report.prefix.join("cargo-args")).unwrap();
        assert!(args.starts_with("--locked --root "), "{args}");
        assert!(args.trim_end().ends_with("--path ."), "{args}");
        assert_eq!(report.receipt.files, ["bin/brewup", "cargo-args"]);
    }

    #[tokio::test]
    async fn unusable_cache_fails_in_fetch_stage() {
        let home = tempfile::tempdir().unwrap();
        // A plain file where the cache directory should be
        std::fs::write(home.path().join("cache"), b"").unwrap();
        let d = descriptor("https://example.com/brewup.tar.gz", &"a".repeat(64), "");

        let err = pipeline(home.path()).run(&d).await.unwrap_err();
        assert!(matches!(err, PipelineError::CacheIo(_)), "{err:?}");
        assert_eq!(err.stage(), Stage::Fetch);
    }

    #[tokio::test]
    async fn retest_requires_install() {
        let home = tempfile::tempdir().unwrap();
        let d = descriptor("https://example.com/brewup.tar.gz", &"a".repeat(64), "");
        let err = pipeline(home.path()).retest(&d).unwrap_err();
        assert!(matches!(err, PipelineError::NotInstalled { .. }));
    }
}
