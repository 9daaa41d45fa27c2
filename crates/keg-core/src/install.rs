//! Install step execution.
//!
//! Steps run in the artifact's working root with the package's
//! [`StepContext`] exported. `bin.install <files>` is handled natively; every
//! other step is handed to `/bin/sh -c`. Output is captured to a log file
//! whose tail is attached to any failure.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;
use walkdir::WalkDir;

use crate::Reporter;
use crate::io::extract::{ExtractError, set_executable};
use crate::template::{StepContext, TemplateError};

/// Lines of captured output attached to a failed step.
const TAIL_LINES: usize = 20;

/// Install failures.
#[derive(Error, Debug)]
pub enum InstallError {
    /// The variant's build dependency is not on `PATH`.
    #[error("build dependency '{name}' not found (looked for '{probe}' on PATH)")]
    MissingBuildDependency {
        /// Dependency as declared (e.g. `rust`).
        name: String,
        /// Executable that was probed (e.g. `cargo`).
        probe: String,
    },

    /// A step exited non-zero or could not be carried out.
    #[error("install step {} failed ({}): {step}\n{reason}", .index + 1, exit_label(.exit_code))]
    StepFailed {
        /// Zero-based step index.
        index: usize,
        /// The expanded step text.
        step: String,
        /// Exit status, if the step ran as a process.
        exit_code: Option<i32>,
        /// Captured output tail or a description of the problem.
        reason: String,
    },

    /// A step used an unknown placeholder.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// The artifact could not be unpacked.
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// Filesystem error outside of a step.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {c}"),
        None => "no exit code".to_string(),
    }
}

/// Executable probed on `PATH` for a declared build dependency.
pub fn build_dependency_probe(dep: &str) -> &str {
    match dep {
        "rust" | "cargo" => "cargo",
        "go" | "golang" => "go",
        "python" | "python3" => "python3",
        "node" | "nodejs" => "node",
        other => other,
    }
}

/// Verify that a build dependency is available.
///
/// # Errors
///
/// Returns [`InstallError::MissingBuildDependency`] if its probe is not on
/// `PATH`.
pub fn check_build_dependency(dep: &str) -> Result<PathBuf, InstallError> {
    let probe = build_dependency_probe(dep);
    which::which(probe).map_err(|_| InstallError::MissingBuildDependency {
        name: dep.to_string(),
        probe: probe.to_string(),
    })
}

/// One parsed install step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallStep {
    /// Copy files from the working root into `<prefix>/bin`.
    BinInstall(Vec<String>),
    /// Run through `/bin/sh -c`.
    Shell(String),
}

impl InstallStep {
    /// Classify an already-expanded step.
    pub fn parse(step: &str) -> Self {
        let trimmed = step.trim();
        match trimmed.strip_prefix("bin.install") {
            Some(rest) if rest.starts_with(char::is_whitespace) => {
                Self::BinInstall(rest.split_whitespace().map(str::to_string).collect())
            }
            _ => Self::Shell(trimmed.to_string()),
        }
    }
}

/// Runs install steps for one package.
#[derive(Debug)]
pub struct InstallExecutor<'a> {
    ctx: &'a StepContext,
    workdir: PathBuf,
    log_path: PathBuf,
}

impl<'a> InstallExecutor<'a> {
    /// Run steps in `workdir`, installing into `ctx.prefix`.
    pub fn new(ctx: &'a StepContext, workdir: impl Into<PathBuf>, log_path: impl Into<PathBuf>) -> Self {
        Self {
            ctx,
            workdir: workdir.into(),
            log_path: log_path.into(),
        }
    }

    /// Execute every step in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::StepFailed`] for the first failing step, or
    /// [`InstallError::Template`] if a step cannot be expanded.
    pub fn run(&self, steps: &[String], reporter: &dyn Reporter) -> Result<(), InstallError> {
        fs::create_dir_all(&self.ctx.prefix)?;
        if let Some(parent) = self.log_path.parent() {
            fs::create_dir_all(parent)?;
        }
        File::create(&self.log_path)?;

        for (index, raw) in steps.iter().enumerate() {
            let expanded = self.ctx.expand(raw)?;
            reporter.installing(&self.ctx.name, &self.ctx.version, &expanded);
            tracing::debug!(index, step = %expanded, "Running install step");

            match InstallStep::parse(&expanded) {
                InstallStep::BinInstall(files) => self.bin_install(index, &expanded, &files)?,
                InstallStep::Shell(cmd) => self.shell(index, &cmd)?,
            }
        }

        Ok(())
    }

    fn bin_install(&self, index: usize, step: &str, files: &[String]) -> Result<(), InstallError> {
        let fail = |reason: String| InstallError::StepFailed {
            index,
            step: step.to_string(),
            exit_code: None,
            reason,
        };

        if files.is_empty() {
            return Err(fail("bin.install needs at least one file".to_string()));
        }

        let bin = self.ctx.bin();
        fs::create_dir_all(&bin)?;

        for file in files {
            let src = self.workdir.join(file);
            if !src.is_file() {
                return Err(fail(format!("no such file in artifact: {file}")));
            }
            let Some(file_name) = src.file_name() else {
                return Err(fail(format!("not a file name: {file}")));
            };
            let target = bin.join(file_name);
            fs::copy(&src, &target)?;
            set_executable(&target)?;
        }

        Ok(())
    }

    fn shell(&self, index: usize, cmd: &str) -> Result<(), InstallError> {
        let log = OpenOptions::new().append(true).open(&self.log_path)?;

        let status = Command::new("/bin/sh")
            .arg("-c")
            .arg(cmd)
            .current_dir(&self.workdir)
            .envs(self.ctx.env())
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log))
            .status()
            .map_err(|e| InstallError::StepFailed {
                index,
                step: cmd.to_string(),
                exit_code: None,
                reason: format!("failed to spawn /bin/sh: {e}"),
            })?;

        if !status.success() {
            return Err(InstallError::StepFailed {
                index,
                step: cmd.to_string(),
                exit_code: status.code(),
                reason: read_last_lines(&self.log_path, TAIL_LINES).unwrap_or_default(),
            });
        }

        Ok(())
    }
}

/// Move a fully installed staging prefix to its final location.
///
/// Both paths must be on the same filesystem.
pub fn promote(staging: &Path, prefix: &Path) -> io::Result<()> {
    if let Some(parent) = prefix.parent() {
        fs::create_dir_all(parent)?;
    }
    if prefix.exists() {
        fs::remove_dir_all(prefix)?;
    }
    fs::rename(staging, prefix)
}

/// Symlink every file in `<prefix>/bin` into `bin_dir`.
///
/// Returns the created link paths.
pub fn link_binaries(prefix: &Path, bin_dir: &Path) -> io::Result<Vec<PathBuf>> {
    let src_dir = prefix.join("bin");
    let mut linked = Vec::new();
    if !src_dir.is_dir() {
        return Ok(linked);
    }
    fs::create_dir_all(bin_dir)?;

    for entry in fs::read_dir(&src_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let target = bin_dir.join(entry.file_name());
        if target.exists() || target.is_symlink() {
            fs::remove_file(&target)?;
        }

        #[cfg(unix)]
        std::os::unix::fs::symlink(entry.path(), &target)?;
        #[cfg(not(unix))]
        fs::copy(entry.path(), &target)?;

        linked.push(target);
    }

    Ok(linked)
}

/// Files under `prefix`, relative to it, sorted.
pub fn installed_files(prefix: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(prefix)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| !e.file_type().is_dir())
        .filter_map(|e| {
            e.path()
                .strip_prefix(prefix)
                .ok()
                .map(|p| p.to_string_lossy().into_owned())
        })
        .collect();
    files.sort();
    files
}

/// Read the last `n` lines of a log without loading all of it.
pub(crate) fn read_last_lines(path: &Path, n: usize) -> io::Result<String> {
    const TAIL_SIZE: u64 = 16 * 1024;

    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let seek_pos = len.saturating_sub(TAIL_SIZE);
    file.seek(SeekFrom::Start(seek_pos))?;

    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    let buffer = String::from_utf8_lossy(&bytes);

    // Skip the partial first line after a mid-file seek
    let content = if seek_pos > 0 {
        buffer.find('\n').map_or(&buffer[..], |idx| &buffer[idx + 1..])
    } else {
        &buffer[..]
    };

    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(n);
    Ok(lines[start..].join("\n"))
}
