//! Post-install smoke tests.
//!
//! Each test step runs with `/bin/sh -c` in a scratch directory, with the
//! package's `bin` directory first on `PATH`. A step that exits non-zero or
//! outlives the timeout fails the test; the install itself is left in place.

use std::ffi::OsString;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use thiserror::Error;
use wait_timeout::ChildExt;

use crate::Reporter;
use crate::template::{StepContext, TemplateError};

/// Default per-step timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

const OUTPUT_LINES: usize = 20;

/// Smoke test failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SmokeTestError {
    /// A test step exited non-zero.
    #[error("test step {} failed (exit code {}): {step}\n{output}", .index + 1, .exit_code.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    StepFailed {
        /// Zero-based step index.
        index: usize,
        /// The expanded step text.
        step: String,
        /// Exit status, `None` if killed by a signal.
        exit_code: Option<i32>,
        /// Tail of combined stdout/stderr.
        output: String,
    },

    /// A test step ran past the timeout and was killed.
    #[error("test step {} timed out after {}s: {step}", .index + 1, .timeout.as_secs())]
    TimedOut {
        /// Zero-based step index.
        index: usize,
        /// The expanded step text.
        step: String,
        /// The limit that was exceeded.
        timeout: Duration,
    },

    /// A step used an unknown placeholder.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// The step could not be started.
    #[error("could not run test step '{step}': {reason}")]
    Spawn {
        /// The expanded step text.
        step: String,
        /// Underlying error.
        reason: String,
    },
}

/// Runs a package's test steps against its installed prefix.
#[derive(Debug)]
pub struct SmokeTestRunner<'a> {
    ctx: &'a StepContext,
    timeout: Duration,
}

impl<'a> SmokeTestRunner<'a> {
    /// Create a runner with a per-step `timeout`.
    pub fn new(ctx: &'a StepContext, timeout: Duration) -> Self {
        Self { ctx, timeout }
    }

    /// Run every step in order; the first failure stops the run.
    ///
    /// # Errors
    ///
    /// Returns the first [`SmokeTestError`] encountered.
    pub fn run(&self, steps: &[String], reporter: &dyn Reporter) -> Result<(), SmokeTestError> {
        for (index, raw) in steps.iter().enumerate() {
            let step = self.ctx.expand(raw)?;
            reporter.testing(&self.ctx.name, &self.ctx.version, &step);
            tracing::debug!(index, %step, timeout = ?self.timeout, "Running test step");
            self.run_step(index, &step)?;
        }
        Ok(())
    }

    fn run_step(&self, index: usize, step: &str) -> Result<(), SmokeTestError> {
        let spawn_err = |e: std::io::Error| SmokeTestError::Spawn {
            step: step.to_string(),
            reason: e.to_string(),
        };

        let scratch = tempfile::tempdir().map_err(spawn_err)?;
        let mut output = tempfile::tempfile().map_err(spawn_err)?;

        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg(step)
            .current_dir(scratch.path())
            .envs(self.ctx.env())
            .env("PATH", self.search_path())
            .stdin(Stdio::null())
            .stdout(Stdio::from(output.try_clone().map_err(spawn_err)?))
            .stderr(Stdio::from(output.try_clone().map_err(spawn_err)?))
            .spawn()
            .map_err(spawn_err)?;

        let status = match child.wait_timeout(self.timeout).map_err(spawn_err)? {
            Some(status) => status,
            None => {
                child.kill().ok();
                child.wait().ok();
                return Err(SmokeTestError::TimedOut {
                    index,
                    step: step.to_string(),
                    timeout: self.timeout,
                });
            }
        };

        if !status.success() {
            let mut captured = Vec::new();
            output.seek(SeekFrom::Start(0)).ok();
            output.read_to_end(&mut captured).ok();
            let text = String::from_utf8_lossy(&captured);
            let lines: Vec<&str> = text.lines().collect();
            let start = lines.len().saturating_sub(OUTPUT_LINES);

            return Err(SmokeTestError::StepFailed {
                index,
                step: step.to_string(),
                exit_code: status.code(),
                output: lines[start..].join("\n"),
            });
        }

        Ok(())
    }

    /// `<prefix>/bin` followed by the inherited `PATH`.
    fn search_path(&self) -> OsString {
        let mut dirs: Vec<PathBuf> = vec![self.ctx.bin()];
        if let Some(path) = std::env::var_os("PATH") {
            dirs.extend(std::env::split_paths(&path));
        }
        std::env::join_paths(dirs).unwrap_or_else(|_| self.ctx.bin().into_os_string())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::NullReporter;
    use std::fs;

    fn installed_tool(script: &str) -> (tempfile::TempDir, StepContext) {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let ctx = StepContext::new("brewup".into(), "0.1.0".into(), dir.path().join("prefix"));
        fs::create_dir_all(ctx.bin()).unwrap();
        let bin = ctx.bin().join("brewup");
        fs::write(&bin, script).unwrap();
        fs::set_permissions(&bin, fs::Permissions::from_mode(0o755)).unwrap();
        (dir, ctx)
    }

    #[test]
    fn passing_version_check() {
        let (_dir, ctx) = installed_tool("#!/bin/sh\necho \"brewup 0.1.0\"\n");
        let runner = SmokeTestRunner::new(&ctx, DEFAULT_TIMEOUT);
        runner
            .run(&["{{bin}}/brewup --version".to_string()], &NullReporter)
            .unwrap();
        // bin is on PATH, so the bare name works too
        runner.run(&["brewup --version".to_string()], &NullReporter).unwrap();
    }

    #[test]
    fn failing_step_captures_output() {
        let (_dir, ctx) = installed_tool("#!/bin/sh\necho \"bad flag\" >&2\nexit 2\n");
        let err = SmokeTestRunner::new(&ctx, DEFAULT_TIMEOUT)
            .run(&["{{bin}}/brewup --version".to_string()], &NullReporter)
            .unwrap_err();

        match err {
            SmokeTestError::StepFailed {
                index,
                exit_code,
                output,
                ..
            } => {
                assert_eq!(index, 0);
                assert_eq!(exit_code, Some(2));
                assert!(output.contains("bad flag"));
            }
            other => panic!("expected StepFailed, got {other:?}"),
        }
    }

    #[test]
    fn slow_step_times_out() {
        let (_dir, ctx) = installed_tool("#!/bin/sh\nsleep 30\n");
        let err = SmokeTestRunner::new(&ctx, Duration::from_millis(200))
            .run(&["{{bin}}/brewup".to_string()], &NullReporter)
            .unwrap_err();
        assert!(matches!(err, SmokeTestError::TimedOut { index: 0, .. }));
    }

    #[test]
    fn later_steps_do_not_run_after_failure() {
        let (dir, ctx) = installed_tool("#!/bin/sh\nexit 0\n");
        let marker = dir.path().join("marker");
        let steps = vec![
            "false".to_string(),
            format!("touch {}", marker.display()),
        ];
        let err = SmokeTestRunner::new(&ctx, DEFAULT_TIMEOUT)
            .run(&steps, &NullReporter)
            .unwrap_err();
        assert!(matches!(err, SmokeTestError::StepFailed { index: 0, .. }));
        assert!(!marker.exists());
    }

    #[test]
    fn no_steps_passes() {
        let (_dir, ctx) = installed_tool("#!/bin/sh\n");
        SmokeTestRunner::new(&ctx, DEFAULT_TIMEOUT)
            .run(&[], &NullReporter)
            .unwrap();
    }
}
