//! `{{placeholder}}` expansion for install and test steps.
//!
//! | Placeholder | Value |
//! |---|---|
//! | `{{prefix}}` | Install prefix of the package |
//! | `{{bin}}` | `<prefix>/bin` |
//! | `{{name}}` | Package name |
//! | `{{version}}` | Package version |
//! | `{{std_cargo_args}}` | `--locked --root <prefix> --path .` |
//!
//! The same values are exported to every step as `PREFIX`, `BIN`, `NAME`,
//! `VERSION` and `JOBS`.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use keg_schema::{PackageName, Version};
use regex::Regex;
use thiserror::Error;

/// Matches `{{ name }}` with optional inner whitespace.
pub(crate) static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([a-z_]+)\s*\}\}").unwrap_or_else(|e| panic!("placeholder regex: {e}"))
});

/// Placeholder names a step may use.
pub const PLACEHOLDERS: [&str; 5] = ["prefix", "bin", "name", "version", "std_cargo_args"];

/// A step referenced a placeholder that does not exist.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown placeholder '{{{{{placeholder}}}}}' in step: {step}")]
pub struct TemplateError {
    /// The unrecognised placeholder name.
    pub placeholder: String,
    /// The step it appeared in.
    pub step: String,
}

/// Values substituted into steps for one package install.
#[derive(Debug, Clone)]
pub struct StepContext {
    /// Package name.
    pub name: PackageName,
    /// Package version.
    pub version: Version,
    /// Install prefix the steps write into.
    pub prefix: PathBuf,
}

impl StepContext {
    /// Create a context for `name`/`version` installing into `prefix`.
    pub fn new(name: PackageName, version: Version, prefix: impl Into<PathBuf>) -> Self {
        Self {
            name,
            version,
            prefix: prefix.into(),
        }
    }

    /// Executable directory inside the prefix.
    pub fn bin(&self) -> PathBuf {
        self.prefix.join("bin")
    }

    /// Standard `cargo install` arguments targeting this prefix.
    pub fn std_cargo_args(&self) -> String {
        format!("--locked --root {} --path .", shell_quote(&self.prefix))
    }

    fn value(&self, placeholder: &str) -> Option<String> {
        match placeholder {
            "prefix" => Some(shell_quote(&self.prefix)),
            "bin" => Some(shell_quote(&self.bin())),
            "name" => Some(self.name.to_string()),
            "version" => Some(self.version.to_string()),
            "std_cargo_args" => Some(self.std_cargo_args()),
            _ => None,
        }
    }

    /// Substitute every placeholder in `step`.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError`] for the first unknown placeholder.
    pub fn expand(&self, step: &str) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(step.len());
        let mut last = 0;

        for caps in PLACEHOLDER.captures_iter(step) {
            let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let value = self.value(key.as_str()).ok_or_else(|| TemplateError {
                placeholder: key.as_str().to_string(),
                step: step.to_string(),
            })?;
            out.push_str(&step[last..whole.start()]);
            out.push_str(&value);
            last = whole.end();
        }

        out.push_str(&step[last..]);
        Ok(out)
    }

    /// Environment exported to every step.
    pub fn env(&self) -> Vec<(&'static str, String)> {
        vec![
            ("PREFIX", self.prefix.to_string_lossy().into_owned()),
            ("BIN", self.bin().to_string_lossy().into_owned()),
            ("NAME", self.name.to_string()),
            ("VERSION", self.version.to_string()),
            ("JOBS", num_cpus::get().to_string()),
        ]
    }
}

/// Quote a path for `/bin/sh` when it contains anything unsafe.
fn shell_quote(path: &Path) -> String {
    let s = path.to_string_lossy();
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '+' | '@' | ':'))
    {
        return s.into_owned();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}
