//! TOML package descriptors
//!
//! A descriptor is authored once per release and consumed read-only. A new
//! release gets a new descriptor; nothing in the pipeline mutates one.
//!
//! Loading is lenient so that placeholder hashes still parse and can be
//! reported; [`PackageDescriptor::validate`] is the strict gate the pipeline
//! runs before anything touches the network.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use keg_schema::{PackageName, PlatformPredicate, Sha256Hash, Version};
use keg_schema::{Platform, Sha256Digest};

/// Errors that can occur when loading or validating a descriptor.
#[derive(Error, Debug)]
pub enum DescriptorError {
    /// An I/O error occurred while reading a descriptor file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML content could not be deserialized into a descriptor.
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// The descriptor parsed but breaks a validation rule.
    #[error("{field}: {reason}")]
    Invalid {
        /// Dotted path of the offending field (e.g. `source[1].sha256`).
        field: String,
        /// Human-readable explanation.
        reason: String,
    },
}

impl DescriptorError {
    fn invalid(field: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.to_string(),
        }
    }
}

/// Metadata describing a package's identity and provenance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageInfo {
    /// Unique name that identifies this package.
    pub name: PackageName,
    /// Semantic version string for the package release.
    pub version: Version,
    /// Short human-readable summary of the package.
    #[serde(default)]
    pub description: String,
    /// URL of the project's homepage.
    #[serde(default)]
    pub homepage: String,
    /// SPDX license identifier for the package.
    #[serde(default)]
    pub license: String,
}

/// One platform-specific way to obtain the package.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceVariant {
    /// Where this variant applies; `None` applies everywhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<PlatformPredicate>,
    /// Archive or release-asset location.
    pub url: String,
    /// Expected SHA-256 digest of the downloaded artifact.
    pub sha256: Sha256Hash,
    /// Toolchain needed only while installing (e.g. `rust`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_dep: Option<String>,
}

impl SourceVariant {
    /// Whether this variant applies on `platform`.
    pub fn matches(&self, platform: Platform) -> bool {
        self.platform.is_none_or(|p| p.matches(platform))
    }

    /// Whether installing this variant builds from source.
    pub fn is_source(&self) -> bool {
        self.build_dep.is_some() || self.platform.is_some_and(|p| p.is_source())
    }

    /// Label used in messages: the predicate, or `any`.
    pub fn label(&self) -> &'static str {
        self.platform.map_or("any", |p| p.as_str())
    }
}

/// An ordered list of shell-like steps.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Steps {
    /// Steps in execution order.
    #[serde(default)]
    pub steps: Vec<String>,
}

/// Complete package descriptor: metadata, sources, install and test steps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageDescriptor {
    /// Core metadata for the package (name, version, description, etc.).
    pub package: PackageInfo,
    /// Source variants in declaration order; the first match wins.
    #[serde(rename = "source", default)]
    pub sources: Vec<SourceVariant>,
    /// Install steps, run against the extracted artifact.
    #[serde(default)]
    pub install: Steps,
    /// Post-install smoke test steps.
    #[serde(default)]
    pub test: Steps,
}

impl PackageDescriptor {
    /// Parse a descriptor from a TOML file on disk.
    ///
    /// # Errors
    ///
    /// Returns `DescriptorError::Io` if the file cannot be read, or
    /// `DescriptorError::Parse` if the TOML content is invalid.
    pub fn from_file(path: &Path) -> Result<Self, DescriptorError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse a descriptor from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `DescriptorError::Parse` if the TOML content is invalid or does
    /// not match the expected schema.
    pub fn parse(content: &str) -> Result<Self, DescriptorError> {
        Ok(toml::from_str(content)?)
    }

    /// Serialize this descriptor to a pretty-printed TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `toml::ser::Error` if serialization fails.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Package name.
    pub fn name(&self) -> &PackageName {
        &self.package.name
    }

    /// Package version.
    pub fn version(&self) -> &Version {
        &self.package.version
    }

    /// Install steps in order.
    pub fn install_steps(&self) -> &[String] {
        &self.install.steps
    }

    /// Smoke test steps in order.
    pub fn test_steps(&self) -> &[String] {
        &self.test.steps
    }

    /// Check every rule a publishable descriptor must satisfy.
    ///
    /// # Errors
    ///
    /// Returns `DescriptorError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        let info = &self.package;

        if info.name.is_empty() {
            return Err(DescriptorError::invalid("package.name", "must not be empty"));
        }
        if info
            .name
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@' | '+')))
        {
            return Err(DescriptorError::invalid(
                "package.name",
                format!("'{}' contains characters not allowed in a path", info.name),
            ));
        }
        if info.version.is_empty() {
            return Err(DescriptorError::invalid("package.version", "must not be empty"));
        }
        if info.version.semver().is_none() {
            return Err(DescriptorError::invalid(
                "package.version",
                format!("'{}' is not a semantic version", info.version),
            ));
        }
        if !(info.homepage.starts_with("https://") || info.homepage.starts_with("http://")) {
            return Err(DescriptorError::invalid(
                "package.homepage",
                format!("'{}' is not an http(s) URL", info.homepage),
            ));
        }

        if self.sources.is_empty() {
            return Err(DescriptorError::invalid(
                "source",
                "at least one source variant is required",
            ));
        }
        for (i, source) in self.sources.iter().enumerate() {
            validate_source(i, source)?;
        }

        if self.install.steps.is_empty() {
            return Err(DescriptorError::invalid(
                "install.steps",
                "at least one install step is required",
            ));
        }
        for (section, steps) in [("install", &self.install.steps), ("test", &self.test.steps)] {
            if let Some(i) = steps.iter().position(|s| s.trim().is_empty()) {
                return Err(DescriptorError::invalid(
                    format!("{section}.steps[{i}]"),
                    "step must not be empty",
                ));
            }
        }

        Ok(())
    }
}

fn validate_source(i: usize, source: &SourceVariant) -> Result<(), DescriptorError> {
    let url = &source.url;
    if !(url.starts_with("https://") || url.starts_with("http://") || url.starts_with("file://")) {
        return Err(DescriptorError::invalid(
            format!("source[{i}].url"),
            format!("'{url}' must be an http(s):// or file:// URL"),
        ));
    }

    source
        .sha256
        .to_digest()
        .map_err(|e| DescriptorError::invalid(format!("source[{i}].sha256"), e))?;

    match source.build_dep.as_deref() {
        Some(dep) if dep.trim().is_empty() => {
            return Err(DescriptorError::invalid(
                format!("source[{i}].build_dep"),
                "must not be empty when present",
            ));
        }
        None if source.platform.is_some_and(|p| p.is_source()) => {
            return Err(DescriptorError::invalid(
                format!("source[{i}].build_dep"),
                "a generic-source variant must name its build dependency",
            ));
        }
        _ => {}
    }

    Ok(())
}

impl std::str::FromStr for PackageDescriptor {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// The validated digest of a variant, for callers that already ran
/// [`PackageDescriptor::validate`].
///
/// # Errors
///
/// Returns `DescriptorError::Invalid` if the hash is malformed.
pub fn expected_digest(source: &SourceVariant) -> Result<Sha256Digest, DescriptorError> {
    source
        .sha256
        .to_digest()
        .map_err(|e| DescriptorError::invalid("source.sha256", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTEL_SHA: &str = "1111111111111111111111111111111111111111111111111111111111111111";
    const ARM_SHA: &str = "2222222222222222222222222222222222222222222222222222222222222222";

    fn brewup_toml(version: &str) -> String {
        format!(
            r#"
[package]
name = "brewup"
description = "CLI tool to automate Homebrew package management"
homepage = "https://github.com/xcrong/brewup"
license = "MIT"
version = "{version}"

[[source]]
platform = "intel-mac"
url = "https://github.com/xcrong/brewup/releases/download/v{version}/brewup-v{version}-x86_64-apple-darwin.tar.gz"
sha256 = "{INTEL_SHA}"

[[source]]
platform = "arm-mac"
url = "https://github.com/xcrong/brewup/releases/download/v{version}/brewup-v{version}-aarch64-apple-darwin.tar.gz"
sha256 = "{ARM_SHA}"

[install]
steps = ["bin.install brewup"]

[test]
steps = ["{{{{bin}}}}/brewup --version"]
"#
        )
    }

    #[test]
    fn test_parse_descriptor() {
        let d = PackageDescriptor::parse(&brewup_toml("0.1.0")).unwrap();

        assert_eq!(d.name(), &PackageName::from("brewup"));
        assert_eq!(d.version(), &Version::from("0.1.0"));
        assert_eq!(d.package.license, "MIT");
        assert_eq!(d.sources.len(), 2);
        assert_eq!(d.sources[0].platform, Some(PlatformPredicate::IntelMac));
        assert_eq!(d.sources[1].sha256.as_str(), ARM_SHA);
        assert_eq!(d.install_steps(), ["bin.install brewup"]);
        assert_eq!(d.test_steps(), ["{{bin}}/brewup --version"]);
        d.validate().unwrap();
    }

    #[test]
    fn test_parse_malformed_toml() {
        let result = PackageDescriptor::parse("this is not valid toml {{{");
        assert!(matches!(result, Err(DescriptorError::Parse(_))));
    }

    #[test]
    fn test_parse_missing_package_table() {
        let incomplete = r#"
[[source]]
url = "https://example.com/a.tar.gz"
sha256 = "abc123"
"#;
        assert!(PackageDescriptor::parse(incomplete).is_err());
    }

    #[test]
    fn test_unknown_platform_predicate_fails_to_parse() {
        let toml = brewup_toml("0.1.0").replace("\"arm-mac\"", "\"arm-windows\"");
        assert!(PackageDescriptor::parse(&toml).is_err());
    }

    #[test]
    fn test_placeholder_hash_fails_validation() {
        let toml = brewup_toml("0.1.0").replace(ARM_SHA, "REPLACE_WITH_ACTUAL_SHA256_FOR_ARM");
        let d = PackageDescriptor::parse(&toml).unwrap();
        match d.validate() {
            Err(DescriptorError::Invalid { field, .. }) => assert_eq!(field, "source[1].sha256"),
            other => panic!("expected invalid sha256, got {other:?}"),
        }
    }

    #[test]
    fn test_generic_source_requires_build_dep() {
        let toml = r#"
[package]
name = "brewup"
homepage = "https://github.com/xcrong/brewup"
version = "0.1.0"

[[source]]
platform = "generic-source"
url = "https://github.com/xcrong/brewup/archive/refs/tags/v0.1.0.tar.gz"
sha256 = "3333333333333333333333333333333333333333333333333333333333333333"

[install]
steps = ["cargo install {{std_cargo_args}}"]
"#;
        let d = PackageDescriptor::parse(toml).unwrap();
        assert!(d.sources[0].is_source());
        match d.validate() {
            Err(DescriptorError::Invalid { field, .. }) => assert_eq!(field, "source[0].build_dep"),
            other => panic!("expected missing build_dep, got {other:?}"),
        }

        let fixed = toml.replace(
            "sha256 = \"3333",
            "build_dep = \"rust\"\nsha256 = \"3333",
        );
        PackageDescriptor::parse(&fixed).unwrap().validate().unwrap();
    }

    #[test]
    fn test_missing_install_steps_fail_validation() {
        let toml = brewup_toml("0.1.0").replace("steps = [\"bin.install brewup\"]", "");
        let d = PackageDescriptor::parse(&toml).unwrap();
        assert!(matches!(
            d.validate(),
            Err(DescriptorError::Invalid { ref field, .. }) if field == "install.steps"
        ));
    }

    #[test]
    fn test_non_semver_version_fails_validation() {
        let d = PackageDescriptor::parse(&brewup_toml("latest")).unwrap();
        assert!(matches!(
            d.validate(),
            Err(DescriptorError::Invalid { ref field, .. }) if field == "package.version"
        ));
    }

    #[test]
    fn test_descriptors_differing_only_in_version_validate_independently() {
        let old = PackageDescriptor::parse(&brewup_toml("0.1.0")).unwrap();
        let new = PackageDescriptor::parse(&brewup_toml("0.2.0")).unwrap();

        old.validate().unwrap();
        new.validate().unwrap();
        assert_ne!(old, new);
        assert_eq!(old.sources[0].sha256, new.sources[0].sha256);
        assert!(old.sources[0].url.contains("v0.1.0"));
        assert!(new.sources[0].url.contains("v0.2.0"));
    }

    #[test]
    fn test_to_toml_preserves_source_order() {
        let d = PackageDescriptor::parse(&brewup_toml("0.1.0")).unwrap();
        let rendered = d.to_toml().unwrap();
        let back = PackageDescriptor::parse(&rendered).unwrap();
        assert_eq!(back, d);
        assert!(rendered.find("intel-mac").unwrap() < rendered.find("arm-mac").unwrap());
    }
}
