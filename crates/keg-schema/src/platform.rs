//! Host platform tags and the predicates source variants are gated on.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::arch::{Arch, Os};

/// Errors produced when parsing platform, OS, or architecture tags.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformParseError {
    /// The architecture name is not recognised.
    #[error("Unknown architecture: {0}")]
    UnknownArch(String),

    /// The operating system name is not recognised.
    #[error("Unknown operating system: {0}")]
    UnknownOs(String),

    /// The platform tag is neither a known alias nor `<os>-<arch>`.
    #[error("Unknown platform '{0}' (expected intel-mac, arm-mac, intel-linux, arm-linux or <os>-<arch>)")]
    UnknownPlatform(String),

    /// The predicate name is not one of the supported variants.
    #[error("Unknown platform predicate: {0}")]
    UnknownPredicate(String),
}

/// The executing environment: operating system plus CPU architecture.
///
/// Displayed and parsed using the short tags descriptors are written with
/// (`intel-mac`, `arm-mac`, `intel-linux`, `arm-linux`). Hosts outside those
/// four display as `<os>-<arch>` and match no prebuilt predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    /// Operating system family.
    pub os: Os,
    /// CPU architecture.
    pub arch: Arch,
}

impl Platform {
    /// Every platform a prebuilt variant can target.
    pub const ALL: [Platform; 4] = [
        Platform::new(Os::MacOs, Arch::X86_64),
        Platform::new(Os::MacOs, Arch::Arm64),
        Platform::new(Os::Linux, Arch::X86_64),
        Platform::new(Os::Linux, Arch::Arm64),
    ];

    /// Create a platform from its parts.
    pub const fn new(os: Os, arch: Arch) -> Self {
        Self { os, arch }
    }

    /// Detect the platform this binary was compiled for.
    pub fn current() -> Self {
        Self::new(Os::current(), Arch::current())
    }

    /// Short tag (`arm-mac`, `intel-linux`, ...), or `None` for a platform
    /// no prebuilt variant can target.
    pub fn tag(&self) -> Option<&'static str> {
        match (self.os, self.arch) {
            (Os::MacOs, Arch::X86_64) => Some("intel-mac"),
            (Os::MacOs, Arch::Arm64) => Some("arm-mac"),
            (Os::Linux, Arch::X86_64) => Some("intel-linux"),
            (Os::Linux, Arch::Arm64) => Some("arm-linux"),
            _ => None,
        }
    }

    /// Whether prebuilt variants exist for this platform.
    pub fn is_supported(&self) -> bool {
        self.tag().is_some()
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.tag() {
            Some(tag) => f.write_str(tag),
            None => write!(f, "{}-{}", self.os, self.arch),
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = PlatformParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        if let Some(platform) = Self::ALL.into_iter().find(|p| p.tag() == Some(lower.as_str())) {
            return Ok(platform);
        }

        // `<os>-<arch>` form, e.g. `macos-aarch64` or `linux-x86_64`
        let (os, arch) = lower
            .split_once('-')
            .ok_or_else(|| PlatformParseError::UnknownPlatform(s.to_string()))?;
        Ok(Self::new(os.parse()?, arch.parse()?))
    }
}

/// Condition under which a source variant applies.
///
/// A variant without a predicate applies everywhere. `GenericSource` also
/// applies everywhere but marks the variant as a build from source, which
/// requires the variant's build dependency to be present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlatformPredicate {
    /// macOS on Intel.
    IntelMac,
    /// macOS on Apple Silicon.
    ArmMac,
    /// Linux on `x86_64`.
    IntelLinux,
    /// Linux on ARM64.
    ArmLinux,
    /// Source archive built on the host; matches any platform.
    #[serde(alias = "source")]
    GenericSource,
}

impl PlatformPredicate {
    /// Whether this predicate holds on `platform`.
    pub fn matches(&self, platform: Platform) -> bool {
        match self.target() {
            Some(target) => target == platform,
            None => true,
        }
    }

    /// The single platform a prebuilt predicate targets, or `None` for
    /// [`GenericSource`](Self::GenericSource).
    pub fn target(&self) -> Option<Platform> {
        match self {
            Self::IntelMac => Some(Platform::new(Os::MacOs, Arch::X86_64)),
            Self::ArmMac => Some(Platform::new(Os::MacOs, Arch::Arm64)),
            Self::IntelLinux => Some(Platform::new(Os::Linux, Arch::X86_64)),
            Self::ArmLinux => Some(Platform::new(Os::Linux, Arch::Arm64)),
            Self::GenericSource => None,
        }
    }

    /// Whether the variant is built from source on the host.
    pub fn is_source(&self) -> bool {
        matches!(self, Self::GenericSource)
    }

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IntelMac => "intel-mac",
            Self::ArmMac => "arm-mac",
            Self::IntelLinux => "intel-linux",
            Self::ArmLinux => "arm-linux",
            Self::GenericSource => "generic-source",
        }
    }
}

impl std::fmt::Display for PlatformPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PlatformPredicate {
    type Err = PlatformParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "intel-mac" => Ok(Self::IntelMac),
            "arm-mac" => Ok(Self::ArmMac),
            "intel-linux" => Ok(Self::IntelLinux),
            "arm-linux" => Ok(Self::ArmLinux),
            "generic-source" | "source" => Ok(Self::GenericSource),
            _ => Err(PlatformParseError::UnknownPredicate(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip_through_from_str() {
        for platform in Platform::ALL {
            let tag = platform.tag().unwrap();
            assert_eq!(tag.parse::<Platform>().unwrap(), platform);
            assert_eq!(platform.to_string(), tag);
        }
    }

    #[test]
    fn os_arch_form_parses() {
        let p: Platform = "macos-aarch64".parse().unwrap();
        assert_eq!(p, Platform::new(Os::MacOs, Arch::Arm64));

        let p: Platform = "linux-x86_64".parse().unwrap();
        assert_eq!(p.tag(), Some("intel-linux"));
    }

    #[test]
    fn unsupported_host_matches_only_generic_source() {
        for platform in [
            Platform::new(Os::Linux, Arch::Other),
            Platform::new(Os::Other, Arch::X86_64),
            Platform::new(Os::Other, Arch::Other),
        ] {
            assert!(!platform.is_supported());
            assert!(PlatformPredicate::GenericSource.matches(platform));
            for predicate in [
                PlatformPredicate::IntelMac,
                PlatformPredicate::ArmMac,
                PlatformPredicate::IntelLinux,
                PlatformPredicate::ArmLinux,
            ] {
                assert!(!predicate.matches(platform), "{predicate} matched {platform}");
            }
        }
        assert_eq!(Platform::new(Os::Linux, Arch::Other).to_string(), "linux-other");
        assert_eq!("linux-other".parse::<Platform>().unwrap().arch, Arch::Other);
    }

    #[test]
    fn garbage_platform_is_rejected() {
        assert!(matches!(
            "toaster".parse::<Platform>(),
            Err(PlatformParseError::UnknownPlatform(_))
        ));
        assert!(matches!(
            "macos-mips".parse::<Platform>(),
            Err(PlatformParseError::UnknownArch(_))
        ));
    }

    #[test]
    fn prebuilt_predicates_match_exactly_one_platform() {
        for predicate in [
            PlatformPredicate::IntelMac,
            PlatformPredicate::ArmMac,
            PlatformPredicate::IntelLinux,
            PlatformPredicate::ArmLinux,
        ] {
            let hits = Platform::ALL
                .into_iter()
                .filter(|p| predicate.matches(*p))
                .count();
            assert_eq!(hits, 1, "{predicate} should match a single platform");
        }
    }

    #[test]
    fn generic_source_matches_everywhere() {
        assert!(
            Platform::ALL
                .into_iter()
                .all(|p| PlatformPredicate::GenericSource.matches(p))
        );
        assert!(PlatformPredicate::GenericSource.is_source());
    }

    #[test]
    fn predicate_serde_uses_kebab_case() {
        let json = serde_json::to_string(&PlatformPredicate::ArmMac).unwrap();
        assert_eq!(json, "\"arm-mac\"");
        let back: PlatformPredicate = serde_json::from_str("\"generic-source\"").unwrap();
        assert_eq!(back, PlatformPredicate::GenericSource);
    }

    #[test]
    fn serde_and_from_str_accept_the_same_names() {
        for name in ["intel-mac", "arm-mac", "intel-linux", "arm-linux", "generic-source", "source"] {
            let parsed: PlatformPredicate = name.parse().unwrap();
            let decoded: PlatformPredicate = serde_json::from_str(&format!("\"{name}\"")).unwrap();
            assert_eq!(parsed, decoded, "{name}");
        }
    }
}
