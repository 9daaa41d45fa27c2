//! Host operating system and CPU architecture.

use serde::{Deserialize, Serialize};

use crate::platform::PlatformParseError;

/// CPU architecture of the machine running the pipeline.
///
/// Used together with [`Os`] to decide which prebuilt source variant of a
/// descriptor applies.
///
/// # Example
///
/// ```
/// use keg_schema::Arch;
///
/// let current = Arch::current();
/// println!("Running on: {}", current);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    /// ARM64 architecture (Apple Silicon, Graviton, etc.)
    Arm64,
    /// `x86_64` architecture (Intel / AMD)
    X86_64,
    /// Any other architecture. No prebuilt variant targets it.
    Other,
}

impl Arch {
    /// Get the current architecture
    pub fn current() -> Self {
        #[cfg(target_arch = "aarch64")]
        {
            Self::Arm64
        }
        #[cfg(target_arch = "x86_64")]
        {
            Self::X86_64
        }
        #[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64")))]
        {
            Self::Other
        }
    }

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Arm64 => "arm64",
            Self::X86_64 => "x86_64",
            Self::Other => "other",
        }
    }

    /// Rust-convention architecture name (`aarch64` / `x86_64`).
    ///
    /// Matches `std::env::consts::ARCH` and the target triples used in
    /// release asset names such as `brewup-v0.1.0-aarch64-apple-darwin`.
    /// `Other` reports the compiled-for architecture.
    pub fn rust_name(&self) -> &'static str {
        match self {
            Self::Arm64 => "aarch64",
            Self::X86_64 => "x86_64",
            Self::Other => std::env::consts::ARCH,
        }
    }
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Arch {
    type Err = PlatformParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "arm64" | "aarch64" | "arm" => Ok(Self::Arm64),
            "x86_64" | "amd64" | "x64" | "intel" => Ok(Self::X86_64),
            "other" => Ok(Self::Other),
            _ => Err(PlatformParseError::UnknownArch(s.to_string())),
        }
    }
}

/// Operating system family of the machine running the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    /// macOS (Darwin)
    MacOs,
    /// Linux
    Linux,
    /// Any other operating system. No prebuilt variant targets it.
    Other,
}

impl Os {
    /// Get the current operating system.
    pub fn current() -> Self {
        #[cfg(target_os = "macos")]
        {
            Self::MacOs
        }
        #[cfg(target_os = "linux")]
        {
            Self::Linux
        }
        #[cfg(not(any(target_os = "macos", target_os = "linux")))]
        {
            Self::Other
        }
    }

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MacOs => "macos",
            Self::Linux => "linux",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for Os {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Os {
    type Err = PlatformParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "macos" | "darwin" | "mac" | "osx" => Ok(Self::MacOs),
            "linux" => Ok(Self::Linux),
            "other" => Ok(Self::Other),
            _ => Err(PlatformParseError::UnknownOs(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arch_aliases_parse() {
        assert_eq!("aarch64".parse::<Arch>().unwrap(), Arch::Arm64);
        assert_eq!("ARM64".parse::<Arch>().unwrap(), Arch::Arm64);
        assert_eq!("amd64".parse::<Arch>().unwrap(), Arch::X86_64);
        assert_eq!("other".parse::<Arch>().unwrap(), Arch::Other);
        assert!("sparc".parse::<Arch>().is_err());
    }

    #[test]
    fn os_aliases_parse() {
        assert_eq!("darwin".parse::<Os>().unwrap(), Os::MacOs);
        assert_eq!("Linux".parse::<Os>().unwrap(), Os::Linux);
        assert!("plan9".parse::<Os>().is_err());
    }

    #[test]
    fn rust_name_matches_std_consts() {
        assert_eq!(Arch::current().rust_name(), std::env::consts::ARCH);
    }

    #[test]
    fn current_is_other_off_supported_targets() {
        let supported_arch = cfg!(any(target_arch = "aarch64", target_arch = "x86_64"));
        assert_eq!(Arch::current() == Arch::Other, !supported_arch);

        let supported_os = cfg!(any(target_os = "macos", target_os = "linux"));
        assert_eq!(Os::current() == Os::Other, !supported_os);
    }
}
