//! Filesystem layout of a keg home.
//!
//! ```text
//! ~/.keg/
//! ├── bin/                      # Symlinks to installed binaries
//! ├── Cellar/<name>/<version>/  # Install prefixes
//! ├── cache/                    # Verified artifacts, keyed by sha256
//! ├── receipts/<name>/<version>.json
//! └── tmp/                      # Staging (same volume as Cellar)
//! ```

use std::path::{Path, PathBuf};

use dirs::home_dir;

/// Root-relative paths for one keg home directory.
///
/// Library code always receives a `Paths` value; only [`Paths::from_env`]
/// consults the process environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    home: PathBuf,
}

impl Paths {
    /// Use `home` as the keg home directory.
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// Resolve the home from `KEG_HOME`, falling back to `~/.keg`.
    ///
    /// Returns `None` if neither is available.
    pub fn from_env() -> Option<Self> {
        if let Ok(val) = std::env::var("KEG_HOME") {
            return Some(Self::new(val));
        }
        home_dir().map(|h| Self::new(h.join(".keg")))
    }

    /// The home directory itself.
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Binary link target: ~/.keg/bin
    pub fn bin(&self) -> PathBuf {
        self.home.join("bin")
    }

    /// Install prefixes: ~/.keg/Cellar
    pub fn cellar(&self) -> PathBuf {
        self.home.join("Cellar")
    }

    /// Artifact cache: ~/.keg/cache
    pub fn cache(&self) -> PathBuf {
        self.home.join("cache")
    }

    /// Install receipts: ~/.keg/receipts
    pub fn receipts(&self) -> PathBuf {
        self.home.join("receipts")
    }

    /// Temp path: ~/.keg/tmp (guaranteed same volume as the Cellar)
    pub fn tmp(&self) -> PathBuf {
        self.home.join("tmp")
    }

    /// Final install prefix for `name` at `version`.
    pub fn prefix_for(&self, name: &str, version: &str) -> PathBuf {
        self.cellar().join(name).join(version)
    }

    /// Create every directory of the layout.
    ///
    /// # Errors
    ///
    /// Returns the first I/O error hit while creating a directory.
    pub fn ensure(&self) -> std::io::Result<()> {
        for dir in [
            self.bin(),
            self.cellar(),
            self.cache(),
            self.receipts(),
            self.tmp(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Extract the filename from a URL.
pub fn filename_from_url(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.split('/').next_back().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_rooted_at_home() {
        let paths = Paths::new("/opt/keg");
        assert_eq!(paths.bin(), PathBuf::from("/opt/keg/bin"));
        assert_eq!(
            paths.prefix_for("brewup", "0.1.0"),
            PathBuf::from("/opt/keg/Cellar/brewup/0.1.0")
        );
    }

    #[test]
    fn filename_from_url_strips_query() {
        assert_eq!(
            filename_from_url("https://example.com/dl/brewup-v0.1.0.tar.gz?raw=1"),
            "brewup-v0.1.0.tar.gz"
        );
        assert_eq!(filename_from_url("file:///tmp/tool"), "tool");
        assert_eq!(filename_from_url(""), "");
    }

    #[test]
    fn ensure_creates_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = Paths::new(tmp.path().join("home"));
        paths.ensure().unwrap();
        assert!(paths.cellar().is_dir());
        assert!(paths.tmp().is_dir());
    }
}
