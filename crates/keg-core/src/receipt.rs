//! Install receipts: one JSON record per installed `(name, version)`.
//!
//! A receipt pins the exact artifact that was installed. Installing the same
//! version again is only allowed with the same digest.

use std::fs;
use std::path::{Path, PathBuf};

use keg_schema::{PackageName, Platform, Sha256Digest, Version};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use walkdir::WalkDir;

/// Receipt store failures.
#[derive(Error, Debug)]
pub enum ReceiptError {
    /// Filesystem error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A receipt on disk is not valid JSON.
    #[error("corrupt receipt {path}: {source}")]
    Json {
        /// Receipt file.
        path: PathBuf,
        /// Decode error.
        #[source]
        source: serde_json::Error,
    },
}

/// Record of one completed install.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Receipt {
    /// Package name.
    pub name: PackageName,
    /// Installed version.
    pub version: Version,
    /// Platform the variant was resolved for.
    pub platform: Platform,
    /// Artifact URL.
    pub url: String,
    /// Verified digest of the artifact.
    pub sha256: Sha256Digest,
    /// Build dependency of the variant, if it was built from source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_dep: Option<String>,
    /// Unix timestamp of the install.
    pub installed_at: i64,
    /// Files under the prefix, relative to it.
    #[serde(default)]
    pub files: Vec<String>,
    /// Whether the smoke test passed.
    pub verified: bool,
}

/// Directory of receipts laid out as `<dir>/<name>/<version>.json`.
#[derive(Debug, Clone)]
pub struct ReceiptStore {
    dir: PathBuf,
}

impl ReceiptStore {
    /// Open the store rooted at `dir`. Nothing is created until a save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, name: &str, version: &str) -> PathBuf {
        self.dir.join(name).join(format!("{version}.json"))
    }

    /// Load the receipt for `name` at `version`, if one exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the receipt exists but cannot be read or decoded.
    pub fn load(&self, name: &str, version: &str) -> Result<Option<Receipt>, ReceiptError> {
        let path = self.path(name, version);
        if !path.exists() {
            return Ok(None);
        }
        read_receipt(&path).map(Some)
    }

    /// Write `receipt`, replacing any previous one for the same version.
    ///
    /// # Errors
    ///
    /// Returns an error if the receipt cannot be written.
    pub fn save(&self, receipt: &Receipt) -> Result<PathBuf, ReceiptError> {
        let path = self.path(&receipt.name, &receipt.version);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(receipt).map_err(|source| ReceiptError::Json {
            path: path.clone(),
            source,
        })?;

        // Write-then-rename so a crash never leaves a truncated receipt
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        Ok(path)
    }

    /// Every receipt in the store, sorted by name then version.
    ///
    /// # Errors
    ///
    /// Returns the first unreadable receipt.
    pub fn list(&self) -> Result<Vec<Receipt>, ReceiptError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut receipts = Vec::new();
        for entry in WalkDir::new(&self.dir).min_depth(2).max_depth(2) {
            let entry = entry.map_err(|e| ReceiptError::Io(e.into()))?;
            if entry.path().extension().is_some_and(|ext| ext == "json") {
                receipts.push(read_receipt(entry.path())?);
            }
        }

        receipts.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.version.cmp(&b.version)));
        Ok(receipts)
    }
}

fn read_receipt(path: &Path) -> Result<Receipt, ReceiptError> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|source| ReceiptError::Json {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::hash::sha256_bytes;

    fn receipt(version: &str) -> Receipt {
        Receipt {
            name: "brewup".into(),
            version: version.into(),
            platform: "arm-mac".parse().unwrap(),
            url: format!("https://example.com/brewup-v{version}.tar.gz"),
            sha256: sha256_bytes(version.as_bytes()),
            build_dep: None,
            installed_at: 1_700_000_000,
            files: vec!["bin/brewup".into()],
            verified: true,
        }
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReceiptStore::new(dir.path());

        assert!(store.load("brewup", "0.1.0").unwrap().is_none());
        let path = store.save(&receipt("0.1.0")).unwrap();
        assert_eq!(path, dir.path().join("brewup/0.1.0.json"));
        assert_eq!(store.load("brewup", "0.1.0").unwrap(), Some(receipt("0.1.0")));
    }

    #[test]
    fn list_is_sorted_by_semver() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReceiptStore::new(dir.path());
        for v in ["0.10.0", "0.2.0", "0.1.0"] {
            store.save(&receipt(v)).unwrap();
        }

        let versions: Vec<String> = store
            .list()
            .unwrap()
            .into_iter()
            .map(|r| r.version.to_string())
            .collect();
        assert_eq!(versions, ["0.1.0", "0.2.0", "0.10.0"]);
    }

    #[test]
    fn corrupt_receipt_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("brewup")).unwrap();
        fs::write(dir.path().join("brewup/0.1.0.json"), b"{not json").unwrap();

        let err = ReceiptStore::new(dir.path()).load("brewup", "0.1.0").unwrap_err();
        assert!(matches!(err, ReceiptError::Json { .. }));
    }

    #[test]
    fn missing_store_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReceiptStore::new(dir.path().join("absent"));
        assert!(store.list().unwrap().is_empty());
    }
}
