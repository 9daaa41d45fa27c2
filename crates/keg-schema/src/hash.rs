//! SHA-256 newtypes: a lenient author-supplied hash and a validated digest.

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Reasons a string is not a usable SHA-256 digest.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DigestError {
    /// The hex portion is not 64 characters long.
    #[error("Invalid SHA256 digest: expected 64 hex characters, got {len} in '{value}'")]
    InvalidLength {
        /// Length of the hex portion.
        len: usize,
        /// The offending input.
        value: String,
    },

    /// The input contains characters outside `[0-9a-fA-F]`.
    #[error("Invalid SHA256 digest: contains non-hex characters in '{0}'")]
    NonHex(String),
}

/// Newtype for a SHA256 hash string as written by a descriptor author.
///
/// Not validated on construction so that descriptors carrying placeholders
/// (`REPLACE_WITH_ACTUAL_SHA256`) still load and can be reported on. Convert
/// with [`to_digest`](Self::to_digest) before trusting it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Sha256Hash(String);

impl Sha256Hash {
    /// Create a new `Sha256Hash` without validation.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Validate into a [`Sha256Digest`].
    ///
    /// # Errors
    ///
    /// Returns [`DigestError`] if the string is not 64 hex characters
    /// (optionally prefixed with `sha256:`).
    pub fn to_digest(&self) -> Result<Sha256Digest, DigestError> {
        Sha256Digest::new(self.0.as_str())
    }

    /// Return the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Sha256Hash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for Sha256Hash {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for Sha256Hash {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A validated SHA256 digest (64 lowercase hex characters)
///
/// This newtype ensures that all digests in the system are validated at deserialization time,
/// preventing invalid hex strings from propagating through the codebase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Sha256Digest(String);

impl Sha256Digest {
    /// Create a new `Sha256Digest`, validating the input.
    ///
    /// Accepts strings with or without a `sha256:` prefix and normalises to
    /// lowercase.
    ///
    /// # Errors
    ///
    /// Returns an error if the hex portion is not exactly 64 ASCII hex characters.
    pub fn new(s: impl Into<String>) -> Result<Self, DigestError> {
        let s = s.into();
        let hex = s.strip_prefix("sha256:").unwrap_or(&s);

        if hex.len() != 64 {
            return Err(DigestError::InvalidLength {
                len: hex.len(),
                value: s.clone(),
            });
        }

        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DigestError::NonHex(s.clone()));
        }

        Ok(Self(hex.to_lowercase()))
    }

    /// Build a digest from the raw 32-byte output of a SHA-256 hasher.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        debug_assert_eq!(bytes.len(), 32, "SHA-256 output is 32 bytes");
        Self(hex::encode(bytes))
    }

    /// Get the digest as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Sha256Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Sha256Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Implement conversion from stricter digest to looser hash
impl From<Sha256Digest> for Sha256Hash {
    fn from(digest: Sha256Digest) -> Self {
        Sha256Hash::new(digest.0)
    }
}
