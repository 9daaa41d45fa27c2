//! Async artifact fetch with streaming SHA256 verification.
//!
//! Bytes are hashed as they are written; the destination file is removed on
//! any failure, so a path that exists after [`FetchRequest::execute`] returns
//! `Ok` always holds verified content.

use std::path::Path;

use futures::StreamExt;
use keg_schema::{PackageName, Sha256Digest, Version};
use reqwest::Client;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::Reporter;

/// Errors raised while fetching a single artifact.
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Transport-level failure (DNS, connect, TLS, timeout, truncated body).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("{url} returned HTTP {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// Response status code.
        status: u16,
    },

    /// A `file://` artifact does not exist.
    #[error("artifact not found: {0}")]
    NotFound(String),

    /// The URL scheme is neither http(s) nor file.
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// Local filesystem error while writing the artifact.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The artifact's bytes do not hash to the declared digest.
    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        /// Digest declared by the descriptor.
        expected: Sha256Digest,
        /// Digest of the bytes received.
        actual: Sha256Digest,
    },
}

impl DownloadError {
    /// Whether trying the same request again could succeed.
    ///
    /// Integrity mismatches are never retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::NotFound(_) | Self::UnsupportedScheme(_) | Self::Io(_) | Self::HashMismatch { .. } => {
                false
            }
        }
    }
}

/// A single verified fetch.
pub struct FetchRequest<'a> {
    /// Shared HTTP client.
    pub client: &'a Client,
    /// Package being fetched, for progress reporting.
    pub name: &'a PackageName,
    /// Version being fetched, for progress reporting.
    pub version: &'a Version,
    /// `http(s)://` or `file://` location.
    pub url: &'a str,
    /// Where the verified artifact is written.
    pub dest: &'a Path,
    /// Digest the bytes must hash to.
    pub expected: &'a Sha256Digest,
    /// Progress sink.
    pub reporter: &'a dyn Reporter,
}

impl FetchRequest<'_> {
    /// Fetch, hash and verify. Returns the computed digest.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::HashMismatch`] when the content does not match,
    /// or the underlying transport/filesystem error. `dest` never survives a
    /// failed call.
    pub async fn execute(self) -> Result<Sha256Digest, DownloadError> {
        let result = if let Some(path) = self.url.strip_prefix("file://") {
            self.copy_local(Path::new(path)).await
        } else if self.url.starts_with("https://") || self.url.starts_with("http://") {
            self.stream_http().await
        } else {
            return Err(DownloadError::UnsupportedScheme(self.url.to_string()));
        };

        let actual = match result {
            Ok(actual) => actual,
            Err(e) => {
                tokio::fs::remove_file(self.dest).await.ok();
                return Err(e);
            }
        };

        if &actual != self.expected {
            self.reporter.failed(self.name, self.version, "hash mismatch");
            tokio::fs::remove_file(self.dest).await.ok();
            return Err(DownloadError::HashMismatch {
                expected: self.expected.clone(),
                actual,
            });
        }

        Ok(actual)
    }

    async fn stream_http(&self) -> Result<Sha256Digest, DownloadError> {
        let response = self
            .client
            .get(self.url)
            .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                url: self.url.to_string(),
                status: status.as_u16(),
            });
        }

        let total = response.content_length();
        self.reporter.downloading(self.name, self.version, 0, total);

        let mut file = File::create(self.dest).await?;
        let mut stream = response.bytes_stream();
        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            hasher.update(&chunk);
            downloaded += chunk.len() as u64;
            self.reporter
                .downloading(self.name, self.version, downloaded, total);
        }

        file.flush().await?;
        Ok(Sha256Digest::from_bytes(&hasher.finalize()))
    }

    async fn copy_local(&self, src: &Path) -> Result<Sha256Digest, DownloadError> {
        let mut input = match File::open(src).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DownloadError::NotFound(src.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let total = input.metadata().await.ok().map(|m| m.len());
        self.reporter.downloading(self.name, self.version, 0, total);

        let mut output = File::create(self.dest).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; 64 * 1024];
        let mut copied: u64 = 0;

        loop {
            let n = input.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            output.write_all(&buf[..n]).await?;
            hasher.update(&buf[..n]);
            copied += n as u64;
        }

        output.flush().await?;
        self.reporter.downloading(self.name, self.version, copied, total);
        Ok(Sha256Digest::from_bytes(&hasher.finalize()))
    }
}
