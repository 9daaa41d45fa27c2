//! Streaming SHA-256 helpers.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use keg_schema::Sha256Digest;
use sha2::{Digest, Sha256};

/// Hash everything readable from `reader`.
pub fn sha256_reader<R: Read>(mut reader: R) -> io::Result<Sha256Digest> {
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(Sha256Digest::from_bytes(&hasher.finalize()))
}

/// Hash a file on disk without loading it into memory.
pub fn sha256_file(path: &Path) -> io::Result<Sha256Digest> {
    sha256_reader(BufReader::new(File::open(path)?))
}

/// Hash an in-memory buffer.
pub fn sha256_bytes(data: &[u8]) -> Sha256Digest {
    Sha256Digest::from_bytes(&Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
    const HELLO: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn known_digests() {
        assert_eq!(sha256_bytes(b"").as_str(), EMPTY);
        assert_eq!(sha256_bytes(b"hello").as_str(), HELLO);
    }

    #[test]
    fn file_and_bytes_agree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact");
        std::fs::write(&path, b"hello").unwrap();
        assert_eq!(sha256_file(&path).unwrap(), sha256_bytes(b"hello"));
    }
}
