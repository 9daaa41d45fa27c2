//! Archive extraction module
//!
//! Handles tar.gz, tar.zst, plain tar and zip. Anything else is treated as a
//! bare executable and copied into place.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use zip::ZipArchive;
use zstd::stream::Decoder as ZstdDecoder;

/// Extraction failures.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// Filesystem error while reading the archive or writing entries.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The archive is malformed or contains an unsafe entry.
    #[error("Archive error: {0}")]
    Archive(String),
}

/// How an artifact is unpacked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// gzip-compressed tarball (`.tar.gz`, `.tgz`).
    TarGz,
    /// zstd-compressed tarball (`.tar.zst`, `.tzst`).
    TarZst,
    /// Uncompressed tarball.
    Tar,
    /// Zip archive.
    Zip,
    /// A single executable, not an archive.
    Binary,
}

impl ArchiveFormat {
    /// Detect the format from a filename's extension.
    pub fn detect(filename: &str) -> Self {
        let lower = filename.to_lowercase();

        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Self::TarGz
        } else if lower.ends_with(".tar.zst") || lower.ends_with(".tzst") {
            Self::TarZst
        } else if lower.ends_with(".tar") {
            Self::Tar
        } else if lower.ends_with(".zip") {
            Self::Zip
        } else {
            Self::Binary
        }
    }
}

/// Unpack `archive` into `dest`.
///
/// A [`ArchiveFormat::Binary`] artifact is copied to `dest/<binary_name>`
/// with mode 0755.
///
/// # Errors
///
/// Returns [`ExtractError::Archive`] for corrupt archives or entries that
/// would escape `dest`.
pub fn extract(
    archive: &Path,
    format: ArchiveFormat,
    dest: &Path,
    binary_name: &str,
) -> Result<(), ExtractError> {
    fs::create_dir_all(dest)?;
    tracing::debug!(archive = %archive.display(), ?format, dest = %dest.display(), "Extracting");

    match format {
        ArchiveFormat::TarGz => {
            let reader = BufReader::new(File::open(archive)?);
            extract_tar(flate2::read::GzDecoder::new(reader), dest)
        }
        ArchiveFormat::TarZst => {
            let reader = BufReader::new(File::open(archive)?);
            extract_tar(ZstdDecoder::new(reader)?, dest)
        }
        ArchiveFormat::Tar => extract_tar(BufReader::new(File::open(archive)?), dest),
        ArchiveFormat::Zip => extract_zip(archive, dest),
        ArchiveFormat::Binary => {
            let target = dest.join(binary_name);
            fs::copy(archive, &target)?;
            set_executable(&target)?;
            Ok(())
        }
    }
}

fn extract_tar<R: Read>(reader: R, dest: &Path) -> Result<(), ExtractError> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_path = entry.path()?.into_owned();

        if entry_path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        {
            return Err(ExtractError::Archive(format!(
                "Invalid path in archive: {}",
                entry_path.display()
            )));
        }

        // `unpack_in` refuses to write through symlinks planted by earlier entries
        if !entry.unpack_in(dest)? {
            return Err(ExtractError::Archive(format!(
                "Archive entry escapes destination: {}",
                entry_path.display()
            )));
        }
    }

    Ok(())
}

fn extract_zip(archive_path: &Path, dest: &Path) -> Result<(), ExtractError> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file).map_err(|e| ExtractError::Archive(e.to_string()))?;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| ExtractError::Archive(e.to_string()))?;
        let Some(relative) = file.enclosed_name() else {
            return Err(ExtractError::Archive(format!(
                "Invalid path in archive: {}",
                file.name()
            )));
        };
        let target = dest.join(relative);

        if file.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut outfile = File::create(&target)?;
        io::copy(&mut file, &mut outfile)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = file.unix_mode() {
                fs::set_permissions(&target, fs::Permissions::from_mode(mode))?;
            }
        }
    }

    Ok(())
}

/// Directory install steps run in: `dest`, or its only child when the
/// archive wraps everything in a single top-level directory.
pub fn working_root(dest: &Path) -> io::Result<PathBuf> {
    let mut entries = fs::read_dir(dest)?.collect::<Result<Vec<_>, _>>()?;
    if entries.len() == 1 && entries[0].file_type()?.is_dir() {
        return Ok(entries.remove(0).path());
    }
    Ok(dest.to_path_buf())
}

/// Mark a file as executable (0755).
pub fn set_executable(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
