//! Archive extraction into deployment slots
//!
//! Supports gzip-compressed tar, plain tar and zip. The format is taken from
//! the file name when it carries a known suffix, otherwise from magic bytes.

use crate::error::{PullshipError, PullshipResult};
use flate2::read::GzDecoder;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tokio::task::spawn_blocking;
use tracing::debug;

/// Supported archive formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// `.tar.gz` / `.tgz`
    TarGz,
    /// `.tar`
    Tar,
    /// `.zip`
    Zip,
}

impl ArchiveFormat {
    /// Format implied by a file name suffix
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else if name.ends_with(".zip") {
            Some(Self::Zip)
        } else {
            None
        }
    }

    /// Format implied by the leading bytes of an archive
    pub fn sniff(header: &[u8]) -> Option<Self> {
        if header.starts_with(&[0x1f, 0x8b]) {
            Some(Self::TarGz)
        } else if header.starts_with(b"PK\x03\x04") || header.starts_with(b"PK\x05\x06") {
            Some(Self::Zip)
        } else if header.len() >= 262 && &header[257..262] == b"ustar" {
            Some(Self::Tar)
        } else {
            None
        }
    }

    /// Detect the format of the archive at `path`
    pub fn detect(path: &Path) -> PullshipResult<Self> {
        let by_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(Self::from_name);
        if let Some(format) = by_name {
            return Ok(format);
        }

        let mut header = Vec::with_capacity(512);
        File::open(path)
            .and_then(|f| f.take(512).read_to_end(&mut header))
            .map_err(|e| PullshipError::io(format!("reading {}", path.display()), e))?;

        Self::sniff(&header).ok_or_else(|| PullshipError::UnsupportedArchive(path.to_path_buf()))
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TarGz => "tar.gz",
            Self::Tar => "tar",
            Self::Zip => "zip",
        };
        write!(f, "{}", name)
    }
}

/// Extract `archive` into `dest` on the blocking pool
pub async fn extract(archive: &Path, dest: &Path) -> PullshipResult<ArchiveFormat> {
    let archive = archive.to_owned();
    let dest = dest.to_owned();
    spawn_blocking(move || extract_sync(&archive, &dest))
        .await
        .map_err(|e| PullshipError::Internal(format!("extraction task failed: {}", e)))?
}

/// Extract `archive` into the existing directory `dest`
pub fn extract_sync(archive: &Path, dest: &Path) -> PullshipResult<ArchiveFormat> {
    let format = ArchiveFormat::detect(archive)?;
    let failed = |reason: String| PullshipError::ArchiveExtraction {
        archive: archive.to_path_buf(),
        dest: dest.to_path_buf(),
        reason,
    };

    let file = File::open(archive).map_err(|e| failed(e.to_string()))?;
    let result = match format {
        ArchiveFormat::TarGz => unpack_tar(GzDecoder::new(BufReader::new(file)), dest),
        ArchiveFormat::Tar => unpack_tar(BufReader::new(file), dest),
        ArchiveFormat::Zip => unpack_zip(file, dest),
    };
    result.map_err(|e| failed(e.to_string()))?;

    debug!("Extracted {} archive {} to {}", format, archive.display(), dest.display());
    Ok(format)
}

fn unpack_tar<R: Read>(reader: R, dest: &Path) -> io::Result<()> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    // `unpack` refuses entries that would land outside `dest`
    archive.unpack(dest)
}

fn unpack_zip<R: Read + Seek>(mut reader: R, dest: &Path) -> io::Result<()> {
    reader.seek(SeekFrom::Start(0))?;
    let mut archive = zip::ZipArchive::new(reader).map_err(io::Error::other)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(io::Error::other)?;
        let relative = entry.enclosed_name().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("entry escapes destination: {}", entry.name()),
            )
        })?;
        let out = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out)?;
            continue;
        }

        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&out)?;
        io::copy(&mut entry, &mut file)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&out, fs::Permissions::from_mode(mode & 0o7777))?;
        }
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    /// Build a tar.gz holding `files` (path, contents)
    pub(crate) fn tar_gz(files: &[(&str, &[u8])]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append_data(&mut header, path, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    /// Build a zip holding `files` (path, contents)
    pub(crate) fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default().unix_permissions(0o755);
        for (path, data) in files {
            writer.start_file(*path, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn format_from_name() {
        assert_eq!(ArchiveFormat::from_name("app-linux.tar.gz"), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::from_name("APP.TGZ"), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::from_name("app.tar"), Some(ArchiveFormat::Tar));
        assert_eq!(ArchiveFormat::from_name("app.zip"), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::from_name("app.rar"), None);
    }

    #[test]
    fn format_from_magic() {
        assert_eq!(ArchiveFormat::sniff(&tar_gz(&[("a", b"1")])), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::sniff(&zip_bytes(&[("a", b"1")])), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::sniff(b"plain text"), None);
    }

    #[tokio::test]
    async fn extracts_tar_gz() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("app.tar.gz");
        std::fs::write(&archive, tar_gz(&[("bin/app", b"#!/bin/sh\n"), ("README", b"hi")])).unwrap();
        let dest = dir.path().join("out");
        std::fs::create_dir(&dest).unwrap();

        let format = extract(&archive, &dest).await.unwrap();

        assert_eq!(format, ArchiveFormat::TarGz);
        assert_eq!(std::fs::read(dest.join("bin/app")).unwrap(), b"#!/bin/sh\n");
        assert_eq!(std::fs::read(dest.join("README")).unwrap(), b"hi");
    }

    #[tokio::test]
    async fn extracts_zip_by_magic() {
        let dir = TempDir::new().unwrap();
        // No suffix: format comes from the content
        let archive = dir.path().join("github.com--1-artifact");
        std::fs::write(&archive, zip_bytes(&[("nested/app", b"binary")])).unwrap();
        let dest = dir.path().join("out");
        std::fs::create_dir(&dest).unwrap();

        let format = extract(&archive, &dest).await.unwrap();

        assert_eq!(format, ArchiveFormat::Zip);
        assert_eq!(std::fs::read(dest.join("nested/app")).unwrap(), b"binary");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(dest.join("nested/app")).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[tokio::test]
    async fn corrupt_archive_is_extraction_error() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("app.tar.gz");
        std::fs::write(&archive, b"\x1f\x8bnot really gzip").unwrap();
        let dest = dir.path().join("out");
        std::fs::create_dir(&dest).unwrap();

        let err = extract(&archive, &dest).await.unwrap_err();
        assert!(matches!(err, PullshipError::ArchiveExtraction { .. }));
    }

    #[tokio::test]
    async fn unknown_format_is_unsupported() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("artifact.bin");
        std::fs::write(&archive, b"just bytes").unwrap();

        let err = extract(&archive, dir.path()).await.unwrap_err();
        assert!(matches!(err, PullshipError::UnsupportedArchive(_)));
    }
}
