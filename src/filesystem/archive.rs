// src/filesystem/archive.rs

//! ZIP archives for compiled components and packages
//!
//! An archive holds `manifest.json` at its top level, every declared file at
//! its path relative to the unit's directory, and a comment identifying the
//! unit and the tool that produced it. Package archives additionally carry
//! nested component archives referenced from their manifest as fallbacks.

use super::path::sanitize_relative;
use crate::error::{Error, Result};
use std::fs;
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;
use tempfile::TempDir;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Fixed name of the manifest at the archive root
pub const MANIFEST_NAME: &str = "manifest.json";

/// File name for a unit's archive; scoped names lose their slash
pub fn archive_file_name(combined_id: &str) -> String {
    format!("{}.zip", combined_id.replace(['/', '\\'], "+"))
}

/// Extract an archive file into `dst`
pub fn extract_file(archive: &Path, dst: &Path) -> Result<()> {
    let file = fs::File::open(archive)?;
    extract(file, dst)
}

/// Extract archive bytes into `dst`
///
/// Entries whose names would land outside `dst` fail the whole extraction.
pub fn extract<R: Read + Seek>(reader: R, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;
    let mut zip = ZipArchive::new(reader)?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let name = entry.name().to_string();
        if name.is_empty() || name == "/" {
            continue;
        }
        let out = dst.join(sanitize_relative(&name)?);
        if entry.is_dir() {
            fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = fs::File::create(&out)?;
        std::io::copy(&mut entry, &mut writer)?;
    }
    Ok(())
}

/// Extract an install archive into a fresh directory under `tmp_root`
///
/// The archive must carry `manifest.json` at its root. The directory is
/// removed when the returned guard drops, whatever the install's outcome.
pub fn unpack_to_temp(archive: &Path, tmp_root: &Path) -> Result<TempDir> {
    fs::create_dir_all(tmp_root)?;
    let extracted = tempfile::Builder::new()
        .prefix("unpack-")
        .tempdir_in(tmp_root)?;
    extract_file(archive, extracted.path())?;
    if !extracted.path().join(MANIFEST_NAME).is_file() {
        return Err(Error::InvalidManifest(format!(
            "{} has no {} at its root",
            archive.display(),
            MANIFEST_NAME
        )));
    }
    debug!("Unpacked {} to {}", archive.display(), extracted.path().display());
    Ok(extracted)
}

/// Read the comment of an in-memory archive
pub fn read_comment(bytes: &[u8]) -> Result<String> {
    let zip = ZipArchive::new(Cursor::new(bytes))?;
    Ok(String::from_utf8_lossy(zip.comment()).into_owned())
}

/// List entry names of an in-memory archive
pub fn entry_names(bytes: &[u8]) -> Result<Vec<String>> {
    let zip = ZipArchive::new(Cursor::new(bytes))?;
    Ok(zip.file_names().map(str::to_string).collect())
}

/// Builds an archive in memory
pub struct ArchiveWriter {
    zip: ZipWriter<Cursor<Vec<u8>>>,
    options: SimpleFileOptions,
}

impl ArchiveWriter {
    pub fn new() -> Self {
        Self {
            zip: ZipWriter::new(Cursor::new(Vec::new())),
            options: SimpleFileOptions::default().compression_method(CompressionMethod::Deflated),
        }
    }

    /// Add an entry from memory
    pub fn add_bytes(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        let name = sanitize_relative(name)?;
        let name = name
            .to_str()
            .ok_or_else(|| Error::InvalidPath(format!("Non UTF-8 entry name {}", name.display())))?
            .replace('\\', "/");
        self.zip.start_file(name, self.options)?;
        self.zip.write_all(bytes)?;
        Ok(())
    }

    /// Add an entry from a file on disk
    pub fn add_file(&mut self, name: &str, path: &Path) -> Result<()> {
        let bytes = fs::read(path)?;
        self.add_bytes(name, &bytes)
    }

    /// Finish the archive with a comment and return its bytes
    pub fn finish(mut self, comment: &str) -> Result<Vec<u8>> {
        self.zip.set_comment(comment);
        Ok(self.zip.finish()?.into_inner())
    }
}

impl Default for ArchiveWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_extract() {
        let mut writer = ArchiveWriter::new();
        writer.add_bytes(MANIFEST_NAME, b"{}").unwrap();
        writer.add_bytes("js/app.js", b"run()").unwrap();
        let bytes = writer.finish("button@1.0.0 (component)").unwrap();

        assert_eq!(read_comment(&bytes).unwrap(), "button@1.0.0 (component)");
        let mut names = entry_names(&bytes).unwrap();
        names.sort();
        assert_eq!(names, vec!["js/app.js", "manifest.json"]);

        let temp = TempDir::new().unwrap();
        extract(Cursor::new(bytes), temp.path()).unwrap();
        assert_eq!(fs::read_to_string(temp.path().join("js/app.js")).unwrap(), "run()");
        assert!(temp.path().join(MANIFEST_NAME).is_file());
    }

    #[test]
    fn test_writer_rejects_escaping_names() {
        let mut writer = ArchiveWriter::new();
        assert!(writer.add_bytes("../evil", b"x").is_err());
    }

    #[test]
    fn test_extract_rejects_escaping_entries() {
        // Build the archive with the raw writer to get a hostile name in
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file("../escape.txt", SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"x").unwrap();
        let bytes = zip.finish().unwrap().into_inner();

        let temp = TempDir::new().unwrap();
        let dst = temp.path().join("out");
        assert!(extract(Cursor::new(bytes), &dst).is_err());
        assert!(!temp.path().join("escape.txt").exists());
    }

    #[test]
    fn test_unpack_to_temp_requires_manifest() {
        let temp = TempDir::new().unwrap();
        let mut writer = ArchiveWriter::new();
        writer.add_bytes("index.html", b"<html>").unwrap();
        let bare = temp.path().join("bare.zip");
        fs::write(&bare, writer.finish("bare").unwrap()).unwrap();

        let tmp_root = temp.path().join("tmp");
        assert!(matches!(
            unpack_to_temp(&bare, &tmp_root),
            Err(Error::InvalidManifest(_))
        ));
        assert_eq!(fs::read_dir(&tmp_root).unwrap().count(), 0);

        let mut writer = ArchiveWriter::new();
        writer.add_bytes(MANIFEST_NAME, b"{}").unwrap();
        let full = temp.path().join("full.zip");
        fs::write(&full, writer.finish("full").unwrap()).unwrap();
        let unpacked = unpack_to_temp(&full, &tmp_root).unwrap();
        assert!(unpacked.path().join(MANIFEST_NAME).is_file());
        let dir = unpacked.path().to_path_buf();
        drop(unpacked);
        assert!(!dir.exists());
    }

    #[test]
    fn test_archive_file_name() {
        assert_eq!(archive_file_name("button@1.0.0"), "button@1.0.0.zip");
        assert_eq!(archive_file_name("@ui/button@1.0.0"), "@ui+button@1.0.0.zip");
    }
}
