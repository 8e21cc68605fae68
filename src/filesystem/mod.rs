// src/filesystem/mod.rs

//! Filesystem operations for blockyard
//!
//! This module provides:
//! - Path checks for manifest- and archive-supplied names
//! - The managed storage arena holding installed component files
//! - ZIP archive extraction and creation
//! - Timestamp-preserving copies and whole-document JSON persistence

pub mod archive;
pub mod path;
mod storage;

pub use storage::ManagedStorage;

use crate::error::Result;
use filetime::FileTime;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

/// Copy one file, creating parent directories and keeping its timestamps
pub fn copy_file_preserving(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(src, dst)?;

    let metadata = fs::metadata(src)?;
    let mtime = FileTime::from_last_modification_time(&metadata);
    let atime = FileTime::from_last_access_time(&metadata);
    filetime::set_file_times(dst, atime, mtime)?;
    Ok(())
}

/// Recursively copy a directory, keeping file timestamps
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| crate::Error::InvalidPath(format!("{}: {}", entry.path().display(), e)))?;
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            copy_file_preserving(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Read a JSON document, treating a missing or unreadable one as empty
///
/// Registries are rebuilt from whatever is installed, so a corrupt document
/// must never stop the process; it is logged and replaced on the next save.
pub fn load_document<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return T::default(),
        Err(e) => {
            warn!("Could not read {}: {}; starting empty", path.display(), e);
            return T::default();
        }
    };
    match serde_json::from_str(&content) {
        Ok(doc) => doc,
        Err(e) => {
            warn!("Could not parse {}: {}; starting empty", path.display(), e);
            T::default()
        }
    }
}

/// Write a JSON document wholesale via a temporary file and rename
pub fn save_document<T: Serialize>(path: &Path, document: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(document)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_copy_file_preserves_mtime() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("a.txt");
        fs::write(&src, "hello").unwrap();
        let old = FileTime::from_unix_time(1_000_000_000, 0);
        filetime::set_file_mtime(&src, old).unwrap();

        let dst = temp.path().join("nested/dir/a.txt");
        copy_file_preserving(&src, &dst).unwrap();

        let meta = fs::metadata(&dst).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&meta), old);
        assert_eq!(fs::read_to_string(&dst).unwrap(), "hello");
    }

    #[test]
    fn test_copy_tree() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("css")).unwrap();
        fs::write(src.join("index.html"), "<html>").unwrap();
        fs::write(src.join("css/site.css"), "body{}").unwrap();

        let dst = temp.path().join("dst");
        copy_tree(&src, &dst).unwrap();
        assert!(dst.join("index.html").is_file());
        assert!(dst.join("css/site.css").is_file());
    }

    #[test]
    fn test_copy_tree_missing_source_is_walk_error() {
        let temp = TempDir::new().unwrap();
        let result = copy_tree(&temp.path().join("absent"), &temp.path().join("dst"));
        assert!(matches!(result, Err(crate::Error::Walk(_))));
    }

    #[test]
    fn test_document_missing_or_corrupt_is_empty() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("registry.json");

        let doc: BTreeMap<String, u32> = load_document(&path);
        assert!(doc.is_empty());

        fs::write(&path, "{ not json").unwrap();
        let doc: BTreeMap<String, u32> = load_document(&path);
        assert!(doc.is_empty());
    }

    #[test]
    fn test_document_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sub/registry.json");

        let doc = BTreeMap::from([("a@1.0.0".to_string(), 1u32)]);
        save_document(&path, &doc).unwrap();
        let loaded: BTreeMap<String, u32> = load_document(&path);
        assert_eq!(loaded, doc);
        assert!(!path.with_extension("json.tmp").exists());
    }
}
