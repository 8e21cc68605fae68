// src/componentizer/install.rs

//! Component installation from manifests and archives

use super::{Componentizer, HOLDER, InstalledComponent, release_now};
use crate::error::{Error, Result};
use crate::filesystem::archive::{self, MANIFEST_NAME};
use crate::filesystem::copy_file_preserving;
use crate::filesystem::path::relative_within;
use crate::manifest::{ComponentManifest, DEFAULT_INDEX_FILE};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

/// Expand declared glob patterns against `base`
///
/// Returns matched regular files relative to `base`, sorted and without
/// duplicates. A match naming a directory contributes every file under it.
/// `manifest.json` at the top of `base` is never part of the result.
pub(crate) fn collect_files(base: &Path, patterns: &[String]) -> Result<Vec<PathBuf>> {
    let escaped_base = glob::Pattern::escape(&base.to_string_lossy());
    let mut files = BTreeSet::new();

    for pattern in patterns {
        let full = format!("{}/{}", escaped_base, pattern);
        for entry in glob::glob(&full)? {
            let path = entry?;
            if path.is_dir() {
                for sub in WalkDir::new(&path).min_depth(1) {
                    let sub = sub?;
                    if sub.file_type().is_file() {
                        files.insert(relative_within(base, sub.path())?);
                    }
                }
            } else if path.is_file() {
                files.insert(relative_within(base, &path)?);
            }
        }
    }

    files.remove(Path::new(MANIFEST_NAME));
    Ok(files.into_iter().collect())
}

/// Resolve the index file inside an installed directory
///
/// A directory resolves to the `index.html` inside it. The result must be a
/// regular file.
fn resolve_index(dir: &Path, index_file: &str) -> Result<String> {
    let mut relative = PathBuf::from(index_file);
    if dir.join(&relative).is_dir() {
        relative.push(DEFAULT_INDEX_FILE);
    }
    if !dir.join(&relative).is_file() {
        return Err(Error::NotFound(format!(
            "Index file {} is not a regular file",
            relative.display()
        )));
    }
    Ok(relative.to_string_lossy().replace('\\', "/"))
}

impl Componentizer {
    /// Install a component from its JSON manifest
    ///
    /// Returns the combined id, or `None` when that version is already
    /// installed and `force` is not set. A forced reinstall replaces the
    /// record; the old directory is released on commit.
    pub fn add_component_from_json(&mut self, manifest_path: &Path, force: bool) -> Result<Option<String>> {
        let mut component = ComponentManifest::from_file(manifest_path)?.validate()?;
        let combined = component.combined_id();

        let previous = match self.components.get(&combined) {
            Some(_) if !force => {
                info!("Component {} is already installed", combined);
                return Ok(None);
            }
            Some(existing) => {
                warn!("Component {} is already installed, replacing it", combined);
                Some(existing.clone())
            }
            None => None,
        };

        let base = manifest_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let files = collect_files(base, &component.files)?;
        if files.is_empty() {
            return Err(Error::InvalidManifest(format!(
                "No files of {} match its declared patterns",
                combined
            )));
        }

        let location = self.storage.allocate()?;
        let installed = self
            .storage
            .path_of(&location)
            .and_then(|dir| copy_into(base, &dir, &files).map(|()| dir))
            .and_then(|dir| resolve_index(&dir, &component.index_file));
        let index_file = match installed {
            Ok(index_file) => index_file,
            Err(e) => {
                release_now(&self.storage, &location);
                return Err(e);
            }
        };
        component.index_file = index_file;

        let key = component.node_key();
        self.components.insert(
            combined.clone(),
            InstalledComponent {
                component,
                location: location.clone(),
            },
        );
        let node_added = self.graph.add_node(key.clone());

        if let Err(e) = self.save() {
            match previous {
                Some(old) => {
                    self.components.insert(combined.clone(), old);
                }
                None => {
                    self.components.remove(&combined);
                    if node_added {
                        self.graph.remove_node(&key);
                    }
                }
            }
            release_now(&self.storage, &location);
            return Err(e);
        }

        let storage = self.storage.clone();
        let fresh = location.clone();
        self.transact
            .after_decline(HOLDER, move || storage.release(&fresh));
        if let Some(old) = previous {
            self.release_on_commit(old.location)?;
        }

        info!("Installed component {} ({} files)", combined, files.len());
        Ok(Some(combined))
    }

    /// Install a component from a ZIP archive with `manifest.json` at its root
    pub fn add_component_from_zip(&mut self, archive_path: &Path, force: bool) -> Result<Option<String>> {
        let extracted = archive::unpack_to_temp(archive_path, &self.config.tmp_dir())?;
        self.add_component_from_json(&extracted.path().join(MANIFEST_NAME), force)
    }

    /// Install a component from a `.json` manifest or a `.zip` archive
    pub fn add_component(&mut self, path: &Path, force: bool) -> Result<Option<String>> {
        match extension_of(path).as_deref() {
            Some("json") => self.add_component_from_json(path, force),
            Some("zip") => self.add_component_from_zip(path, force),
            _ => Err(Error::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Lowercased file extension
pub(crate) fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
}

fn copy_into(base: &Path, dir: &Path, files: &[PathBuf]) -> Result<()> {
    for file in files {
        copy_file_preserving(&base.join(file), &dir.join(file))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::tests::{componentizer, write_component};
    use super::*;
    use filetime::FileTime;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_install_then_fetch_as_is_equals_manifest() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let manifest = write_component(&src, "button", "1.2.0", Some("1.0.0"));
        let expected = ComponentManifest::from_file(&manifest).unwrap().validate().unwrap();

        let mut c = componentizer(&temp.path().join("store"));
        let id = c.add_component_from_json(&manifest, false).unwrap();
        assert_eq!(id.as_deref(), Some("button@1.2.0"));

        let fetched = c.get_component("button", true).unwrap().unwrap();
        assert_eq!(fetched.component, expected);
        assert_eq!(fetched.component.files, vec!["index.html", "js/*.js"]);
    }

    #[test]
    fn test_install_copies_files_with_timestamps() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let manifest = write_component(&src, "button", "1.0.0", None);
        let old = FileTime::from_unix_time(1_200_000_000, 0);
        filetime::set_file_mtime(src.join("js/app.js"), old).unwrap();

        let mut c = componentizer(&temp.path().join("store"));
        c.add_component_from_json(&manifest, false).unwrap();

        let record = c.get("button@1.0.0").unwrap();
        let dir = c.storage().path_of(&record.location).unwrap();
        let meta = fs::metadata(dir.join("js/app.js")).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&meta), old);
        assert!(!dir.join(MANIFEST_NAME).exists());
    }

    #[test]
    fn test_existing_version_without_force_is_noop() {
        let temp = TempDir::new().unwrap();
        let manifest = write_component(&temp.path().join("src"), "button", "1.0.0", None);
        let mut c = componentizer(&temp.path().join("store"));

        c.add_component_from_json(&manifest, false).unwrap();
        let location = c.get("button@1.0.0").unwrap().location.clone();
        assert_eq!(c.add_component_from_json(&manifest, false).unwrap(), None);
        assert_eq!(c.get("button@1.0.0").unwrap().location, location);

        // Forced: replaced, and the old directory is released at once
        assert!(c.add_component_from_json(&manifest, true).unwrap().is_some());
        let replaced = c.get("button@1.0.0").unwrap().location.clone();
        assert_ne!(replaced, location);
        assert!(!c.storage().path_of(&location).unwrap().exists());
        assert_eq!(c.storage().locations().unwrap(), vec![replaced]);
    }

    #[test]
    fn test_index_directory_resolves_to_index_html() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("app")).unwrap();
        fs::write(src.join("app/index.html"), "<app>").unwrap();
        let manifest = src.join("manifest.json");
        fs::write(
            &manifest,
            r#"{ "id": "app", "name": "App", "version": "1.0.0", "files": ["app"], "indexFile": "app" }"#,
        )
        .unwrap();

        let mut c = componentizer(&temp.path().join("store"));
        c.add_component_from_json(&manifest, false).unwrap();
        assert_eq!(c.get("app@1.0.0").unwrap().component.index_file, "app/index.html");
    }

    #[test]
    fn test_failed_install_leaves_nothing_behind() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("main.js"), "x").unwrap();
        let manifest = src.join("manifest.json");
        fs::write(
            &manifest,
            r#"{ "id": "noindex", "name": "N", "version": "1.0.0", "files": ["*.js"] }"#,
        )
        .unwrap();

        let mut c = componentizer(&temp.path().join("store"));
        assert!(matches!(
            c.add_component_from_json(&manifest, false),
            Err(Error::NotFound(_))
        ));
        assert!(c.storage().locations().unwrap().is_empty());
        assert!(!c.has_component("noindex").unwrap());
        assert!(c.graph().is_empty());
    }

    #[test]
    fn test_zero_matches_rejected() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        let manifest = src.join("manifest.json");
        fs::write(
            &manifest,
            r#"{ "id": "empty", "name": "E", "version": "1.0.0", "files": ["*.css"] }"#,
        )
        .unwrap();

        let mut c = componentizer(&temp.path().join("store"));
        assert!(matches!(
            c.add_component_from_json(&manifest, false),
            Err(Error::InvalidManifest(_))
        ));
    }

    #[test]
    fn test_add_component_dispatch() {
        let temp = TempDir::new().unwrap();
        let mut c = componentizer(&temp.path().join("store"));
        let txt = temp.path().join("component.txt");
        fs::write(&txt, "").unwrap();
        assert!(matches!(
            c.add_component(&txt, false),
            Err(Error::UnsupportedFormat(_))
        ));

        let manifest = write_component(&temp.path().join("src"), "button", "1.0.0", None);
        let renamed = manifest.with_file_name("button.JSON");
        fs::rename(&manifest, &renamed).unwrap();
        assert!(c.add_component(&renamed, false).unwrap().is_some());
    }

    #[test]
    fn test_zip_without_manifest_rejected() {
        let temp = TempDir::new().unwrap();
        let mut writer = archive::ArchiveWriter::new();
        writer.add_bytes("index.html", b"<html>").unwrap();
        let zip = temp.path().join("bare.zip");
        fs::write(&zip, writer.finish("bare").unwrap()).unwrap();

        let store = temp.path().join("store");
        let mut c = componentizer(&store);
        assert!(c.add_component_from_zip(&zip, false).is_err());
        // Extraction directory is cleaned up
        let leftovers = fs::read_dir(store.join("tmp")).unwrap().count();
        assert_eq!(leftovers, 0);
    }
}
