// src/filesystem/storage.rs

//! Managed storage arena
//!
//! Every installed component lives in its own directory under the storage
//! root, named by a random UUID rather than by the component id. Registries
//! record that name as the component's `location`. Moving a component's files
//! is therefore allocate + copy + repoint, and the superseded directory can
//! be released later without ever mutating a directory a reader may hold.

use super::copy_tree;
use super::path::sanitize_filename;
use crate::error::Result;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Arena of randomly named component directories
#[derive(Debug, Clone)]
pub struct ManagedStorage {
    root: PathBuf,
}

impl ManagedStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the storage root if missing
    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    /// Absolute path of a location
    pub fn path_of(&self, location: &str) -> Result<PathBuf> {
        Ok(self.root.join(sanitize_filename(location)?))
    }

    /// Create a fresh, empty directory and return its location name
    pub fn allocate(&self) -> Result<String> {
        self.ensure()?;
        loop {
            let location = Uuid::new_v4().simple().to_string();
            let path = self.root.join(&location);
            match fs::create_dir(&path) {
                Ok(()) => {
                    debug!("Allocated storage directory {}", location);
                    return Ok(location);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Copy a location into a newly allocated one
    ///
    /// The new directory is removed again if the copy fails.
    pub fn duplicate(&self, location: &str) -> Result<String> {
        let source = self.path_of(location)?;
        let target = self.allocate()?;
        let target_path = self.path_of(&target)?;
        if let Err(e) = copy_tree(&source, &target_path) {
            let _ = fs::remove_dir_all(&target_path);
            return Err(e);
        }
        Ok(target)
    }

    /// Delete a location and everything in it; a missing location is not an error
    pub fn release(&self, location: &str) -> Result<()> {
        let path = self.path_of(location)?;
        if path.exists() {
            fs::remove_dir_all(&path)?;
            debug!("Released storage directory {}", location);
        }
        Ok(())
    }

    /// Names of all entries currently under the storage root
    pub fn locations(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    /// Remove every entry not named in `keep`, returning what was removed
    pub fn prune(&self, keep: &HashSet<String>) -> Result<Vec<String>> {
        let mut pruned = Vec::new();
        for name in self.locations()? {
            if keep.contains(&name) {
                continue;
            }
            let path = self.root.join(&name);
            let result = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match result {
                Ok(()) => pruned.push(name),
                Err(e) => warn!("Could not prune {}: {}", path.display(), e),
            }
        }
        if !pruned.is_empty() {
            debug!("Pruned {} unaffiliated storage entries", pruned.len());
        }
        Ok(pruned)
    }
}
