// src/filesystem/path.rs

//! Path checks for manifest-supplied paths
//!
//! Manifests and archives name files relative to their own directory. None of
//! those names may reach outside it: a `..` component or an absolute path is
//! an upward escape and rejected outright.

use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Normalize a relative path from a manifest or archive entry
///
/// `.` components are dropped; `..`, absolute roots and drive prefixes are
/// rejected, as is a path that normalizes to nothing.
///
/// ```
/// use blockyard::filesystem::path::sanitize_relative;
/// use std::path::PathBuf;
///
/// assert_eq!(sanitize_relative("./js/app.js").unwrap(), PathBuf::from("js/app.js"));
/// assert!(sanitize_relative("../secret").is_err());
/// assert!(sanitize_relative("/etc/passwd").is_err());
/// ```
pub fn sanitize_relative(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Normal(c) => normalized.push(c),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::PathTraversal(path.display().to_string()));
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(Error::InvalidPath(format!(
            "'{}' is empty after normalization",
            path.display()
        )));
    }

    Ok(normalized)
}

/// Express `path` relative to `base`, failing if it lies outside `base`
pub fn relative_within(base: &Path, path: &Path) -> Result<PathBuf> {
    let stripped = path.strip_prefix(base).map_err(|_| {
        Error::PathTraversal(format!(
            "{} is outside {}",
            path.display(),
            base.display()
        ))
    })?;
    sanitize_relative(stripped)
}

/// Join an untrusted relative path onto a trusted root
pub fn safe_join(root: &Path, path: impl AsRef<Path>) -> Result<PathBuf> {
    Ok(root.join(sanitize_relative(path)?))
}

/// Check that a single name contains no separators or dot entries
pub fn sanitize_filename(name: &str) -> Result<&str> {
    if name.is_empty() {
        return Err(Error::InvalidPath("Empty filename".to_string()));
    }
    if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(Error::PathTraversal(format!("Invalid filename: {}", name)));
    }
    Ok(name)
}
