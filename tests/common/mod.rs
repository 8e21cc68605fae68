// tests/common/mod.rs

//! Shared fixtures for integration tests.

#![allow(dead_code)]

use blockyard::{DependencyGraph, Packager, StoreConfig, Transact};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// A source tree and a storage root inside one temporary directory.
///
/// Keep the value alive for the duration of the test; dropping it removes
/// everything.
pub struct Workspace {
    pub temp: TempDir,
    pub src: PathBuf,
    pub store: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let src = temp.path().join("src");
        let store = temp.path().join("store");
        fs::create_dir_all(&src).unwrap();
        Self { temp, src, store }
    }

    pub fn config(&self) -> StoreConfig {
        StoreConfig::new(&self.store)
    }

    /// A freshly loaded packager over this workspace's store
    pub fn packager(&self) -> Packager {
        let mut packager = Packager::new(self.config(), Arc::new(Transact::new()));
        packager.load_all().unwrap();
        packager
    }

    /// Write a component source directory `src/<dir>` and return its manifest
    pub fn component(&self, dir: &str, id: &str, version: &str, compatible_until: Option<&str>) -> PathBuf {
        let root = self.src.join(dir);
        fs::create_dir_all(root.join("css")).unwrap();
        fs::write(root.join("index.html"), format!("<main>{}@{}</main>", id, version)).unwrap();
        fs::write(root.join("css/style.css"), "main { margin: 0 }").unwrap();

        let until = compatible_until
            .map(|u| format!(r#", "compatibleUntil": "{}""#, u))
            .unwrap_or_default();
        let manifest = root.join("manifest.json");
        fs::write(
            &manifest,
            format!(
                r#"{{
                    "type": "component",
                    "id": "{id}",
                    "name": "{id} widget",
                    "description": "Test widget",
                    "version": "{version}",
                    "files": ["index.html", "css/*.css"],
                    "input": [{{ "name": "data", "required": true }}],
                    "output": [{{ "name": "changed", "type": "event" }}]
                    {until}
                }}"#
            ),
        )
        .unwrap();
        manifest
    }

    /// Write `src/<file>` as a package manifest with the given includes array
    pub fn package(&self, file: &str, id: &str, version: &str, includes: &str) -> PathBuf {
        let manifest = self.src.join(file);
        if let Some(parent) = manifest.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(
            &manifest,
            format!(
                r#"{{ "type": "package", "id": "{id}", "name": "{id}", "version": "{version}", "includes": {includes} }}"#
            ),
        )
        .unwrap();
        manifest
    }
}

/// Everything a failed operation must leave untouched
#[derive(Debug, PartialEq)]
pub struct StoreState {
    pub components_registry: Option<String>,
    pub packages_registry: Option<String>,
    pub graph: DependencyGraph,
    pub locations: Vec<String>,
}

pub fn store_state(packager: &Packager) -> StoreState {
    let config = packager.config();
    StoreState {
        components_registry: read_optional(&config.components_registry()),
        packages_registry: read_optional(&config.packages_registry()),
        graph: packager.graph().clone(),
        locations: packager.componentizer().storage().locations().unwrap(),
    }
}

fn read_optional(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok()
}
