// src/config.rs

//! Storage root configuration
//!
//! All persistent state lives under one root directory:
//!
//! ```text
//! <root>/components.json   component registry
//! <root>/packages.json     package registry
//! <root>/storage/<uuid>/   one directory per installed component
//! <root>/tmp/              archive extraction
//! ```
//!
//! The root is taken, in order, from an explicit path, an explicit config
//! file, the `BLOCKYARD_HOME` environment variable, a `blockyard.toml` in the
//! current directory (`root = "..."`), or the platform data directory.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the storage root
pub const ENV_HOME: &str = "BLOCKYARD_HOME";

/// Config file name looked up in the current directory
pub const CONFIG_FILE_NAME: &str = "blockyard.toml";

#[derive(Debug, Deserialize)]
struct ConfigFile {
    root: PathBuf,
}

/// Paths of everything blockyard persists
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    root: PathBuf,
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Load the root from a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let file: ConfigFile = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let root = if file.root.is_relative() {
            path.parent().unwrap_or(Path::new(".")).join(file.root)
        } else {
            file.root
        };
        Ok(Self::new(root))
    }

    /// Resolve the root from explicit arguments, the environment, or defaults
    pub fn resolve(explicit: Option<PathBuf>, config_file: Option<&Path>) -> Result<Self> {
        Self::resolve_with(explicit, config_file, std::env::var(ENV_HOME).ok())
    }

    fn resolve_with(
        explicit: Option<PathBuf>,
        config_file: Option<&Path>,
        env_home: Option<String>,
    ) -> Result<Self> {
        if let Some(root) = explicit {
            return Ok(Self::new(root));
        }
        if let Some(path) = config_file {
            return Self::load(path);
        }
        if let Some(root) = env_home.filter(|r| !r.is_empty()) {
            return Ok(Self::new(root));
        }
        let local = Path::new(CONFIG_FILE_NAME);
        if local.is_file() {
            return Self::load(local);
        }
        Ok(Self::new(default_root()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn components_registry(&self) -> PathBuf {
        self.root.join("components.json")
    }

    pub fn packages_registry(&self) -> PathBuf {
        self.root.join("packages.json")
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.root.join("storage")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }
}

/// Platform default root: `<data dir>/blockyard`
pub fn default_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("blockyard")
}
