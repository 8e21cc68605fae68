// src/lib.rs

//! Blockyard component and package manager
//!
//! Installs, resolves, compiles and removes two kinds of units:
//!
//! - **Components**: leaf units with their own files and an index entry point
//! - **Packages**: named bundles of include references to components and
//!   other packages, each include optionally carrying a fallback archive
//!
//! # Architecture
//!
//! - Registries: one JSON document per unit kind, rewritten wholesale
//! - Dependency graph: `package -> include` edges, kept acyclic
//! - Managed storage: one randomly named directory per component, reached
//!   through the registry's `location` pointer
//! - Transactions: nested, per-holder checkpoints with deferred commit and
//!   decline side effects, so a failed install leaves everything as it was
//!
//! ```no_run
//! use blockyard::{Packager, StoreConfig, Transact};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let config = StoreConfig::resolve(None, None)?;
//! let mut packager = Packager::new(config, Arc::new(Transact::new()));
//! packager.load_all()?;
//! packager.add(Path::new("forms/manifest.json"), false)?;
//! # Ok::<(), blockyard::Error>(())
//! ```

pub mod componentizer;
pub mod config;
mod error;
pub mod filesystem;
pub mod graph;
pub mod manifest;
pub mod packager;
pub mod transact;
pub mod version;

pub use componentizer::{Compiled, CompileTarget, Componentizer, InstalledComponent};
pub use config::StoreConfig;
pub use error::{Error, Result};
pub use graph::{DependencyGraph, NodeKey, UnitKind};
pub use manifest::{Component, Include, Package};
pub use packager::{PackageDetails, Packager};
pub use transact::{Transact, TransactEnabled};
pub use version::{Requirement, VersionedId};
