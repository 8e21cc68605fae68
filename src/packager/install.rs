// src/packager/install.rs

//! Package installation and include resolution

use super::{Packager, describe_cycle};
use crate::componentizer::{InstalledComponent, extension_of};
use crate::error::{Error, Result};
use crate::filesystem::archive::{MANIFEST_NAME, unpack_to_temp};
use crate::graph::{NodeKey, UnitKind};
use crate::manifest::{Include, Package, PackageManifest, manifest_kind};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info, warn};

impl Packager {
    /// Install a package from its JSON manifest
    ///
    /// Every include is bound to the highest installed unit satisfying it, or
    /// to whatever its fallback installs. The whole install is one
    /// transaction: an unsatisfied include or a cycle undoes every fallback
    /// install it triggered. Returns `None` when that version is already
    /// installed and `force` is not set.
    pub fn add_package_from_json(&mut self, manifest_path: &Path, force: bool) -> Result<Option<String>> {
        let mut package = PackageManifest::from_file(manifest_path)?.validate()?;
        let combined = package.combined_id();

        if self.in_progress.contains(&combined) {
            return Err(Error::CircularDependency(format!(
                "{} is already being installed",
                combined
            )));
        }
        if self.packages.contains_key(&combined) {
            if !force {
                info!("Package {} is already installed", combined);
                return Ok(None);
            }
            warn!("Package {} is already installed, replacing it", combined);
        }

        let base = manifest_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let caller = format!("install {}", combined);

        self.with_transaction(&caller, |packager| {
            packager.in_progress.insert(combined.clone());
            let bound = packager.bind_includes(&mut package, base, force);
            packager.in_progress.remove(&combined);
            bound?;
            packager.packages.insert(combined.clone(), package);
            Ok(())
        })?;
        info!("Installed package {}", combined);

        if self.in_progress.is_empty() {
            let swept = self.clean_isolated()?;
            if !swept.is_empty() {
                info!("Removed {} isolated units", swept.len());
            }
        }
        Ok(Some(combined))
    }

    /// Install a package from a ZIP archive with `manifest.json` at its root
    pub fn add_package_from_zip(&mut self, archive_path: &Path, force: bool) -> Result<Option<String>> {
        let extracted = unpack_to_temp(archive_path, &self.config().tmp_dir())?;
        self.add_package_from_json(&extracted.path().join(MANIFEST_NAME), force)
    }

    /// Install a package from a `.json` manifest or a `.zip` archive
    pub fn add_package(&mut self, path: &Path, force: bool) -> Result<Option<String>> {
        match extension_of(path).as_deref() {
            Some("json") => self.add_package_from_json(path, force),
            Some("zip") => self.add_package_from_zip(path, force),
            _ => Err(Error::UnsupportedFormat(path.display().to_string())),
        }
    }

    /// Install a component or a package, whichever the manifest's `type` says
    pub fn add(&mut self, path: &Path, force: bool) -> Result<Option<String>> {
        match extension_of(path).as_deref() {
            Some("json") => self.add_by_kind(path, force),
            Some("zip") => {
                let extracted = unpack_to_temp(path, &self.config().tmp_dir())?;
                self.add_by_kind(&extracted.path().join(MANIFEST_NAME), force)
            }
            _ => Err(Error::UnsupportedFormat(path.display().to_string())),
        }
    }

    fn add_by_kind(&mut self, manifest: &Path, force: bool) -> Result<Option<String>> {
        match manifest_kind(manifest)? {
            Some(UnitKind::Component) => self.componentizer.add_component_from_json(manifest, force),
            Some(UnitKind::Package) => self.add_package_from_json(manifest, force),
            None => Err(Error::InvalidManifest(format!(
                "{} does not say whether it is a component or a package",
                manifest.display()
            ))),
        }
    }

    /// Bind every include of `package`, replacing its outgoing edges
    fn bind_includes(&mut self, package: &mut Package, base: &Path, force: bool) -> Result<()> {
        let key = package.node_key();
        let graph = self.graph_mut();
        graph.add_node(key.clone());
        graph.clear_dependencies(&key);

        let mut resolved = BTreeSet::new();
        for include in &package.includes {
            let target = self.resolve_include(include, base, force)?;
            debug!("{} includes {}", key, target);
            self.graph_mut().add_edge(&key, &target)?;
            resolved.insert(target);
        }

        if let Some(cycle) = self.graph().detect_cycle() {
            return Err(Error::CircularDependency(describe_cycle(&cycle)));
        }
        package.resolved = resolved;
        Ok(())
    }

    /// First kind in lookup order with a satisfying install wins
    fn installed_match(&self, include: &Include) -> Option<NodeKey> {
        include.candidate_kinds().iter().find_map(|kind| match kind {
            UnitKind::Component => self
                .componentizer
                .best_match(&include.requirement)
                .map(InstalledComponent::node_key),
            UnitKind::Package => self.best_match(&include.requirement).map(Package::node_key),
        })
    }

    /// Bind one include, installing its fallback if nothing satisfies it
    fn resolve_include(&mut self, include: &Include, base: &Path, force: bool) -> Result<NodeKey> {
        if let Some(key) = self.installed_match(include) {
            return Ok(key);
        }

        let Some(fallback) = &include.fallback else {
            return Err(Error::Unsatisfied(format!(
                "Nothing installed satisfies {}",
                include.reference()
            )));
        };
        let path = base.join(fallback);
        info!("Installing {} for {}", path.display(), include.reference());
        match include.kind {
            Some(UnitKind::Component) => self.componentizer.add_component(&path, force)?,
            Some(UnitKind::Package) => self.add_package(&path, force)?,
            None => self.add(&path, force)?,
        };

        self.installed_match(include).ok_or_else(|| {
            Error::Unsatisfied(format!(
                "Fallback {} does not satisfy {}",
                fallback,
                include.reference()
            ))
        })
    }
}
