// src/packager/mod.rs

//! Package registry, dependency resolver, installer and compiler
//!
//! A package is a named bundle of include references. Installing one binds
//! every include to an installed component or package (installing a
//! fallback when nothing satisfies it) and records a `package -> include`
//! edge per binding in the dependency graph owned by the [`Componentizer`].
//!
//! Every mutating operation runs inside a transaction on both the
//! [`HOLDER`] and [`componentizer::HOLDER`](crate::componentizer::HOLDER)
//! stacks, so a failure part-way through restores both registries and the
//! graph and releases any storage the operation allocated:
//!
//! ```text
//! begin(packager) -> begin(componentizer)
//!     resolve includes (may install components and packages)
//!     check for cycles, persist
//! end(componentizer) -> end(packager)        commit, or decline + re-persist
//! clean_isolated()                           outermost install only
//! ```

mod compile;
mod install;

use crate::componentizer::{Componentizer, InstalledComponent};
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::filesystem::{load_document, save_document};
use crate::graph::{DependencyGraph, NodeKey, UnitKind};
use crate::manifest::{Package, PackageManifest};
use crate::transact::{Transact, TransactEnabled};
use crate::version::{Requirement, VersionedId, exact_range};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Transaction holder name of the package registry
pub const HOLDER: &str = "packager";

/// A package together with the components it pulls in
#[derive(Debug, Clone)]
pub struct PackageDetails {
    pub package: Package,
    /// Combined ids of every component included directly or transitively
    pub components: Vec<String>,
    /// Components fetched from storage, when requested; failures are skipped
    pub fetched: Vec<InstalledComponent>,
}

pub struct Packager {
    componentizer: Componentizer,
    packages: BTreeMap<String, Package>,
    /// Packages whose install is on the call stack
    in_progress: HashSet<String>,
}

impl Packager {
    pub fn new(config: StoreConfig, transact: Arc<Transact>) -> Self {
        Self {
            componentizer: Componentizer::new(config, transact),
            packages: BTreeMap::new(),
            in_progress: HashSet::new(),
        }
    }

    pub fn componentizer(&self) -> &Componentizer {
        &self.componentizer
    }

    pub fn componentizer_mut(&mut self) -> &mut Componentizer {
        &mut self.componentizer
    }

    pub fn config(&self) -> &StoreConfig {
        self.componentizer.config()
    }

    pub fn graph(&self) -> &DependencyGraph {
        self.componentizer.graph()
    }

    fn graph_mut(&mut self) -> &mut DependencyGraph {
        self.componentizer.graph_mut()
    }

    /// Load components, then packages and their edges
    ///
    /// An include naming an unknown node, or edges forming a cycle, discard
    /// the whole package registry with a warning. Components stay loaded.
    pub fn load_all(&mut self) -> Result<()> {
        self.componentizer.load_all()?;
        self.packages.clear();
        self.in_progress.clear();
        self.graph_mut().clear_kind(UnitKind::Package);

        let raw: BTreeMap<String, serde_json::Value> =
            load_document(&self.config().packages_registry());

        match self.link_registry(raw) {
            Ok(packages) => self.packages = packages,
            Err(e) => {
                warn!("Package registry unusable ({}), starting empty", e);
                self.graph_mut().clear_kind(UnitKind::Package);
            }
        }

        info!("Loaded {} packages", self.packages.len());
        Ok(())
    }

    fn link_registry(
        &mut self,
        raw: BTreeMap<String, serde_json::Value>,
    ) -> Result<BTreeMap<String, Package>> {
        let mut packages = BTreeMap::new();
        for (key, value) in raw {
            let resolved: BTreeSet<NodeKey> = match value.get("resolved") {
                Some(v) => serde_json::from_value(v.clone())?,
                None => BTreeSet::new(),
            };
            let manifest: PackageManifest = serde_json::from_value(value)?;
            let mut package = manifest.validate()?;
            package.resolved = resolved;

            let combined = package.combined_id();
            if combined != key {
                warn!("Registry key {} re-keyed as {}", key, combined);
            }
            packages.insert(combined, package);
        }

        let graph = self.graph_mut();
        for package in packages.values() {
            graph.add_node(package.node_key());
        }
        for package in packages.values() {
            let from = package.node_key();
            for to in &package.resolved {
                graph.add_edge(&from, to)?;
            }
        }
        if let Some(cycle) = graph.detect_cycle() {
            return Err(Error::CircularDependency(describe_cycle(&cycle)));
        }
        Ok(packages)
    }

    /// Persist the package registry
    pub fn save(&self) -> Result<()> {
        save_document(&self.config().packages_registry(), &self.packages)
    }

    fn save_restored(&self) {
        if let Err(e) = self.save() {
            warn!("Could not persist restored package registry: {}", e);
        }
    }

    fn matching(&self, query: &Requirement) -> Vec<&Package> {
        let mut found: Vec<&Package> = self
            .packages
            .values()
            .filter(|p| p.id == query.name && query.satisfied_by(&p.version))
            .collect();
        found.sort_by(|a, b| a.version.cmp(&b.version));
        found
    }

    /// Combined ids of installed packages satisfying `query`, ascending
    pub fn find(&self, query: &Requirement) -> Vec<String> {
        self.matching(query)
            .into_iter()
            .map(Package::combined_id)
            .collect()
    }

    /// Highest installed package satisfying `query`, preferring an exact match
    pub fn best_match(&self, query: &Requirement) -> Option<&Package> {
        if let Some(exact) = query.exact_version() {
            let id = VersionedId::new(query.name.clone(), exact).combined();
            return self.packages.get(&id);
        }
        self.matching(query).pop()
    }

    pub fn has_package(&self, query: &str) -> Result<bool> {
        let query = Requirement::parse(query)?;
        Ok(!self.matching(&query).is_empty())
    }

    /// Look a package up by exact combined id
    pub fn get(&self, combined_id: &str) -> Option<&Package> {
        self.packages.get(combined_id)
    }

    /// All installed packages, after checking the registry against the graph
    pub fn packages(&self) -> Result<Vec<&Package>> {
        let graph = self.graph();
        for (id, package) in &self.packages {
            if !graph.contains(&package.node_key()) {
                return Err(Error::Consistency(format!(
                    "{} is registered but has no graph node",
                    id
                )));
            }
        }
        for node in graph.nodes_of_kind(UnitKind::Package) {
            if !self.packages.contains_key(&node.id) {
                return Err(Error::Consistency(format!(
                    "Graph node {} has no registry entry",
                    node
                )));
            }
        }
        Ok(self.packages.values().collect())
    }

    /// Units a package includes, directly or (with `deep`) transitively
    ///
    /// Recorded bindings and live graph edges are reconciled first: a binding
    /// without an edge, or an edge without a binding, is dropped.
    pub fn get_includes(&mut self, query: &str, deep: bool) -> Result<Vec<NodeKey>> {
        let query = Requirement::parse(query)?;
        let combined = self
            .best_match(&query)
            .map(Package::combined_id)
            .ok_or_else(|| Error::NotFound(format!("No package matches {}", query)))?;
        let key = NodeKey::package(combined.clone());

        let live: BTreeSet<NodeKey> = self.graph().dependencies(&key).into_iter().collect();
        let recorded = self
            .packages
            .get(&combined)
            .map(|p| p.resolved.clone())
            .unwrap_or_default();

        if live != recorded {
            let kept: BTreeSet<NodeKey> = live.intersection(&recorded).cloned().collect();
            for stale in live.difference(&kept) {
                debug!("Dropping stale edge {} -> {}", key, stale);
                self.graph_mut().remove_edge(&key, stale);
            }
            for stale in recorded.difference(&kept) {
                debug!("Dropping stale binding {} -> {}", key, stale);
            }
            if let Some(package) = self.packages.get_mut(&combined) {
                package.resolved = kept;
            }
            self.save()?;
        }

        let includes = if deep {
            self.graph().transitive_dependencies(&key)
        } else {
            self.graph().dependencies(&key).into_iter().collect()
        };
        Ok(includes.into_iter().collect())
    }

    /// Resolve a package and the components it includes
    ///
    /// With `fetch_components`, each component is fetched (and relocated)
    /// through the componentizer; components that fail to fetch are skipped.
    pub fn get_package(&mut self, query: &str, fetch_components: bool) -> Result<Option<PackageDetails>> {
        let query = Requirement::parse(query)?;
        let Some(package) = self.best_match(&query).cloned() else {
            return Ok(None);
        };

        let components: Vec<String> = self
            .graph()
            .transitive_dependencies(&package.node_key())
            .into_iter()
            .filter(|k| k.kind == UnitKind::Component)
            .map(|k| k.id)
            .collect();

        let mut fetched = Vec::new();
        if fetch_components {
            for id in &components {
                match self.componentizer.get_component(id, false) {
                    Ok(Some(component)) => fetched.push(component),
                    Ok(None) => debug!("Included component {} is not installed", id),
                    Err(e) => debug!("Skipping component {}: {}", id, e),
                }
            }
        }

        Ok(Some(PackageDetails {
            package,
            components,
            fetched,
        }))
    }

    /// Remove every package matching `query` that nothing depends on
    ///
    /// Each removal is followed by an isolated-unit sweep. The whole sequence
    /// runs in one transaction. Returns every removed id, swept ones included.
    pub fn remove_package(&mut self, query: &str) -> Result<Vec<String>> {
        let query = Requirement::parse(query)?;
        let caller = format!("remove {}", query);
        self.with_transaction(&caller, |packager| {
            let mut removed = Vec::new();
            for id in packager.find(&query) {
                let key = NodeKey::package(id.clone());
                if packager.graph().has_dependents(&key) {
                    debug!("Keeping {}: still included", id);
                    continue;
                }
                packager.packages.remove(&id);
                packager.graph_mut().remove_node(&key);
                info!("Removed package {}", id);
                removed.push(id);
                removed.extend(packager.sweep_isolated()?);
            }
            Ok(removed)
        })
    }

    /// Remove every unit with neither dependents nor dependencies
    pub fn clean_isolated(&mut self) -> Result<Vec<String>> {
        self.with_transaction("clean isolated", Self::sweep_isolated)
    }

    fn sweep_isolated(&mut self) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        loop {
            let isolated = self
                .graph_mut()
                .filter_by(|graph, node| graph.is_isolated(node))?;
            if isolated.is_empty() {
                break;
            }
            for node in isolated {
                match node.kind {
                    UnitKind::Component => {
                        self.componentizer.forget(&node.id)?;
                    }
                    UnitKind::Package => {
                        self.packages.remove(&node.id);
                    }
                }
                debug!("Swept isolated {}", node);
                removed.push(node.id);
            }
        }
        Ok(removed)
    }

    /// Remove every installed version of a unit except the one `query` selects
    ///
    /// The package registry is consulted first, then components. Versions
    /// something still depends on are kept.
    pub fn clean_co_existing(&mut self, query: &str) -> Result<Vec<String>> {
        let query = Requirement::parse(query)?;
        let caller = format!("clean co-existing {}", query);
        let any = Requirement::any(query.name.clone());

        if let Some(keep) = self.best_match(&query).map(Package::combined_id) {
            return self.with_transaction(&caller, |packager| {
                let mut removed = Vec::new();
                for id in packager.find(&any) {
                    let key = NodeKey::package(id.clone());
                    if id == keep || packager.graph().has_dependents(&key) {
                        continue;
                    }
                    packager.packages.remove(&id);
                    packager.graph_mut().remove_node(&key);
                    removed.push(id);
                }
                Ok(removed)
            });
        }

        let Some(keep) = self
            .componentizer
            .best_match(&query)
            .map(InstalledComponent::combined_id)
        else {
            return Ok(Vec::new());
        };
        self.with_transaction(&caller, |packager| {
            let mut removed = Vec::new();
            for id in packager.componentizer.find(&any) {
                if id == keep {
                    continue;
                }
                if packager.componentizer.forget(&id)?.is_some() {
                    removed.push(id);
                }
            }
            Ok(removed)
        })
    }

    /// Open a transaction on both holders
    fn begin(&self, caller: &str) -> Result<()> {
        let transact = self.componentizer.transact().clone();
        let busy = || Error::Transact(format!("{}: another transaction is ending", caller));

        if !transact.begin_on(caller, self)? {
            return Err(busy());
        }
        match transact.begin_on(caller, &self.componentizer) {
            Ok(true) => Ok(()),
            other => {
                if let Err(e) = transact.end(caller, HOLDER, true) {
                    warn!("Could not abandon transaction {}: {}", caller, e);
                }
                Err(other.err().unwrap_or_else(busy))
            }
        }
    }

    /// End the transaction on both holders; a decline also re-persists
    fn end(&mut self, caller: &str, decline: bool) -> Result<()> {
        let transact = self.componentizer.transact().clone();
        let components = transact.end_on(caller, &mut self.componentizer, decline);
        let packages = transact.end_on(caller, self, decline);
        if decline {
            self.componentizer.save_restored();
            self.save_restored();
            debug!("Declined {}", caller);
        }
        components.and(packages)
    }

    /// Run `work` in a transaction that commits (after persisting) on
    /// success and declines on failure
    fn with_transaction<T, F>(&mut self, caller: &str, work: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        self.begin(caller)?;
        let outcome = work(self).and_then(|value| {
            self.componentizer.save()?;
            self.save()?;
            Ok(value)
        });
        match outcome {
            Ok(value) => {
                self.end(caller, false)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(end_err) = self.end(caller, true) {
                    warn!("Could not decline {}: {}", caller, end_err);
                }
                Err(e)
            }
        }
    }
}

fn describe_cycle(cycle: &[NodeKey]) -> String {
    cycle
        .iter()
        .map(NodeKey::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Exact requirement for an installed unit
fn pinned(name: &str, version: &semver::Version) -> Requirement {
    Requirement {
        name: name.to_string(),
        range: exact_range(version),
    }
}

impl TransactEnabled for Packager {
    type Snapshot = BTreeMap<String, Package>;

    fn holder_name(&self) -> &'static str {
        HOLDER
    }

    fn snapshot(&self) -> Self::Snapshot {
        self.packages.clone()
    }

    fn restore(&mut self, snapshot: Self::Snapshot) {
        self.packages = snapshot;
    }
}
