// src/componentizer/mod.rs

//! Component registry, installer and compiler
//!
//! The componentizer owns three things that must always agree:
//!
//! - the in-memory registry (combined id -> [`InstalledComponent`]),
//!   persisted wholesale to `components.json`
//! - one `component/<id>` node per registry entry in the dependency graph
//! - one managed storage directory per entry, named by its `location`
//!
//! Components never depend on anything, so the graph only ever gains
//! component nodes here. Package edges are added by the packager, which owns
//! the componentizer and reaches the graph through it.
//!
//! Destructive file operations never happen inline. Superseded directories
//! are released through [`Transact::after_commit`] and freshly allocated ones
//! through [`Transact::after_decline`], so a caller holding a transaction on
//! [`HOLDER`] can still undo everything.

mod compile;
mod install;

pub use compile::{Compiled, CompileTarget};
pub(crate) use compile::{archive_comment, emit};
pub(crate) use install::extension_of;

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::filesystem::{ManagedStorage, load_document, save_document};
use crate::graph::{DependencyGraph, NodeKey, UnitKind};
use crate::manifest::{Component, ComponentManifest};
use crate::transact::{Transact, TransactEnabled};
use crate::version::{Requirement, VersionedId};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Transaction holder name of the component registry
pub const HOLDER: &str = "componentizer";

/// A component as recorded in the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledComponent {
    #[serde(flatten)]
    pub component: Component,
    /// Name of the managed storage directory holding the files
    pub location: String,
}

impl InstalledComponent {
    pub fn combined_id(&self) -> String {
        self.component.combined_id()
    }

    pub fn node_key(&self) -> NodeKey {
        self.component.node_key()
    }
}

/// Registry and graph state restored when a transaction declines
pub type ComponentSnapshot = (BTreeMap<String, InstalledComponent>, DependencyGraph);

pub struct Componentizer {
    config: StoreConfig,
    storage: ManagedStorage,
    transact: Arc<Transact>,
    components: BTreeMap<String, InstalledComponent>,
    graph: DependencyGraph,
}

impl Componentizer {
    pub fn new(config: StoreConfig, transact: Arc<Transact>) -> Self {
        let storage = ManagedStorage::new(config.storage_dir());
        Self {
            config,
            storage,
            transact,
            components: BTreeMap::new(),
            graph: DependencyGraph::new(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn storage(&self) -> &ManagedStorage {
        &self.storage
    }

    pub fn transact(&self) -> &Arc<Transact> {
        &self.transact
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub(crate) fn graph_mut(&mut self) -> &mut DependencyGraph {
        &mut self.graph
    }

    /// Rebuild in-memory state from `components.json`
    ///
    /// A registry that fails to normalize, or names an index file that is not
    /// on disk, is discarded as a whole: the componentizer starts empty and a
    /// warning is logged. Storage directories no entry points at are pruned
    /// only after a successful load.
    pub fn load_all(&mut self) -> Result<()> {
        self.components.clear();
        self.graph.clear_kind(UnitKind::Component);
        self.storage.ensure()?;

        let raw: BTreeMap<String, serde_json::Value> =
            load_document(&self.config.components_registry());

        match self.normalize_registry(raw) {
            Ok(components) => {
                for component in components.values() {
                    self.graph.add_node(component.node_key());
                }
                self.components = components;
            }
            Err(e) => {
                warn!("Component registry unusable ({}), starting empty", e);
                return Ok(());
            }
        }

        let keep: HashSet<String> = self
            .components
            .values()
            .map(|c| c.location.clone())
            .collect();
        self.storage.prune(&keep)?;

        info!("Loaded {} components", self.components.len());
        Ok(())
    }

    fn normalize_registry(
        &self,
        raw: BTreeMap<String, serde_json::Value>,
    ) -> Result<BTreeMap<String, InstalledComponent>> {
        let mut components = BTreeMap::new();
        for (key, value) in raw {
            let location = value
                .get("location")
                .and_then(|l| l.as_str())
                .map(str::to_string)
                .ok_or_else(|| Error::InvalidManifest(format!("{} has no location", key)))?;
            let manifest: ComponentManifest = serde_json::from_value(value)?;
            let component = manifest.validate()?;

            let dir = self.storage.path_of(&location)?;
            let index = dir.join(&component.index_file);
            if !index.is_file() {
                return Err(Error::NotFound(format!(
                    "Index file of {} at {}",
                    key,
                    index.display()
                )));
            }

            let combined = component.combined_id();
            if combined != key {
                warn!("Registry key {} re-keyed as {}", key, combined);
            }
            components.insert(combined, InstalledComponent {
                component,
                location,
            });
        }
        Ok(components)
    }

    /// Persist the registry
    pub fn save(&self) -> Result<()> {
        save_document(&self.config.components_registry(), &self.components)
    }

    /// Installed versions satisfying `query`, ascending
    fn matching(&self, query: &Requirement) -> Vec<&InstalledComponent> {
        let mut found: Vec<&InstalledComponent> = self
            .components
            .values()
            .filter(|c| c.component.id == query.name && query.satisfied_by(&c.component.version))
            .collect();
        found.sort_by(|a, b| a.component.version.cmp(&b.component.version));
        found
    }

    /// Combined ids of installed versions satisfying `query`, ascending
    pub fn find(&self, query: &Requirement) -> Vec<String> {
        self.matching(query)
            .into_iter()
            .map(InstalledComponent::combined_id)
            .collect()
    }

    /// Highest installed version satisfying `query`
    pub fn best_match(&self, query: &Requirement) -> Option<&InstalledComponent> {
        if let Some(exact) = query.exact_version() {
            let id = VersionedId::new(query.name.clone(), exact).combined();
            return self.components.get(&id);
        }
        self.matching(query).pop()
    }

    pub fn has_component(&self, query: &str) -> Result<bool> {
        let query = Requirement::parse(query)?;
        Ok(!self.matching(&query).is_empty())
    }

    /// Look a component up by exact combined id
    pub fn get(&self, combined_id: &str) -> Option<&InstalledComponent> {
        self.components.get(combined_id)
    }

    /// All installed components, after checking the registry against the graph
    pub fn components(&self) -> Result<Vec<&InstalledComponent>> {
        for (id, component) in &self.components {
            if !self.graph.contains(&component.node_key()) {
                return Err(Error::Consistency(format!(
                    "{} is registered but has no graph node",
                    id
                )));
            }
        }
        for node in self.graph.nodes_of_kind(UnitKind::Component) {
            if !self.components.contains_key(&node.id) {
                return Err(Error::Consistency(format!(
                    "Graph node {} has no registry entry",
                    node
                )));
            }
        }
        Ok(self.components.values().collect())
    }

    /// Installed versions of `name`, ascending
    pub fn component_versions(&self, name: &str) -> Vec<Version> {
        self.matching(&Requirement::any(name))
            .into_iter()
            .map(|c| c.component.version.clone())
            .collect()
    }

    /// Fetch the highest version satisfying `query`
    ///
    /// With `as_is` the registry record is returned untouched. Otherwise the
    /// component's files are first relocated to a fresh storage directory and
    /// the returned record's `index_file` is the absolute path of the index
    /// in that directory.
    pub fn get_component(&mut self, query: &str, as_is: bool) -> Result<Option<InstalledComponent>> {
        let query = Requirement::parse(query)?;
        let Some(found) = self.best_match(&query).cloned() else {
            return Ok(None);
        };
        if as_is {
            return Ok(Some(found));
        }

        let exact = Requirement {
            name: found.component.id.clone(),
            range: crate::version::exact_range(&found.component.version),
        };
        self.relocate(&exact)?;

        let mut relocated = self
            .components
            .get(&found.combined_id())
            .cloned()
            .ok_or_else(|| Error::NotFound(found.combined_id()))?;
        let index = self.index_path(&relocated)?;
        relocated.component.index_file = index.to_string_lossy().into_owned();
        Ok(Some(relocated))
    }

    /// Absolute path of a component's index file, which must exist
    pub fn index_path(&self, component: &InstalledComponent) -> Result<PathBuf> {
        let index = self
            .storage
            .path_of(&component.location)?
            .join(&component.component.index_file);
        if !index.is_file() {
            return Err(Error::NotFound(format!(
                "Index file of {} at {}",
                component.combined_id(),
                index.display()
            )));
        }
        Ok(index)
    }

    /// Find an installed version that can stand in for the requested one
    ///
    /// Only the name of `query` selects candidates; its lower bound is the
    /// requested version. Versions are scanned in ascending order and an
    /// exact match wins outright. Otherwise the last version whose
    /// `compatibleUntil` is at or below the requested version is returned.
    /// With no requested version the latest install is returned.
    pub fn get_component_compatible_with(&self, query: &str) -> Result<Option<InstalledComponent>> {
        let query = Requirement::parse(query)?;
        let candidates = self.matching(&Requirement::any(query.name.clone()));

        let Some(requested) = query.requested_version() else {
            return Ok(candidates.last().map(|c| (*c).clone()));
        };

        let mut result = None;
        for candidate in candidates {
            let c = &candidate.component;
            if c.version == requested {
                return Ok(Some(candidate.clone()));
            }
            if c.compatible_until <= requested {
                result = Some(candidate);
            }
        }
        Ok(result.cloned())
    }

    /// Move every version matching `query` to a freshly allocated directory
    ///
    /// The old directory is released on commit, the new one on decline.
    pub fn relocate(&mut self, query: &Requirement) -> Result<Vec<String>> {
        let ids = self.find(query);
        let mut moved = Vec::with_capacity(ids.len());

        for id in ids {
            let Some(record) = self.components.get_mut(&id) else {
                continue;
            };
            let old = record.location.clone();
            let new = self.storage.duplicate(&old)?;
            record.location = new.clone();

            if let Err(e) = self.save() {
                if let Some(record) = self.components.get_mut(&id) {
                    record.location = old;
                }
                release_now(&self.storage, &new);
                return Err(e);
            }

            let storage = self.storage.clone();
            self.transact
                .after_commit(HOLDER, move || storage.release(&old))?;
            let storage = self.storage.clone();
            let fresh = new.clone();
            self.transact
                .after_decline(HOLDER, move || storage.release(&fresh));

            debug!("Relocated {} to {}", id, new);
            moved.push(id);
        }
        Ok(moved)
    }

    /// Remove every version matching `query` that nothing depends on
    ///
    /// Versions with dependents are skipped. Returns the removed ids.
    pub fn remove_component(&mut self, query: &str) -> Result<Vec<String>> {
        let query = Requirement::parse(query)?;
        let mut removed = Vec::new();

        for id in self.find(&query) {
            let key = NodeKey::component(id.clone());
            if self.graph.has_dependents(&key) {
                debug!("Keeping {}: still included", id);
                continue;
            }
            if let Some(record) = self.components.remove(&id) {
                self.graph.remove_node(&key);
                removed.push(record);
            }
        }

        if removed.is_empty() {
            return Ok(Vec::new());
        }

        if let Err(e) = self.save() {
            for record in removed {
                self.graph.add_node(record.node_key());
                self.components.insert(record.combined_id(), record);
            }
            return Err(e);
        }

        let mut ids = Vec::with_capacity(removed.len());
        for record in removed {
            self.release_on_commit(record.location)?;
            info!("Removed component {}", record.component.combined_id());
            ids.push(record.component.combined_id());
        }
        Ok(ids)
    }

    /// Drop a component nothing depends on, as part of a larger operation
    ///
    /// The caller persists the registry.
    pub(crate) fn forget(&mut self, combined_id: &str) -> Result<Option<InstalledComponent>> {
        let key = NodeKey::component(combined_id);
        if self.graph.has_dependents(&key) {
            return Ok(None);
        }
        let Some(record) = self.components.remove(combined_id) else {
            return Ok(None);
        };
        self.graph.remove_node(&key);
        self.release_on_commit(record.location.clone())?;
        Ok(Some(record))
    }

    fn release_on_commit(&self, location: String) -> Result<()> {
        let storage = self.storage.clone();
        self.transact
            .after_commit(HOLDER, move || storage.release(&location))
    }

    /// Re-persist after a decline restored the in-memory state
    pub(crate) fn save_restored(&self) {
        if let Err(e) = self.save() {
            warn!("Could not persist restored component registry: {}", e);
        }
    }
}

/// Release a directory right away, logging instead of failing
fn release_now(storage: &ManagedStorage, location: &str) {
    if let Err(e) = storage.release(location) {
        warn!("Could not release storage directory {}: {}", location, e);
    }
}

impl TransactEnabled for Componentizer {
    type Snapshot = ComponentSnapshot;

    fn holder_name(&self) -> &'static str {
        HOLDER
    }

    fn snapshot(&self) -> ComponentSnapshot {
        (self.components.clone(), self.graph.clone())
    }

    fn restore(&mut self, snapshot: ComponentSnapshot) {
        let (components, graph) = snapshot;
        self.components = components;
        self.graph = graph;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    pub(super) fn write_component(
        dir: &Path,
        id: &str,
        version: &str,
        compatible_until: Option<&str>,
    ) -> PathBuf {
        fs::create_dir_all(dir.join("js")).unwrap();
        fs::write(dir.join("index.html"), format!("<h1>{}</h1>", id)).unwrap();
        fs::write(dir.join("js/app.js"), "run()").unwrap();
        let until = compatible_until
            .map(|u| format!(r#", "compatibleUntil": "{}""#, u))
            .unwrap_or_default();
        let manifest = dir.join("manifest.json");
        fs::write(
            &manifest,
            format!(
                r#"{{ "type": "component", "id": "{}", "name": "{}", "version": "{}",
                     "files": ["index.html", "js/*.js"] {} }}"#,
                id, id, version, until
            ),
        )
        .unwrap();
        manifest
    }

    pub(super) fn componentizer(root: &Path) -> Componentizer {
        let mut c = Componentizer::new(StoreConfig::new(root), Arc::new(Transact::new()));
        c.load_all().unwrap();
        c
    }

    fn install(c: &mut Componentizer, src: &Path, id: &str, version: &str, until: Option<&str>) {
        let dir = src.join(format!("{}-{}", id, version));
        let manifest = write_component(&dir, id, version, until);
        c.add_component_from_json(&manifest, false).unwrap();
    }

    #[test]
    fn test_compatibility_windows() {
        let temp = TempDir::new().unwrap();
        let mut c = componentizer(&temp.path().join("store"));
        install(&mut c, temp.path(), "A", "1.0.0", None);
        install(&mut c, temp.path(), "A", "2.0.0", Some("1.5.0"));

        let pick = |q: &str| {
            c.get_component_compatible_with(q)
                .unwrap()
                .map(|r| r.combined_id())
        };
        assert_eq!(pick("A@1.0.0").as_deref(), Some("A@1.0.0"));
        assert_eq!(pick("A@1.2.0").as_deref(), Some("A@1.0.0"));
        assert_eq!(pick("A@1.6.0").as_deref(), Some("A@2.0.0"));
        assert_eq!(pick("A").as_deref(), Some("A@2.0.0"));
        assert_eq!(pick("A@3.0.0").as_deref(), Some("A@2.0.0"));
        assert_eq!(pick("A@0.9.0"), None);
        assert_eq!(pick("B@1.0.0"), None);
    }

    #[test]
    fn test_queries_and_versions() {
        let temp = TempDir::new().unwrap();
        let mut c = componentizer(&temp.path().join("store"));
        install(&mut c, temp.path(), "A", "1.0.0", None);
        install(&mut c, temp.path(), "A", "1.10.0", None);
        install(&mut c, temp.path(), "A", "1.9.0", None);

        assert!(c.has_component("A").unwrap());
        assert!(c.has_component("A@^1.9").unwrap());
        assert!(!c.has_component("A@2").unwrap());
        assert_eq!(
            c.component_versions("A"),
            vec![
                Version::new(1, 0, 0),
                Version::new(1, 9, 0),
                Version::new(1, 10, 0)
            ]
        );
        let best = c.get_component("A@^1.0.0", true).unwrap().unwrap();
        assert_eq!(best.combined_id(), "A@1.10.0");
        assert_eq!(c.components().unwrap().len(), 3);
    }

    #[test]
    fn test_get_component_relocates() {
        let temp = TempDir::new().unwrap();
        let mut c = componentizer(&temp.path().join("store"));
        install(&mut c, temp.path(), "A", "1.0.0", None);

        let before = c.get_component("A", true).unwrap().unwrap();
        let fetched = c.get_component("A", false).unwrap().unwrap();
        assert_ne!(fetched.location, before.location);

        let index = PathBuf::from(&fetched.component.index_file);
        assert!(index.is_absolute());
        assert_eq!(fs::read_to_string(index).unwrap(), "<h1>A</h1>");
        // No transaction open: the superseded directory is gone already
        assert!(!c.storage().path_of(&before.location).unwrap().exists());

        let after = c.get_component("A", true).unwrap().unwrap();
        assert_eq!(after.location, fetched.location);
        assert_eq!(after.component.index_file, "index.html");
    }

    #[test]
    fn test_relocate_inside_declined_transaction() {
        let temp = TempDir::new().unwrap();
        let mut c = componentizer(&temp.path().join("store"));
        install(&mut c, temp.path(), "A", "1.0.0", None);
        let original = c.get("A@1.0.0").unwrap().location.clone();

        let transact = c.transact().clone();
        assert!(transact.begin_on("test", &c).unwrap());
        c.relocate(&Requirement::parse("A").unwrap()).unwrap();
        let moved = c.get("A@1.0.0").unwrap().location.clone();
        assert_ne!(moved, original);
        transact.end_on("test", &mut c, true).unwrap();
        c.save_restored();

        assert_eq!(c.get("A@1.0.0").unwrap().location, original);
        assert!(c.storage().path_of(&original).unwrap().is_dir());
        assert!(!c.storage().path_of(&moved).unwrap().exists());
    }

    #[test]
    fn test_remove_skips_dependents() {
        let temp = TempDir::new().unwrap();
        let mut c = componentizer(&temp.path().join("store"));
        install(&mut c, temp.path(), "A", "1.0.0", None);
        install(&mut c, temp.path(), "A", "2.0.0", None);

        let pkg = NodeKey::package("P@1.0.0");
        c.graph_mut().add_node(pkg.clone());
        c.graph_mut()
            .add_edge(&pkg, &NodeKey::component("A@1.0.0"))
            .unwrap();

        let removed = c.remove_component("A").unwrap();
        assert_eq!(removed, vec!["A@2.0.0".to_string()]);
        assert!(c.has_component("A@1.0.0").unwrap());
        assert!(!c.has_component("A@2.0.0").unwrap());
    }

    #[test]
    fn test_load_all_round_trip_and_prune() {
        let temp = TempDir::new().unwrap();
        let store = temp.path().join("store");
        let mut c = componentizer(&store);
        install(&mut c, temp.path(), "A", "1.0.0", None);
        let stray = c.storage().allocate().unwrap();

        let reloaded = componentizer(&store);
        assert_eq!(reloaded.components().unwrap().len(), 1);
        assert_eq!(reloaded.get("A@1.0.0"), c.get("A@1.0.0"));
        assert!(!reloaded.storage().path_of(&stray).unwrap().exists());
    }

    #[test]
    fn test_load_all_resets_on_missing_index() {
        let temp = TempDir::new().unwrap();
        let store = temp.path().join("store");
        let mut c = componentizer(&store);
        install(&mut c, temp.path(), "A", "1.0.0", None);
        let record = c.get("A@1.0.0").unwrap().clone();
        fs::remove_file(c.storage().path_of(&record.location).unwrap().join("index.html")).unwrap();

        let reloaded = componentizer(&store);
        assert!(reloaded.components().unwrap().is_empty());
        assert!(reloaded.graph().is_empty());
    }

    #[test]
    fn test_load_all_survives_corrupt_registry() {
        let temp = TempDir::new().unwrap();
        let config = StoreConfig::new(temp.path());
        fs::write(config.components_registry(), "][").unwrap();

        let c = componentizer(temp.path());
        assert!(c.components().unwrap().is_empty());
    }

    #[test]
    fn test_consistency_fault() {
        let temp = TempDir::new().unwrap();
        let mut c = componentizer(temp.path());
        c.graph_mut().add_node(NodeKey::component("ghost@1.0.0"));
        assert!(matches!(c.components(), Err(Error::Consistency(_))));
    }
}
