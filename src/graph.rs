// src/graph.rs

//! Dependency graph shared by the component and package registries
//!
//! Nodes are `kind/id` keys (`component/button@1.0.0`, `package/forms@2.1.0`)
//! and edges run from a package to each of its direct includes. Components
//! are leaves: no edge may originate from one.
//!
//! The graph is plain data (`Clone`), so registries snapshot it wholesale
//! when they open a transaction and put it back on decline.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// The two kinds of installable unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Component,
    Package,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Component => "component",
            Self::Package => "package",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "component" => Some(Self::Component),
            "package" => Some(Self::Package),
            _ => None,
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A graph node: unit kind plus combined id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct NodeKey {
    pub kind: UnitKind,
    pub id: String,
}

impl NodeKey {
    pub fn new(kind: UnitKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn component(id: impl Into<String>) -> Self {
        Self::new(UnitKind::Component, id)
    }

    pub fn package(id: impl Into<String>) -> Self {
        Self::new(UnitKind::Package, id)
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

impl FromStr for NodeKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, id) = s
            .split_once('/')
            .ok_or_else(|| Error::InvalidQuery(format!("Node key '{}' has no kind prefix", s)))?;
        let kind = UnitKind::parse(kind)
            .ok_or_else(|| Error::InvalidQuery(format!("Unknown unit kind '{}' in '{}'", kind, s)))?;
        if id.is_empty() {
            return Err(Error::InvalidQuery(format!("Node key '{}' has an empty id", s)));
        }
        Ok(Self::new(kind, id))
    }
}

impl From<NodeKey> for String {
    fn from(key: NodeKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for NodeKey {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

/// Directed dependency graph with reverse-edge index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    nodes: BTreeSet<NodeKey>,
    /// node -> nodes it depends on
    edges: BTreeMap<NodeKey, BTreeSet<NodeKey>>,
    /// node -> nodes depending on it
    reverse_edges: BTreeMap<NodeKey, BTreeSet<NodeKey>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live graph, optionally checking that it is acyclic first
    ///
    /// A cyclic graph is unusable: with `safe` it is reinitialized to empty
    /// (and a warning logged), otherwise the cycle is reported as an error.
    pub fn get(&mut self, safe: bool, circular_test: bool) -> Result<&Self> {
        if circular_test
            && let Err(e) = self.topological_order()
        {
            if !safe {
                return Err(e);
            }
            warn!("Dependency graph unusable ({}), reinitializing", e);
            self.clear();
        }
        Ok(self)
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.edges.clear();
        self.reverse_edges.clear();
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, key: &NodeKey) -> bool {
        self.nodes.contains(key)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeKey> {
        self.nodes.iter()
    }

    pub fn nodes_of_kind(&self, kind: UnitKind) -> Vec<NodeKey> {
        self.nodes.iter().filter(|n| n.kind == kind).cloned().collect()
    }

    /// Add a node; returns false if it was already present
    pub fn add_node(&mut self, key: NodeKey) -> bool {
        self.nodes.insert(key)
    }

    /// Remove a node together with every edge touching it
    pub fn remove_node(&mut self, key: &NodeKey) -> bool {
        if !self.nodes.remove(key) {
            return false;
        }
        if let Some(deps) = self.edges.remove(key) {
            for dep in deps {
                self.unlink_reverse(&dep, key);
            }
        }
        if let Some(dependents) = self.reverse_edges.remove(key) {
            for dependent in dependents {
                if let Some(out) = self.edges.get_mut(&dependent) {
                    out.remove(key);
                    if out.is_empty() {
                        self.edges.remove(&dependent);
                    }
                }
            }
        }
        true
    }

    /// Remove every node of one kind
    pub fn clear_kind(&mut self, kind: UnitKind) {
        for key in self.nodes_of_kind(kind) {
            self.remove_node(&key);
        }
    }

    /// Add a dependency edge `from -> to`
    pub fn add_edge(&mut self, from: &NodeKey, to: &NodeKey) -> Result<()> {
        if from.kind == UnitKind::Component {
            return Err(Error::Consistency(format!(
                "Component {} cannot depend on {}",
                from, to
            )));
        }
        if from == to {
            return Err(Error::CircularDependency(format!("{} includes itself", from)));
        }
        for key in [from, to] {
            if !self.nodes.contains(key) {
                return Err(Error::NotFound(format!("Graph node {}", key)));
            }
        }

        self.edges.entry(from.clone()).or_default().insert(to.clone());
        self.reverse_edges
            .entry(to.clone())
            .or_default()
            .insert(from.clone());
        Ok(())
    }

    pub fn remove_edge(&mut self, from: &NodeKey, to: &NodeKey) -> bool {
        let removed = match self.edges.get_mut(from) {
            Some(out) => {
                let removed = out.remove(to);
                if out.is_empty() {
                    self.edges.remove(from);
                }
                removed
            }
            None => false,
        };
        if removed {
            self.unlink_reverse(to, from);
        }
        removed
    }

    /// Drop every outgoing edge of a node
    pub fn clear_dependencies(&mut self, from: &NodeKey) {
        for to in self.dependencies(from) {
            self.remove_edge(from, &to);
        }
    }

    fn unlink_reverse(&mut self, to: &NodeKey, from: &NodeKey) {
        if let Some(rev) = self.reverse_edges.get_mut(to) {
            rev.remove(from);
            if rev.is_empty() {
                self.reverse_edges.remove(to);
            }
        }
    }

    /// Direct dependencies of a node
    pub fn dependencies(&self, key: &NodeKey) -> Vec<NodeKey> {
        self.edges
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Nodes depending directly on this one
    pub fn dependents(&self, key: &NodeKey) -> Vec<NodeKey> {
        self.reverse_edges
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_dependents(&self, key: &NodeKey) -> bool {
        self.reverse_edges.get(key).is_some_and(|s| !s.is_empty())
    }

    pub fn has_dependencies(&self, key: &NodeKey) -> bool {
        self.edges.get(key).is_some_and(|s| !s.is_empty())
    }

    /// A node nothing depends on and that depends on nothing
    pub fn is_isolated(&self, key: &NodeKey) -> bool {
        !self.has_dependents(key) && !self.has_dependencies(key)
    }

    /// Everything reachable from a node, excluding the node itself
    pub fn transitive_dependencies(&self, key: &NodeKey) -> BTreeSet<NodeKey> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(key.clone());

        while let Some(current) = queue.pop_front() {
            if let Some(deps) = self.edges.get(&current) {
                for dep in deps {
                    if dep != key && seen.insert(dep.clone()) {
                        queue.push_back(dep.clone());
                    }
                }
            }
        }

        seen
    }

    /// Topological order using Kahn's algorithm
    ///
    /// Dependents come before their dependencies, so a sweep in this order
    /// sees a package before the components it includes.
    pub fn topological_order(&self) -> Result<Vec<NodeKey>> {
        let mut in_degree: HashMap<&NodeKey, usize> =
            self.nodes.iter().map(|n| (n, 0)).collect();
        for deps in self.edges.values() {
            for dep in deps {
                if let Some(d) = in_degree.get_mut(dep) {
                    *d += 1;
                }
            }
        }

        let mut queue: VecDeque<&NodeKey> = self
            .nodes
            .iter()
            .filter(|n| in_degree.get(n) == Some(&0))
            .collect();
        let mut result = Vec::with_capacity(self.nodes.len());

        while let Some(node) = queue.pop_front() {
            result.push(node.clone());
            if let Some(deps) = self.edges.get(node) {
                for dep in deps {
                    if let Some(d) = in_degree.get_mut(dep) {
                        *d -= 1;
                        if *d == 0 {
                            queue.push_back(dep);
                        }
                    }
                }
            }
        }

        if result.len() != self.nodes.len() {
            let cycle = self
                .detect_cycle()
                .map(|c| {
                    c.iter()
                        .map(|n| n.to_string())
                        .collect::<Vec<_>>()
                        .join(" -> ")
                })
                .unwrap_or_else(|| "unknown cycle".to_string());
            return Err(Error::CircularDependency(cycle));
        }

        Ok(result)
    }

    /// Find one cycle, returned as the path that closes it
    pub fn detect_cycle(&self) -> Option<Vec<NodeKey>> {
        let mut visited = HashSet::new();
        let mut rec_stack = Vec::new();

        for node in &self.nodes {
            if !visited.contains(node)
                && let Some(cycle) = self.dfs_cycle_detect(node, &mut visited, &mut rec_stack)
            {
                return Some(cycle);
            }
        }

        None
    }

    fn dfs_cycle_detect(
        &self,
        node: &NodeKey,
        visited: &mut HashSet<NodeKey>,
        rec_stack: &mut Vec<NodeKey>,
    ) -> Option<Vec<NodeKey>> {
        visited.insert(node.clone());
        rec_stack.push(node.clone());

        if let Some(deps) = self.edges.get(node) {
            for dep in deps {
                if let Some(pos) = rec_stack.iter().position(|n| n == dep) {
                    let mut cycle = rec_stack[pos..].to_vec();
                    cycle.push(dep.clone());
                    return Some(cycle);
                }
                if !visited.contains(dep)
                    && let Some(cycle) = self.dfs_cycle_detect(dep, visited, rec_stack)
                {
                    return Some(cycle);
                }
            }
        }

        rec_stack.pop();
        None
    }

    /// Remove every node for which `predicate` holds, sweeping in topological order
    ///
    /// The predicate sees the graph as it is at visit time, so removing a
    /// package can make the components it included eligible later in the
    /// same sweep. Fails without removing anything if the graph is cyclic.
    pub fn filter_by<F>(&mut self, mut predicate: F) -> Result<Vec<NodeKey>>
    where
        F: FnMut(&Self, &NodeKey) -> bool,
    {
        let order = self.topological_order()?;
        let mut removed = Vec::new();

        for node in order {
            if predicate(self, &node) {
                self.remove_node(&node);
                removed.push(node);
            }
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with(nodes: &[NodeKey]) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for n in nodes {
            graph.add_node(n.clone());
        }
        graph
    }

    #[test]
    fn test_node_key_round_trip() {
        let key: NodeKey = "package/forms@1.0.0".parse().unwrap();
        assert_eq!(key, NodeKey::package("forms@1.0.0"));
        assert_eq!(key.to_string(), "package/forms@1.0.0");
        assert!("widget/forms@1.0.0".parse::<NodeKey>().is_err());
        assert!("forms@1.0.0".parse::<NodeKey>().is_err());
    }

    #[test]
    fn test_component_cannot_have_edges() {
        let a = NodeKey::component("a@1.0.0");
        let b = NodeKey::component("b@1.0.0");
        let mut graph = graph_with(&[a.clone(), b.clone()]);
        assert!(matches!(graph.add_edge(&a, &b), Err(Error::Consistency(_))));
    }

    #[test]
    fn test_edge_requires_known_nodes() {
        let p = NodeKey::package("p@1.0.0");
        let a = NodeKey::component("a@1.0.0");
        let mut graph = graph_with(std::slice::from_ref(&p));
        assert!(matches!(graph.add_edge(&p, &a), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_topological_order_puts_dependents_first() {
        let p = NodeKey::package("p@1.0.0");
        let q = NodeKey::package("q@1.0.0");
        let a = NodeKey::component("a@1.0.0");
        let mut graph = graph_with(&[a.clone(), p.clone(), q.clone()]);
        graph.add_edge(&p, &q).unwrap();
        graph.add_edge(&q, &a).unwrap();

        let order = graph.topological_order().unwrap();
        let pos = |k: &NodeKey| order.iter().position(|n| n == k).unwrap();
        assert!(pos(&p) < pos(&q));
        assert!(pos(&q) < pos(&a));
    }

    #[test]
    fn test_cycle_detection() {
        let p = NodeKey::package("p@1.0.0");
        let q = NodeKey::package("q@1.0.0");
        let mut graph = graph_with(&[p.clone(), q.clone()]);
        graph.add_edge(&p, &q).unwrap();
        assert!(graph.detect_cycle().is_none());

        graph.add_edge(&q, &p).unwrap();
        let cycle = graph.detect_cycle().unwrap();
        assert_eq!(cycle.first(), cycle.last());
        assert!(matches!(
            graph.topological_order(),
            Err(Error::CircularDependency(_))
        ));
    }

    #[test]
    fn test_get_resets_cyclic_graph_when_safe() {
        let p = NodeKey::package("p@1.0.0");
        let q = NodeKey::package("q@1.0.0");
        let mut graph = graph_with(&[p.clone(), q.clone()]);
        graph.add_edge(&p, &q).unwrap();
        graph.add_edge(&q, &p).unwrap();

        assert!(graph.get(false, true).is_err());
        assert_eq!(graph.len(), 2);

        assert!(graph.get(true, true).unwrap().is_empty());
    }

    #[test]
    fn test_remove_node_drops_edges() {
        let p = NodeKey::package("p@1.0.0");
        let a = NodeKey::component("a@1.0.0");
        let mut graph = graph_with(&[p.clone(), a.clone()]);
        graph.add_edge(&p, &a).unwrap();

        assert!(graph.remove_node(&p));
        assert!(!graph.has_dependents(&a));
        assert!(graph.is_isolated(&a));
    }

    #[test]
    fn test_filter_by_cascades_in_one_sweep() {
        let p = NodeKey::package("p@1.0.0");
        let a = NodeKey::component("a@1.0.0");
        let b = NodeKey::component("b@1.0.0");
        let keep = NodeKey::package("keep@1.0.0");
        let mut graph = graph_with(&[p.clone(), a.clone(), b.clone(), keep.clone()]);
        graph.add_edge(&p, &a).unwrap();
        graph.add_edge(&keep, &b).unwrap();

        // Removing p first leaves a isolated, which the same sweep then takes
        let removed = graph
            .filter_by(|g, n| *n == p || (n.kind == UnitKind::Component && !g.has_dependents(n)))
            .unwrap();
        assert_eq!(removed, vec![p, a]);
        assert!(graph.contains(&b));
        assert!(graph.contains(&keep));
    }

    #[test]
    fn test_transitive_dependencies() {
        let p = NodeKey::package("p@1.0.0");
        let q = NodeKey::package("q@1.0.0");
        let a = NodeKey::component("a@1.0.0");
        let b = NodeKey::component("b@1.0.0");
        let mut graph = graph_with(&[p.clone(), q.clone(), a.clone(), b.clone()]);
        graph.add_edge(&p, &q).unwrap();
        graph.add_edge(&p, &a).unwrap();
        graph.add_edge(&q, &b).unwrap();

        let deps = graph.transitive_dependencies(&p);
        assert_eq!(deps.len(), 3);
        assert!(deps.contains(&b));
        assert!(graph.transitive_dependencies(&a).is_empty());
    }

    #[test]
    fn test_clear_kind() {
        let p = NodeKey::package("p@1.0.0");
        let a = NodeKey::component("a@1.0.0");
        let mut graph = graph_with(&[p.clone(), a.clone()]);
        graph.add_edge(&p, &a).unwrap();

        graph.clear_kind(UnitKind::Package);
        assert_eq!(graph.nodes_of_kind(UnitKind::Package), Vec::<NodeKey>::new());
        assert!(graph.contains(&a));
        assert!(graph.is_isolated(&a));
    }
}
