//! Dependency graph store backed by petgraph::StableDiGraph
//!
//! Forward edges live both in `FileNode::deps` (ordered) and as petgraph
//! edges; the reverse index is petgraph's incoming adjacency. Every mutation
//! goes through this type so the two never disagree.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction;

use crate::error::{CoreError, Result};
use crate::model::*;

/// Edges added and removed by one `set_dependencies` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeDelta {
    pub added: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

impl EdgeDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// The per-session store of tracked files and their import edges.
pub struct DependencyGraph {
    inner: StableDiGraph<FileNode, ()>,
    index: HashMap<PathBuf, NodeIndex>,
    entries: Vec<PathBuf>,
}

impl std::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("node_count", &self.inner.node_count())
            .field("edge_count", &self.inner.edge_count())
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyGraph {
    pub fn new() -> Self {
        DependencyGraph {
            inner: StableDiGraph::new(),
            index: HashMap::new(),
            entries: Vec::new(),
        }
    }

    /// Total number of tracked files, tombstones included.
    pub fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    /// Total number of import edges.
    pub fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.index.contains_key(path)
    }

    pub fn node(&self, path: &Path) -> Option<&FileNode> {
        self.index
            .get(path)
            .and_then(|&idx| self.inner.node_weight(idx))
    }

    pub fn node_mut(&mut self, path: &Path) -> Option<&mut FileNode> {
        let idx = *self.index.get(path)?;
        self.inner.node_weight_mut(idx)
    }

    /// Iterate over all nodes.
    pub fn nodes(&self) -> impl Iterator<Item = &FileNode> {
        self.inner
            .node_indices()
            .filter_map(move |idx| self.inner.node_weight(idx))
    }

    /// Insert a node if it is not tracked yet. Returns false when it was.
    pub fn insert_node(&mut self, path: &Path, kinds: SyntaxKinds) -> bool {
        if self.index.contains_key(path) {
            return false;
        }
        self.index_for(path, kinds);
        true
    }

    fn index_for(&mut self, path: &Path, kinds: SyntaxKinds) -> NodeIndex {
        if let Some(&idx) = self.index.get(path) {
            return idx;
        }
        let idx = self.inner.add_node(FileNode::new(path, kinds));
        self.index.insert(path.to_path_buf(), idx);
        idx
    }

    pub fn set_presence(&mut self, path: &Path, presence: Presence) {
        if let Some(node) = self.node_mut(path) {
            node.presence = presence;
        }
    }

    /// Entries in registration order.
    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    pub fn is_entry(&self, path: &Path) -> bool {
        self.entries.iter().any(|e| e == path)
    }

    /// Register an entry, inserting its node when needed. Returns false if it
    /// was already an entry.
    pub fn add_entry(&mut self, path: &Path, kinds: SyntaxKinds) -> bool {
        self.insert_node(path, kinds);
        if self.is_entry(path) {
            return false;
        }
        self.entries.push(path.to_path_buf());
        true
    }

    pub fn remove_entry(&mut self, path: &Path) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e != path);
        before != self.entries.len()
    }

    /// Direct dependencies in import order.
    pub fn dependencies(&self, path: &Path) -> &[PathBuf] {
        self.node(path).map(|n| n.deps.as_slice()).unwrap_or(&[])
    }

    /// Files that import `path` directly, sorted by path.
    pub fn dependents(&self, path: &Path) -> Vec<PathBuf> {
        let Some(&idx) = self.index.get(path) else {
            return Vec::new();
        };
        let mut out: Vec<PathBuf> = self
            .inner
            .neighbors_directed(idx, Direction::Incoming)
            .filter_map(|n| self.inner.node_weight(n))
            .map(|n| n.path.clone())
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Replace the dependency list of `path`, keeping forward and reverse
    /// edges in step. Duplicates and self-imports are dropped; targets that
    /// are not tracked yet are inserted as unseen placeholders.
    pub fn set_dependencies(
        &mut self,
        path: &Path,
        deps: &[PathBuf],
        unresolved: Vec<UnresolvedImport>,
    ) -> EdgeDelta {
        let Some(&src) = self.index.get(path) else {
            return EdgeDelta::default();
        };

        let mut seen = HashSet::new();
        let ordered: Vec<PathBuf> = deps
            .iter()
            .filter(|d| d.as_path() != path)
            .filter(|d| seen.insert(d.to_path_buf()))
            .cloned()
            .collect();

        let old: Vec<PathBuf> = self
            .inner
            .node_weight(src)
            .map(|n| n.deps.clone())
            .unwrap_or_default();
        let old_set: HashSet<&PathBuf> = old.iter().collect();

        let mut delta = EdgeDelta::default();
        for dep in &old {
            if seen.contains(dep) {
                continue;
            }
            if let Some(&target) = self.index.get(dep)
                && let Some(edge) = self.inner.find_edge(src, target)
            {
                self.inner.remove_edge(edge);
            }
            delta.removed.push(dep.clone());
        }
        for dep in &ordered {
            if old_set.contains(dep) {
                continue;
            }
            let target = self.index_for(dep, SyntaxKinds::NONE);
            self.inner.add_edge(src, target, ());
            delta.added.push(dep.clone());
        }

        if let Some(node) = self.inner.node_weight_mut(src) {
            node.deps = ordered;
            node.unresolved = unresolved;
        }
        delta
    }

    /// Mark a file as deleted: it keeps its incoming edges but loses its own.
    pub fn tombstone(&mut self, path: &Path) -> EdgeDelta {
        let delta = self.set_dependencies(path, &[], Vec::new());
        if let Some(node) = self.node_mut(path) {
            node.presence = Presence::Missing;
            node.scanned = None;
        }
        delta
    }

    /// Detach a file. Returns true when the node was kept as a tombstone
    /// because other files still import it.
    pub fn remove_file(&mut self, path: &Path) -> bool {
        if !self.contains(path) {
            return false;
        }
        self.tombstone(path);
        self.remove_entry(path);
        if !self.dependents(path).is_empty() {
            return true;
        }
        self.drop_node(path);
        false
    }

    fn drop_node(&mut self, path: &Path) {
        if let Some(idx) = self.index.remove(path) {
            self.inner.remove_node(idx);
        }
    }

    /// Every file transitively imported by `path`, breadth-first in import
    /// order, excluding `path` itself.
    pub fn reachable_from(&self, path: &Path) -> Vec<PathBuf> {
        let mut visited: HashSet<&Path> = HashSet::new();
        let mut queue: VecDeque<&Path> = VecDeque::new();
        let mut out = Vec::new();
        let Some(start) = self.node(path) else {
            return out;
        };
        visited.insert(&start.path);
        queue.push_back(&start.path);
        while let Some(current) = queue.pop_front() {
            for dep in self.dependencies(current) {
                if visited.insert(dep.as_path()) {
                    out.push(dep.clone());
                    queue.push_back(dep.as_path());
                }
            }
        }
        out
    }

    /// Entries that transitively import `path`, each with the shortest chain
    /// from `path` up to the entry (both inclusive). `path` itself is not
    /// reported even when it is an entry.
    pub fn entries_reaching(&self, path: &Path) -> Vec<(PathBuf, Vec<PathBuf>)> {
        let mut parents: HashMap<PathBuf, PathBuf> = HashMap::new();
        let mut visited: HashSet<PathBuf> = HashSet::new();
        let mut queue: VecDeque<PathBuf> = VecDeque::new();
        let mut out = Vec::new();
        if !self.contains(path) {
            return out;
        }
        visited.insert(path.to_path_buf());
        queue.push_back(path.to_path_buf());

        while let Some(current) = queue.pop_front() {
            for dependent in self.dependents(&current) {
                if !visited.insert(dependent.clone()) {
                    continue;
                }
                parents.insert(dependent.clone(), current.clone());
                if self.is_entry(&dependent) {
                    let mut tree = vec![dependent.clone()];
                    let mut cursor = &dependent;
                    while let Some(parent) = parents.get(cursor) {
                        tree.push(parent.clone());
                        cursor = parent;
                    }
                    tree.reverse();
                    out.push((dependent.clone(), tree));
                }
                queue.push_back(dependent);
            }
        }
        out
    }

    /// Remove every node that no entry reaches. Returns the removed paths, sorted.
    pub fn collect_orphans(&mut self) -> Vec<PathBuf> {
        let mut live: HashSet<PathBuf> = HashSet::new();
        for entry in &self.entries {
            if self.contains(entry) {
                live.insert(entry.clone());
                live.extend(self.reachable_from(entry));
            }
        }
        let mut orphans: Vec<PathBuf> = self
            .index
            .keys()
            .filter(|p| !live.contains(*p))
            .cloned()
            .collect();
        orphans.sort();
        for orphan in &orphans {
            self.set_dependencies(orphan, &[], Vec::new());
        }
        for orphan in &orphans {
            self.drop_node(orphan);
        }
        orphans
    }

    /// Tracked files that still carry specifiers which did not resolve.
    pub fn with_unresolved(&self) -> Vec<PathBuf> {
        let mut out: Vec<PathBuf> = self
            .nodes()
            .filter(|n| !n.unresolved.is_empty())
            .map(|n| n.path.clone())
            .collect();
        out.sort();
        out
    }

    /// Tracked files located anywhere under `dir`, sorted.
    pub fn files_under(&self, dir: &Path) -> Vec<PathBuf> {
        let mut out: Vec<PathBuf> = self
            .index
            .keys()
            .filter(|p| p.starts_with(dir) && p.as_path() != dir)
            .cloned()
            .collect();
        out.sort();
        out
    }

    /// Parent directory of every tracked file, tombstones included.
    pub fn parent_dirs(&self) -> BTreeSet<PathBuf> {
        self.nodes()
            .filter_map(|n| n.parent_dir())
            .map(Path::to_path_buf)
            .collect()
    }

    /// Check the structural invariants a loaded snapshot must satisfy.
    pub fn validate(&self) -> Result<()> {
        for entry in &self.entries {
            if !self.contains(entry) {
                return Err(CoreError::InvalidSnapshot(format!(
                    "entry {} is not tracked",
                    entry.display()
                )));
            }
        }
        let mut declared = 0usize;
        for node in self.nodes() {
            let mut seen = HashSet::new();
            for dep in &node.deps {
                if !seen.insert(dep) {
                    return Err(CoreError::InvalidSnapshot(format!(
                        "duplicate edge {} -> {}",
                        node.path.display(),
                        dep.display()
                    )));
                }
                let Some(target) = self.node(dep) else {
                    return Err(CoreError::InvalidSnapshot(format!(
                        "{} imports untracked {}",
                        node.path.display(),
                        dep.display()
                    )));
                };
                if target.is_tombstone() && !target.deps.is_empty() {
                    return Err(CoreError::InvalidSnapshot(format!(
                        "missing {} still has imports",
                        dep.display()
                    )));
                }
            }
            declared += node.deps.len();
        }
        if declared != self.edge_count() {
            return Err(CoreError::InvalidSnapshot(
                "forward and reverse edges disagree".to_string(),
            ));
        }
        Ok(())
    }

    /// Nodes sorted by path, plus entries in order. Used for persistence.
    pub fn to_parts(&self) -> (Vec<FileNode>, Vec<PathBuf>) {
        let mut nodes: Vec<FileNode> = self.nodes().cloned().collect();
        nodes.sort_by(|a, b| a.path.cmp(&b.path));
        (nodes, self.entries.clone())
    }

    /// Rebuild a graph from persisted nodes, re-deriving every edge.
    pub fn from_parts(nodes: Vec<FileNode>, entries: Vec<PathBuf>) -> Result<Self> {
        let mut graph = DependencyGraph::new();
        for node in &nodes {
            if graph.contains(&node.path) {
                return Err(CoreError::InvalidSnapshot(format!(
                    "{} listed twice",
                    node.path.display()
                )));
            }
            let idx = graph.inner.add_node(FileNode {
                deps: Vec::new(),
                ..node.clone()
            });
            graph.index.insert(node.path.clone(), idx);
        }
        for node in nodes {
            let mut seen = HashSet::new();
            for dep in &node.deps {
                if !seen.insert(dep) || dep == &node.path {
                    return Err(CoreError::InvalidSnapshot(format!(
                        "bad edge {} -> {}",
                        node.path.display(),
                        dep.display()
                    )));
                }
                if !graph.contains(dep) {
                    return Err(CoreError::InvalidSnapshot(format!(
                        "{} imports untracked {}",
                        node.path.display(),
                        dep.display()
                    )));
                }
            }
            graph.set_dependencies(&node.path, &node.deps, node.unresolved);
        }
        for entry in entries {
            if !graph.contains(&entry) {
                return Err(CoreError::InvalidSnapshot(format!(
                    "entry {} is not tracked",
                    entry.display()
                )));
            }
            if !graph.is_entry(&entry) {
                graph.entries.push(entry);
            }
        }
        graph.validate()?;
        Ok(graph)
    }
}
