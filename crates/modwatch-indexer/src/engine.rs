//! Change engine: classifies files against the last reported state and
//! propagates each change up to the entries that depend on it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use modwatch_core::{
    ChangeCause, ChangeType, DependencyGraph, EntryChange, FileState, Presence, probe_file,
};
use tracing::{debug, warn};

use crate::builder::GraphBuilder;
use crate::entries::discover_entries;

/// Files to evaluate in one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidates {
    /// Every tracked file plus a fresh entry discovery.
    All,
    /// Only these paths, and whatever their changes lead to.
    Paths(Vec<PathBuf>),
}

/// A file that could not be evaluated. Its previous state is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub path: PathBuf,
    pub message: String,
}

/// Output of one evaluation pass.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    /// Affected entries, grouped by entry order.
    pub changes: Vec<EntryChange>,
    /// Every file whose state changed, in classification order.
    pub file_states: Vec<(PathBuf, FileState)>,
    pub failures: Vec<FileFailure>,
    /// Files dropped from the graph because no entry reaches them anymore.
    pub removed: Vec<PathBuf>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Entries with at least one change, in output order.
    pub fn affected_entries(&self) -> Vec<PathBuf> {
        let mut out: Vec<PathBuf> = Vec::new();
        for change in &self.changes {
            if !out.contains(&change.entry) {
                out.push(change.entry.clone());
            }
        }
        out
    }
}

struct Pass<'a> {
    builder: &'a GraphBuilder,
    graph: &'a mut DependencyGraph,
    /// Follow every dependency instead of only new ones.
    full: bool,
    queue: VecDeque<PathBuf>,
    queued: HashSet<PathBuf>,
    classified: HashMap<PathBuf, FileState>,
    new_entries: HashSet<PathBuf>,
    own: HashMap<PathBuf, ChangeType>,
    dep_changes: Vec<EntryChange>,
    set: ChangeSet,
}

impl<'a> Pass<'a> {
    fn enqueue(&mut self, path: &Path) {
        if !self.classified.contains_key(path) && self.queued.insert(path.to_path_buf()) {
            self.queue.push_back(path.to_path_buf());
        }
    }

    fn refresh_entries(&mut self, candidates: &Candidates) {
        let config = self.builder.config();
        let found: Vec<PathBuf> = match candidates {
            Candidates::All => {
                let stale: Vec<PathBuf> = self
                    .graph
                    .entries()
                    .iter()
                    .filter(|e| !config.is_entry_path(e))
                    .cloned()
                    .collect();
                for entry in stale {
                    debug!("{} is no longer configured as an entry", entry.display());
                    self.graph.remove_entry(&entry);
                }
                discover_entries(config)
            }
            Candidates::Paths(paths) => paths
                .iter()
                .filter(|p| config.is_entry_path(p) && modwatch_core::signature::is_file(p))
                .cloned()
                .collect(),
        };
        for entry in found {
            let kinds = config.kinds_for(&entry);
            if self.graph.add_entry(&entry, kinds) {
                debug!("New entry {}", entry.display());
                self.new_entries.insert(entry);
            }
        }
    }

    /// Classify queued files until the queue is empty.
    fn drain(&mut self) {
        while let Some(path) = self.queue.pop_front() {
            self.queued.remove(&path);
            if self.classified.contains_key(&path) || !self.graph.contains(&path) {
                continue;
            }
            match self.classify(&path) {
                Ok(state) => {
                    self.classified.insert(path.clone(), state);
                    if state != FileState::NotModified {
                        self.set.file_states.push((path.clone(), state));
                    }
                    self.record(&path, state);
                }
                Err(message) => {
                    warn!("Cannot evaluate {}: {}", path.display(), message);
                    self.classified.insert(path.clone(), FileState::NotModified);
                    self.set.failures.push(FileFailure { path, message });
                }
            }
        }
    }

    fn classify(&mut self, path: &Path) -> Result<FileState, String> {
        let probed = probe_file(path).map_err(|e| e.to_string())?;
        let Some(node) = self.graph.node(path) else {
            return Ok(FileState::NotModified);
        };
        let presence = node.presence;
        let scanned = node.scanned;

        let Some((signature, content)) = probed else {
            return Ok(match presence {
                Presence::Present(_) => {
                    // Dependents keep their edge to the tombstone.
                    self.propagate(path, FileState::Deleted);
                    self.graph.tombstone(path);
                    FileState::Deleted
                }
                Presence::Unseen => {
                    self.graph.tombstone(path);
                    FileState::NotModified
                }
                Presence::Missing => FileState::NotModified,
            });
        };

        let state = match presence {
            Presence::Unseen | Presence::Missing => FileState::Created,
            Presence::Present(old) if old != signature => FileState::Modified,
            Presence::Present(_) => FileState::NotModified,
        };

        let mut added = Vec::new();
        if scanned != Some(signature) {
            let outcome = self.builder.scan_content(path, &content);
            let rescan = self.builder.apply_scan(self.graph, path, outcome);
            added = rescan.delta.added;
        }
        self.graph.set_presence(path, Presence::Present(signature));

        let deps: Vec<PathBuf> = self.graph.dependencies(path).to_vec();
        for dep in deps {
            let unseen = self
                .graph
                .node(&dep)
                .is_some_and(|n| n.presence == Presence::Unseen);
            if self.full || state == FileState::Created || unseen || added.contains(&dep) {
                self.enqueue(&dep);
            }
        }

        if state != FileState::NotModified {
            self.propagate(path, state);
        }
        Ok(state)
    }

    /// Dependency changes for every entry that reaches `path`.
    fn propagate(&mut self, path: &Path, state: FileState) {
        let Some(change_type) = ChangeType::from_state(state, false) else {
            return;
        };
        for (entry, tree) in self.graph.entries_reaching(path) {
            let cause = ChangeCause {
                file: path.to_path_buf(),
                state,
            };
            self.dep_changes
                .push(EntryChange::dependency(change_type, entry, cause, tree));
        }
    }

    fn record(&mut self, path: &Path, state: FileState) {
        if !self.graph.is_entry(path) {
            return;
        }
        let state = if self.new_entries.contains(path) && state == FileState::NotModified {
            FileState::Created
        } else {
            state
        };
        if let Some(change_type) = ChangeType::from_state(state, true) {
            self.own.insert(path.to_path_buf(), change_type);
        }
    }

    /// Re-resolve specifiers that missed last time. A file whose imports now
    /// resolve is rescanned and its new dependencies are queued.
    fn retry_unresolved(&mut self, retried: &mut HashSet<PathBuf>) -> bool {
        let mut progressed = false;
        for path in self.graph.with_unresolved() {
            if !retried.insert(path.clone()) {
                continue;
            }
            let Some(node) = self.graph.node(&path) else {
                continue;
            };
            if !matches!(node.presence, Presence::Present(_)) {
                continue;
            }
            let resolver = self.builder.resolver();
            let hit = node
                .unresolved
                .iter()
                .any(|u| !resolver.resolve(&u.specifier, u.syntax, &path).is_empty());
            if !hit {
                continue;
            }
            match self.builder.rescan_file(self.graph, &path) {
                Ok(Some(rescan)) => {
                    debug!(
                        "{} now resolves {} more file(s)",
                        path.display(),
                        rescan.delta.added.len()
                    );
                    for dep in rescan.delta.added {
                        self.enqueue(&dep);
                        progressed = true;
                    }
                }
                Ok(None) => self.enqueue(&path),
                Err(e) => warn!("Cannot rescan {}: {}", path.display(), e),
            }
        }
        progressed
    }

    fn finish(mut self) -> ChangeSet {
        let order: Vec<PathBuf> = self.graph.entries().to_vec();
        let mut dep_changes = std::mem::take(&mut self.dep_changes);
        for entry in &order {
            if let Some(change_type) = self.own.remove(entry) {
                self.set.changes.push(EntryChange::own(change_type, entry));
            }
            let (mine, rest): (Vec<EntryChange>, Vec<EntryChange>) =
                dep_changes.into_iter().partition(|c| &c.entry == entry);
            dep_changes = rest;
            self.set.changes.extend(mine);
        }

        for (path, state) in &self.set.file_states {
            if *state == FileState::Deleted && self.graph.remove_entry(path) {
                debug!("Entry {} removed", path.display());
            }
        }
        self.set.removed = self.graph.collect_orphans();
        self.set
    }
}

/// Evaluate `candidates` against the graph, update it, and report what
/// changed for each entry.
///
/// Each file is classified at most once per call. Per-file read failures
/// are reported in [`ChangeSet::failures`] and leave that file untouched.
pub fn compute_changes(
    builder: &GraphBuilder,
    graph: &mut DependencyGraph,
    candidates: Candidates,
) -> ChangeSet {
    builder.resolver().clear_manifest_cache();
    let full = candidates == Candidates::All;
    let mut pass = Pass {
        builder,
        graph,
        full,
        queue: VecDeque::new(),
        queued: HashSet::new(),
        classified: HashMap::new(),
        new_entries: HashSet::new(),
        own: HashMap::new(),
        dep_changes: Vec::new(),
        set: ChangeSet::default(),
    };

    pass.refresh_entries(&candidates);

    let entries: Vec<PathBuf> = pass.graph.entries().to_vec();
    let new_entries: Vec<PathBuf> = entries
        .iter()
        .filter(|e| pass.new_entries.contains(*e))
        .cloned()
        .collect();
    match &candidates {
        Candidates::All => {
            for entry in &entries {
                pass.enqueue(entry);
            }
        }
        Candidates::Paths(paths) => {
            for entry in &new_entries {
                pass.enqueue(entry);
            }
            for path in paths {
                if pass.graph.contains(path) {
                    pass.enqueue(path);
                }
            }
        }
    }

    let mut retried = HashSet::new();
    loop {
        pass.drain();
        if full {
            // Whatever the walk from the entries did not reach.
            let mut rest: Vec<PathBuf> = pass
                .graph
                .nodes()
                .map(|n| n.path.clone())
                .filter(|p| !pass.classified.contains_key(p))
                .collect();
            rest.sort();
            for path in &rest {
                pass.enqueue(path);
            }
            pass.drain();
        }
        if !pass.retry_unresolved(&mut retried) {
            break;
        }
    }

    let set = pass.finish();
    debug!(
        "{} change(s), {} file(s) changed, {} removed",
        set.changes.len(),
        set.file_states.len(),
        set.removed.len()
    );
    set
}
