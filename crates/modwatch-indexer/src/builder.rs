//! Builds and updates the dependency graph from file contents

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use modwatch_core::{
    DependencyGraph, EdgeDelta, Presence, Signature, UnresolvedImport, probe_file, signature_of,
};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::config::ProjectConfig;
use crate::extractor::ImportScan;
use crate::resolver::{Resolver, is_builtin};

/// Dependencies extracted from one version of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    pub signature: Signature,
    pub deps: Vec<PathBuf>,
    pub unresolved: Vec<UnresolvedImport>,
}

/// Result of applying a scan to the graph.
#[derive(Debug, Clone, Default)]
pub struct Rescan {
    pub delta: EdgeDelta,
    /// Dependencies that were not tracked before this scan.
    pub discovered: Vec<PathBuf>,
}

/// Extracts, resolves and records dependencies for a project.
#[derive(Debug)]
pub struct GraphBuilder {
    config: Arc<ProjectConfig>,
    resolver: Resolver,
}

impl GraphBuilder {
    pub fn new(config: Arc<ProjectConfig>) -> Self {
        let resolver = Resolver::new(&config);
        GraphBuilder { config, resolver }
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Extract and resolve the imports of `path` from `content`.
    pub fn scan_content(&self, path: &Path, content: &[u8]) -> ScanOutcome {
        let kinds = self.config.kinds_for(path);
        let mut deps = Vec::new();
        let mut unresolved = Vec::new();
        if !kinds.is_empty() {
            let text = String::from_utf8_lossy(content);
            for import in &ImportScan::new(&text, kinds) {
                let resolved = self.resolver.resolve(&import.specifier, import.syntax, path);
                if resolved.is_empty() {
                    if !is_builtin(&import.specifier) {
                        unresolved.push(UnresolvedImport {
                            specifier: import.specifier,
                            syntax: import.syntax,
                        });
                    }
                    continue;
                }
                deps.extend(resolved.into_iter().filter(|d| !self.config.is_internal(d)));
            }
        }
        ScanOutcome {
            signature: signature_of(content),
            deps,
            unresolved,
        }
    }

    /// Read `path` from disk and scan it. `Ok(None)` when it does not exist.
    pub fn scan_file(&self, path: &Path) -> io::Result<Option<ScanOutcome>> {
        Ok(probe_file(path)?.map(|(_, content)| self.scan_content(path, &content)))
    }

    /// Record a scan for a tracked file. Only this file's edges change.
    pub fn apply_scan(&self, graph: &mut DependencyGraph, path: &Path, outcome: ScanOutcome) -> Rescan {
        let mut discovered = Vec::new();
        for dep in &outcome.deps {
            if !graph.contains(dep) {
                graph.insert_node(dep, self.config.kinds_for(dep));
                discovered.push(dep.clone());
            }
        }
        graph.insert_node(path, self.config.kinds_for(path));
        let delta = graph.set_dependencies(path, &outcome.deps, outcome.unresolved);
        if let Some(node) = graph.node_mut(path) {
            node.kinds = self.config.kinds_for(path);
            node.scanned = Some(outcome.signature);
        }
        Rescan { delta, discovered }
    }

    /// Re-extract and re-resolve one file and return its structural delta.
    ///
    /// `Ok(None)` when the file is gone. A read failure leaves the graph
    /// untouched.
    pub fn rescan_file(&self, graph: &mut DependencyGraph, path: &Path) -> io::Result<Option<Rescan>> {
        let Some(outcome) = self.scan_file(path)? else {
            return Ok(None);
        };
        Ok(Some(self.apply_scan(graph, path, outcome)))
    }

    /// Detach a file from the graph. See [`DependencyGraph::remove_file`].
    pub fn remove_file(&self, graph: &mut DependencyGraph, path: &Path) -> bool {
        graph.remove_file(path)
    }

    /// Full scan of everything reachable from `entries`.
    ///
    /// Structure and scanned signatures are recorded; every node stays
    /// unseen so the first evaluation reports it.
    pub fn rebuild_all(&self, entries: &[PathBuf]) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for entry in entries {
            graph.add_entry(entry, self.config.kinds_for(entry));
        }
        self.build_from(&mut graph, entries.to_vec());
        debug!(
            "Rebuilt graph: {} files, {} edges",
            graph.node_count(),
            graph.edge_count()
        );
        graph
    }

    /// Scan `roots` and every unscanned file they lead to, one breadth-first
    /// level at a time. Each level is read and parsed in parallel and applied
    /// to the graph afterwards. Returns the files that were scanned.
    pub fn build_from(&self, graph: &mut DependencyGraph, roots: Vec<PathBuf>) -> Vec<PathBuf> {
        let mut visited: HashSet<PathBuf> = HashSet::new();
        let mut frontier: Vec<PathBuf> = roots
            .into_iter()
            .filter(|r| visited.insert(r.clone()))
            .collect();
        let mut scanned = Vec::new();

        while !frontier.is_empty() {
            let outcomes: Vec<(PathBuf, io::Result<Option<ScanOutcome>>)> = frontier
                .par_iter()
                .map(|path| (path.clone(), self.scan_file(path)))
                .collect();

            let mut next = Vec::new();
            for (path, outcome) in outcomes {
                match outcome {
                    Ok(Some(outcome)) => {
                        self.apply_scan(graph, &path, outcome);
                        scanned.push(path.clone());
                        for dep in graph.dependencies(&path) {
                            let unscanned = graph
                                .node(dep)
                                .is_some_and(|n| n.scanned.is_none() && n.presence != Presence::Missing);
                            if unscanned && visited.insert(dep.clone()) {
                                next.push(dep.clone());
                            }
                        }
                    }
                    Ok(None) => debug!("{} does not exist", path.display()),
                    Err(e) => warn!("Cannot read {}: {}", path.display(), e),
                }
            }
            frontier = next;
        }
        scanned
    }
}
