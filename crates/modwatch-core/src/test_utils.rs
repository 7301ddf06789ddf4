//! Test utilities for the graph store

use std::path::{Path, PathBuf};

use crate::graph::DependencyGraph;
use crate::model::{Presence, Signature, SyntaxKinds};

pub const SCRIPT: SyntaxKinds = SyntaxKinds {
    esm: true,
    dyn_esm: true,
    cjs: true,
    css: false,
};

pub fn p(path: &str) -> PathBuf {
    PathBuf::from(path)
}

/// Build a graph from `(file, deps)` pairs; the first `entries` files are entries.
/// Every file is marked present with a signature derived from its position.
pub fn graph_from(edges: &[(&str, &[&str])], entries: &[&str]) -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    for entry in entries {
        graph.add_entry(Path::new(entry), SCRIPT);
    }
    for (i, (file, deps)) in edges.iter().enumerate() {
        graph.insert_node(Path::new(file), SCRIPT);
        let deps: Vec<PathBuf> = deps.iter().map(|d| p(d)).collect();
        graph.set_dependencies(Path::new(file), &deps, Vec::new());
        graph.set_presence(Path::new(file), Presence::Present(Signature(i as u64 + 1)));
    }
    let all: Vec<PathBuf> = graph.nodes().map(|n| n.path.clone()).collect();
    for (i, path) in all.iter().enumerate() {
        if graph.node(path).map(|n| n.presence) == Some(Presence::Unseen) {
            graph.set_presence(path, Presence::Present(Signature(1000 + i as u64)));
        }
    }
    graph
}
