//! Modwatch core: dependency graph store, data model, and snapshot cache

pub mod cache;
pub mod error;
pub mod graph;
pub mod model;
pub mod paths;
pub mod signature;


#[cfg(test)]
pub mod test_utils;

pub use cache::{
    DEFAULT_CACHE_DIR, clear_cache, default_cache_dir, ensure_cache_dir, load_snapshot,
    save_snapshot, snapshot_path,
};
pub use error::CoreError;
pub use graph::{DependencyGraph, EdgeDelta};
pub use model::{
    ChangeCause, ChangeType, EntryChange, EntryInfo, FileNode, FileState, ImportSyntax,
    Presence, Signature, SyntaxKinds, UnresolvedImport,
};
pub use signature::{probe_file, signature_of};
