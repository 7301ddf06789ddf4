//! Snapshot cache for graph serialization

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::graph::DependencyGraph;
use crate::model::FileNode;

/// Default cache directory name, created under the project root.
pub const DEFAULT_CACHE_DIR: &str = "mw-cache";

/// Snapshot file extension
pub const SNAPSHOT_EXT: &str = "snapshot";

/// Bumped whenever the persisted layout changes.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    project: String,
    project_root: PathBuf,
    saved_at: String,
    entries: Vec<PathBuf>,
    nodes: Vec<FileNode>,
}

/// Get default cache directory path
pub fn default_cache_dir(project_root: &Path) -> PathBuf {
    project_root.join(DEFAULT_CACHE_DIR)
}

/// Snapshot file path for a project. The identifier is sanitized so any
/// string can name a project.
pub fn snapshot_path(cache_dir: &Path, project: &str) -> PathBuf {
    let mut name: String = project
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.is_empty() || name.chars().all(|c| c == '.') {
        name = "default".to_string();
    }
    cache_dir.join(format!("{name}.{SNAPSHOT_EXT}"))
}

/// Ensure cache directory exists
pub fn ensure_cache_dir(cache_dir: &Path) -> std::io::Result<()> {
    if !cache_dir.exists() {
        std::fs::create_dir_all(cache_dir)?;
    }
    Ok(())
}

/// Serialize the graph with bincode. The file is written next to its final
/// location and renamed into place.
pub fn save_snapshot(
    graph: &DependencyGraph,
    cache_dir: &Path,
    project: &str,
    project_root: &Path,
) -> Result<PathBuf> {
    ensure_cache_dir(cache_dir)?;
    let path = snapshot_path(cache_dir, project);
    let (nodes, entries) = graph.to_parts();
    let file = SnapshotFile {
        version: SNAPSHOT_VERSION,
        project: project.to_string(),
        project_root: project_root.to_path_buf(),
        saved_at: chrono::Utc::now().to_rfc3339(),
        entries,
        nodes,
    };
    let bytes = bincode::serialize(&file)?;

    let tmp = path.with_extension(format!("{SNAPSHOT_EXT}.tmp"));
    std::fs::write(&tmp, bytes)?;
    if let Err(e) = std::fs::rename(&tmp, &path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }

    tracing::debug!(
        "Snapshot saved: {} ({} nodes)",
        path.display(),
        graph.node_count()
    );
    Ok(path)
}

fn read_snapshot(path: &Path, project: &str, project_root: &Path) -> Result<DependencyGraph> {
    let bytes = std::fs::read(path)?;
    let file: SnapshotFile = bincode::deserialize(&bytes)?;
    if file.version != SNAPSHOT_VERSION {
        return Err(CoreError::InvalidSnapshot(format!(
            "version {} (expected {})",
            file.version, SNAPSHOT_VERSION
        )));
    }
    if file.project != project || file.project_root != project_root {
        return Err(CoreError::InvalidSnapshot(format!(
            "written for {} at {}",
            file.project,
            file.project_root.display()
        )));
    }
    tracing::debug!("Snapshot from {} loaded: {}", file.saved_at, path.display());
    DependencyGraph::from_parts(file.nodes, file.entries)
}

/// Load a graph from its snapshot.
///
/// Missing, unreadable or inconsistent snapshots all yield `None`; the caller
/// rebuilds from scratch.
pub fn load_snapshot(cache_dir: &Path, project: &str, project_root: &Path) -> Option<DependencyGraph> {
    let path = snapshot_path(cache_dir, project);
    if !path.exists() {
        return None;
    }
    match read_snapshot(&path, project, project_root) {
        Ok(graph) => Some(graph),
        Err(e) => {
            tracing::warn!("Discarding snapshot {}: {}", path.display(), e);
            None
        }
    }
}

/// Remove a project's snapshot. Returns true if one existed.
pub fn clear_cache(cache_dir: &Path, project: &str) -> std::io::Result<bool> {
    let path = snapshot_path(cache_dir, project);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
