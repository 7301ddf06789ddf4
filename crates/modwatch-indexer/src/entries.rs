//! Entry discovery: explicit entries plus files matching the entry globs

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use ignore::{DirEntry, WalkBuilder};
use modwatch_core::signature::is_file;
use tracing::{debug, warn};

use crate::config::ProjectConfig;

/// Entries that currently exist on disk. Explicit entries come first in the
/// order given, then glob matches sorted by path.
pub fn discover_entries(config: &ProjectConfig) -> Vec<PathBuf> {
    let mut entries: Vec<PathBuf> = config
        .entries
        .iter()
        .filter(|e| is_file(e))
        .cloned()
        .collect();

    let mut matched = glob_matches(config);
    matched.retain(|m| !entries.contains(m));
    entries.extend(matched);
    entries
}

/// Files under the project root matching an entry glob, sorted.
pub fn glob_matches(config: &ProjectConfig) -> Vec<PathBuf> {
    glob_matches_in(config, &config.root)
}

/// Files under `dir` matching an entry glob, sorted. Empty when `dir` is
/// outside the project root or in a skipped directory.
pub fn glob_matches_in(config: &ProjectConfig, dir: &Path) -> Vec<PathBuf> {
    if !config.has_globs() || is_skipped(config, dir) {
        return Vec::new();
    }
    let mut out: Vec<PathBuf> = walk(config, dir)
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
        .filter(|entry| config.matches_glob(entry.path()))
        .map(DirEntry::into_path)
        .collect();
    out.sort();
    out.dedup();
    debug!("{} files match entry globs under {}", out.len(), dir.display());
    out
}

/// Directories that may hold future glob matches: the root and every
/// directory below it that the entry walk visits. Empty without globs.
pub fn glob_dirs(config: &ProjectConfig) -> Vec<PathBuf> {
    if !config.has_globs() {
        return Vec::new();
    }
    let mut out: Vec<PathBuf> = walk(config, &config.root)
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_dir()))
        .map(DirEntry::into_path)
        .collect();
    out.sort();
    out
}

fn skipped_name(name: &OsStr) -> bool {
    name == "node_modules" || name.to_str().is_some_and(|n| n.starts_with('.'))
}

fn is_skipped(config: &ProjectConfig, dir: &Path) -> bool {
    let Ok(relative) = dir.strip_prefix(&config.root) else {
        return true;
    };
    dir.starts_with(&config.cache_dir)
        || relative
            .components()
            .any(|c| matches!(c, Component::Normal(name) if skipped_name(name)))
}

fn walk(config: &ProjectConfig, start: &Path) -> impl Iterator<Item = DirEntry> {
    let cache_dir = config.cache_dir.clone();
    WalkBuilder::new(start)
        .standard_filters(false)
        .follow_links(false)
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
            if !is_dir || entry.depth() == 0 {
                return true;
            }
            !(skipped_name(entry.file_name()) || entry.path() == cache_dir)
        })
        .build()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Error walking project root: {}", e);
                None
            }
        })
}
