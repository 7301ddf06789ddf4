//! Test utilities for building fixture projects on disk

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use crate::builder::GraphBuilder;
use crate::config::{ProjectConfig, SetupOptions};

/// Write `content` to `root/rel`, creating parent directories.
pub fn write(root: &Path, rel: &str, content: &str) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

/// A project with two glob entries, one of which imports `file1.js`.
pub fn create_test_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write(root, "to-watch1.js", "import { FILE_1 } from './file1';\n");
    write(root, "to-watch2.js", "console.log('no imports');\n");
    write(root, "file1.js", "export const FILE_1 = 1;\n");
    write(root, "file2.js", "export const FILE_2 = 2;\n");
    dir
}

pub fn glob_options(root: &Path) -> SetupOptions {
    let mut options = SetupOptions::new("test", root);
    options.glob_entries = vec!["**/to-watch*.js".to_string()];
    options
}

pub fn builder_for(options: SetupOptions) -> GraphBuilder {
    GraphBuilder::new(Arc::new(ProjectConfig::from_options(options).unwrap()))
}
