//! Integration tests for modwatch
//!
//! These tests drive the watcher session and the CLI against fixture
//! projects on disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use modwatch_core::{ChangeType, EntryChange, FileState};
use modwatch_indexer::SetupOptions;
use modwatch_watcher::{ManualSource, ModulesWatcher, RawNotification, notification_channel};
use tempfile::TempDir;
use tokio::sync::mpsc;

fn write(root: &Path, rel: &str, content: &str) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

fn fixture() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write(root, "to-watch1.js", "import { FILE_1 } from './file1';\n");
    write(root, "to-watch2.js", "console.log('no imports');\n");
    write(root, "file1.js", "export const FILE_1 = 1;\n");
    write(root, "file2.js", "export const FILE_2 = 2;\n");
    dir
}

fn options(root: &Path) -> SetupOptions {
    let mut options = SetupOptions::new("integration", root);
    options.glob_entries = vec!["**/to-watch*.js".to_string()];
    options.debounce_ms = 50;
    options
}

fn names(changes: &[EntryChange]) -> Vec<(ChangeType, String)> {
    changes
        .iter()
        .map(|c| {
            let file = c.cause.as_ref().map(|cause| &cause.file).unwrap_or(&c.entry);
            let name = file.file_name().unwrap().to_string_lossy().into_owned();
            (c.change_type, name)
        })
        .collect()
}

fn modwatch(root: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_modwatch"))
        .arg("--root")
        .arg(root)
        .args(["--glob", "**/to-watch*.js"])
        .args(args)
        .output()
        .expect("Failed to execute modwatch")
}

#[test]
fn test_cli_invocation() {
    let output = Command::new(env!("CARGO_BIN_EXE_modwatch"))
        .arg("--help")
        .output()
        .expect("Failed to execute modwatch");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("modwatch"));
    assert!(stdout.contains("changes"));
}

#[test]
fn test_cli_changes_persist_between_runs() {
    let dir = fixture();
    let root = dir.path();

    let first = modwatch(root, &["changes"]);
    assert!(first.status.success());
    let changes: Vec<EntryChange> = serde_json::from_slice(&first.stdout).unwrap();
    assert_eq!(changes.len(), 3);

    let second = modwatch(root, &["changes"]);
    let changes: Vec<EntryChange> = serde_json::from_slice(&second.stdout).unwrap();
    assert!(changes.is_empty());

    assert!(modwatch(root, &["clear"]).status.success());
    let third = modwatch(root, &["changes"]);
    let changes: Vec<EntryChange> = serde_json::from_slice(&third.stdout).unwrap();
    assert_eq!(changes.len(), 3);
}

#[test]
fn test_cli_dirs_and_entries() {
    let dir = fixture();
    let root = dir.path();
    write(root, "lib/util.js", "");
    write(root, "to-watch2.js", "require('./lib/util');\n");

    let output = modwatch(root, &["dirs"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let dirs: Vec<&str> = stdout.lines().collect();
    assert!(dirs.contains(&root.to_str().unwrap()));
    assert!(dirs.contains(&root.join("lib").to_str().unwrap()));

    let output = modwatch(root, &["entries"]);
    let entries: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(entries.as_array().map(Vec::len), Some(2));
    assert_eq!(
        entries[1]["deps"][0].as_str(),
        root.join("lib/util.js").to_str()
    );
}

#[test]
fn test_cli_rejects_missing_root() {
    let output = modwatch(Path::new("/definitely/not/here"), &["changes"]);
    assert!(!output.status.success());
}

#[test]
fn test_session_scenarios() {
    let dir = fixture();
    let root = dir.path();
    let watcher = ModulesWatcher::setup(options(root)).unwrap();

    assert_eq!(
        names(&watcher.make_changes()),
        vec![
            (ChangeType::Added, "to-watch1.js".to_string()),
            (ChangeType::DepAdded, "file1.js".to_string()),
            (ChangeType::Added, "to-watch2.js".to_string()),
        ]
    );
    assert!(watcher.make_changes().is_empty());

    // Only dependency deleted
    fs::remove_file(root.join("file1.js")).unwrap();
    let changes = watcher.make_changes();
    assert_eq!(names(&changes), vec![(ChangeType::DepDeleted, "file1.js".to_string())]);
    assert_eq!(changes[0].cause.as_ref().unwrap().state, FileState::Deleted);

    // New import of an untracked sibling
    write(root, "to-watch2.js", "import './file2';\n");
    assert_eq!(
        names(&watcher.make_changes()),
        vec![
            (ChangeType::Modified, "to-watch2.js".to_string()),
            (ChangeType::DepAdded, "file2.js".to_string()),
        ]
    );

    // Entry deleted, then recreated with other content
    fs::remove_file(root.join("to-watch2.js")).unwrap();
    assert_eq!(
        names(&watcher.make_changes()),
        vec![(ChangeType::Deleted, "to-watch2.js".to_string())]
    );
    write(root, "to-watch2.js", "console.log('back');\n");
    assert_eq!(
        names(&watcher.make_changes()),
        vec![(ChangeType::Added, "to-watch2.js".to_string())]
    );
}

#[test]
fn test_cycle_in_entries_listing() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write(root, "to-watch1.js", "import './a';\n");
    write(root, "a.js", "import './b';\n");
    write(root, "b.js", "import './a';\n");
    let watcher = ModulesWatcher::setup(options(root)).unwrap();

    let entries = watcher.get_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].deps, vec![root.join("a.js"), root.join("b.js")]);
    assert_eq!(watcher.make_changes().len(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_make_changes_while_watching() {
    let dir = fixture();
    let root = dir.path();
    let mut watcher = ModulesWatcher::setup(options(root)).unwrap();
    watcher.make_changes();

    let (tx, rx) = notification_channel();
    let (batch_tx, mut batches) = mpsc::unbounded_channel();
    watcher
        .watch_with(ManualSource::new(), rx, true, move |batch| {
            let _ = batch_tx.send(batch);
        })
        .unwrap();

    // A synchronous check claims the change first; the watch pass then
    // finds nothing new and delivers nothing.
    let file1 = write(root, "file1.js", "export const FILE_1 = 'sync';\n");
    assert_eq!(watcher.make_changes().len(), 1);
    tx.send(RawNotification::Changed(file1.clone())).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(batches.try_recv().is_err());

    let file1 = write(root, "file1.js", "export const FILE_1 = 'watched';\n");
    tx.send(RawNotification::Changed(file1)).unwrap();
    let batch = tokio::time::timeout(Duration::from_secs(10), batches.recv())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(batch.changes.len(), 1);
    assert_eq!(
        batch.affected_entries.unwrap()[0].path,
        root.join("to-watch1.js")
    );

    watcher.stop_watching().await;
    watcher.stop_watching().await;
}
