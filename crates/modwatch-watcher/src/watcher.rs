//! Watcher session and the debounced watch loop

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use modwatch_core::paths::clean;
use modwatch_core::{
    DependencyGraph, EntryChange, EntryInfo, FileState, load_snapshot, save_snapshot,
};
use modwatch_indexer::{
    Candidates, ChangeSet, ConfigError, GraphBuilder, ProjectConfig, SetupOptions,
    compute_changes, discover_entries, glob_dirs, glob_matches_in,
};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};

use crate::WatchError;
use crate::source::{
    NotificationReceiver, NotificationSource, NotifySource, RawNotification, notification_channel,
};

/// One debounced batch delivered to the watch callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchBatch {
    pub changes: Vec<EntryChange>,
    /// The file that triggered this batch.
    pub affected_file: PathBuf,
    pub event: FileState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_entries: Option<Vec<EntryInfo>>,
}

struct SessionState {
    builder: GraphBuilder,
    graph: DependencyGraph,
}

type SharedState = Arc<Mutex<SessionState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, SessionState> {
    // A panic mid-pass leaves the last consistent graph behind.
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn persist(config: &ProjectConfig, graph: &DependencyGraph) {
    match save_snapshot(graph, &config.cache_dir, &config.project, &config.root) {
        Ok(path) => debug!("Saved snapshot to {}", path.display()),
        Err(e) => warn!("Cannot save snapshot for {}: {}", config.project, e),
    }
}

fn entry_info(graph: &DependencyGraph, entry: &Path) -> EntryInfo {
    let deps = graph
        .reachable_from(entry)
        .into_iter()
        .filter(|dep| graph.node(dep).is_some_and(|n| !n.is_tombstone()))
        .collect();
    EntryInfo {
        path: entry.to_path_buf(),
        deps,
    }
}

fn dirs_to_watch(config: &ProjectConfig, graph: &DependencyGraph) -> BTreeSet<PathBuf> {
    let mut dirs = graph.parent_dirs();
    dirs.insert(config.root.clone());
    dirs.extend(glob_dirs(config));
    dirs
}

fn log_pass(config: &ProjectConfig, set: &ChangeSet) {
    for failure in &set.failures {
        warn!("Skipped {}: {}", failure.path.display(), failure.message);
    }
    if config.debug {
        info!(
            "{}: {} change(s) across {} entries, {} file(s) changed, {} dropped",
            config.project,
            set.changes.len(),
            set.affected_entries().len(),
            set.file_states.len(),
            set.removed.len()
        );
    }
}

struct WatchSession {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// A watcher session over one project: owns the dependency graph, the
/// snapshot handle and, while watching, the watch loop.
pub struct ModulesWatcher {
    config: Arc<ProjectConfig>,
    state: SharedState,
    session: Option<WatchSession>,
}

impl ModulesWatcher {
    /// Validate `options`, then load the project's snapshot or scan it from
    /// its entries when there is no usable snapshot.
    pub fn setup(options: SetupOptions) -> Result<Self, ConfigError> {
        let config = Arc::new(ProjectConfig::from_options(options)?);
        let builder = GraphBuilder::new(Arc::clone(&config));
        let discovered = discover_entries(&config);

        let graph = match load_snapshot(&config.cache_dir, &config.project, &config.root) {
            Some(mut graph) => {
                let stale: Vec<PathBuf> = graph
                    .entries()
                    .iter()
                    .filter(|e| !config.is_entry_path(e))
                    .cloned()
                    .collect();
                for entry in &stale {
                    graph.remove_entry(entry);
                }
                for entry in discovered {
                    if graph.add_entry(&entry, config.kinds_for(&entry)) {
                        builder.build_from(&mut graph, vec![entry]);
                    }
                }
                graph.collect_orphans();
                debug!(
                    "Loaded snapshot: {} files, {} entries",
                    graph.node_count(),
                    graph.entries().len()
                );
                graph
            }
            None => builder.rebuild_all(&discovered),
        };

        info!(
            "Set up {} at {} ({} entries, {} files)",
            config.project,
            config.root.display(),
            graph.entries().len(),
            graph.node_count()
        );
        Ok(Self {
            config,
            state: Arc::new(Mutex::new(SessionState { builder, graph })),
            session: None,
        })
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    /// Directory holding this project's snapshot.
    pub fn cache_dir(&self) -> &Path {
        &self.config.cache_dir
    }

    /// Every entry with its transitive dependencies.
    pub fn get_entries(&self) -> Vec<EntryInfo> {
        let state = lock(&self.state);
        state
            .graph
            .entries()
            .iter()
            .map(|entry| entry_info(&state.graph, entry))
            .collect()
    }

    /// Check every tracked file and every entry pattern against the last
    /// reported state. The snapshot is saved afterwards.
    pub fn make_changes(&self) -> Vec<EntryChange> {
        let mut guard = lock(&self.state);
        let SessionState { builder, graph } = &mut *guard;
        let set = compute_changes(builder, graph, Candidates::All);
        log_pass(&self.config, &set);
        persist(&self.config, graph);
        set.changes
    }

    /// The project root, the parent directory of every tracked file, and
    /// every directory that can hold entry-pattern matches.
    pub fn get_dirs_to_watch(&self) -> BTreeSet<PathBuf> {
        let state = lock(&self.state);
        dirs_to_watch(&self.config, &state.graph)
    }

    pub fn is_watching(&self) -> bool {
        self.session.is_some()
    }

    /// Start live monitoring with native filesystem notifications.
    ///
    /// `callback` receives one call per debounced batch. With
    /// `retrieve_entries`, batches carry the affected entries and their
    /// updated dependencies.
    pub fn watch<F>(&mut self, retrieve_entries: bool, callback: F) -> Result<(), WatchError>
    where
        F: FnMut(Result<WatchBatch, WatchError>) + Send + 'static,
    {
        if self.session.is_some() {
            return Err(WatchError::AlreadyWatching);
        }
        let (tx, rx) = notification_channel();
        let source = NotifySource::new(tx)?;
        self.watch_with(source, rx, retrieve_entries, callback)
    }

    /// Start live monitoring fed by `source`, whose notifications arrive on `rx`.
    pub fn watch_with<S, F>(
        &mut self,
        mut source: S,
        rx: NotificationReceiver,
        retrieve_entries: bool,
        callback: F,
    ) -> Result<(), WatchError>
    where
        S: NotificationSource,
        F: FnMut(Result<WatchBatch, WatchError>) + Send + 'static,
    {
        if self.session.is_some() {
            return Err(WatchError::AlreadyWatching);
        }
        let handle = Handle::try_current().map_err(|_| WatchError::NoRuntime)?;
        let dirs = self.get_dirs_to_watch();
        source.sync_dirs(&dirs)?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let coordinator = Coordinator {
            config: Arc::clone(&self.config),
            state: Arc::clone(&self.state),
            source,
            rx,
            shutdown: shutdown_rx,
            retrieve_entries,
            callback,
            debounce: self.config.debounce,
            failure_reported: false,
        };
        let task = handle.spawn(coordinator.run());
        info!("Watching {} ({} directories)", self.config.project, dirs.len());
        self.session = Some(WatchSession { shutdown, task });
        Ok(())
    }

    /// Stop live monitoring. Once this returns no callback runs again, and
    /// a batch still in its debounce window is discarded. A no-op when not
    /// watching.
    pub async fn stop_watching(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let _ = session.shutdown.send(true);
        if let Err(e) = session.task.await {
            error!("Watch loop ended abnormally: {}", e);
        }
        info!("Stopped watching {}", self.config.project);
    }
}

impl Drop for ModulesWatcher {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = session.shutdown.send(true);
        }
    }
}

#[derive(Default)]
struct Pending {
    paths: Vec<PathBuf>,
    seen: HashSet<PathBuf>,
    failure: Option<String>,
}

impl Pending {
    fn push(&mut self, path: PathBuf) {
        if self.seen.insert(path.clone()) {
            self.paths.push(path);
        }
    }

    fn is_empty(&self) -> bool {
        self.paths.is_empty() && self.failure.is_none()
    }
}

enum Wake {
    Stop,
    Message(RawNotification),
    Elapsed,
    Closed,
}

/// Single-consumer loop between the notification source and the callback.
struct Coordinator<S, F> {
    config: Arc<ProjectConfig>,
    state: SharedState,
    source: S,
    rx: NotificationReceiver,
    shutdown: watch::Receiver<bool>,
    retrieve_entries: bool,
    callback: F,
    debounce: Duration,
    failure_reported: bool,
}

impl<S, F> Coordinator<S, F>
where
    S: NotificationSource,
    F: FnMut(Result<WatchBatch, WatchError>) + Send + 'static,
{
    fn stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn next_wake(&mut self, deadline: Option<Instant>) -> Wake {
        let window = async {
            match deadline {
                Some(at) => sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.shutdown.changed() => Wake::Stop,
            msg = self.rx.recv() => match msg {
                Some(msg) => Wake::Message(msg),
                None => Wake::Closed,
            },
            _ = window => Wake::Elapsed,
        }
    }

    async fn run(mut self) {
        'session: loop {
            if self.stopped() {
                break;
            }
            let mut pending = Pending::default();
            match self.next_wake(None).await {
                Wake::Message(msg) => self.accept(msg, &mut pending),
                Wake::Stop | Wake::Closed => break,
                Wake::Elapsed => continue,
            }
            if pending.is_empty() {
                continue;
            }

            let deadline = Instant::now() + self.debounce;
            loop {
                match self.next_wake(Some(deadline)).await {
                    Wake::Message(msg) => self.accept(msg, &mut pending),
                    Wake::Elapsed => break,
                    Wake::Closed => break,
                    Wake::Stop => break 'session,
                }
            }
            if self.stopped() {
                break;
            }

            if let Some(message) = pending.failure.take() {
                if !self.failure_reported {
                    self.failure_reported = true;
                    (self.callback)(Err(WatchError::Primitive(message)));
                } else {
                    debug!("Repeated watch failure: {}", message);
                }
            }
            if pending.paths.is_empty() {
                continue;
            }

            let Some((batch, dirs)) = evaluate(
                Arc::clone(&self.state),
                Arc::clone(&self.config),
                self.retrieve_entries,
                pending.paths,
            )
            .await
            else {
                continue;
            };
            if self.stopped() {
                break;
            }
            if let Some(batch) = batch {
                (self.callback)(Ok(batch));
            }
            if let Err(e) = self.source.sync_dirs(&dirs) {
                warn!("Cannot update watched directories: {}", e);
            }
        }
        self.source.close();
        debug!("Watch loop for {} ended", self.config.project);
    }

    /// Buffer a raw notification. Paths are mapped to candidates when the
    /// window closes.
    fn accept(&self, msg: RawNotification, pending: &mut Pending) {
        match msg {
            RawNotification::Failed(message) => {
                warn!("Watch failure: {}", message);
                pending.failure.get_or_insert(message);
            }
            RawNotification::Changed(path) => {
                let path = clean(&path);
                if !self.config.is_internal(&path) {
                    pending.push(path);
                }
            }
        }
    }
}

/// Map notified paths to candidate files. Untracked paths are dropped
/// unless they match an entry pattern, are directories holding tracked
/// files or entry matches, or an unresolved import might now point at them.
fn candidates_for(
    config: &ProjectConfig,
    graph: &DependencyGraph,
    notified: &[PathBuf],
) -> Vec<PathBuf> {
    let waiting = !graph.with_unresolved().is_empty();
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for path in notified {
        let mut hits = Vec::new();
        if graph.contains(path) || config.is_entry_path(path) {
            hits.push(path.clone());
        } else {
            hits.extend(graph.files_under(path));
            if path.is_dir() {
                hits.extend(glob_matches_in(config, path));
            }
            if hits.is_empty() && waiting {
                hits.push(path.clone());
            }
        }
        if hits.is_empty() {
            debug!("Ignoring untracked {}", path.display());
        }
        for hit in hits {
            if seen.insert(hit.clone()) {
                out.push(hit);
            }
        }
    }
    out
}

/// Run one pass over the notified paths on the blocking pool. Returns the
/// batch to deliver, if any, and the directories to watch next.
async fn evaluate(
    state: SharedState,
    config: Arc<ProjectConfig>,
    retrieve_entries: bool,
    notified: Vec<PathBuf>,
) -> Option<(Option<WatchBatch>, BTreeSet<PathBuf>)> {
    let joined = tokio::task::spawn_blocking(move || {
        let mut guard = lock(&state);
        let SessionState { builder, graph } = &mut *guard;
        let paths = candidates_for(&config, graph, &notified);
        if paths.is_empty() {
            return (ChangeSet::default(), None, paths, dirs_to_watch(&config, graph));
        }
        let set = compute_changes(builder, graph, Candidates::Paths(paths.clone()));
        log_pass(&config, &set);
        persist(&config, graph);
        let affected = retrieve_entries.then(|| {
            set.affected_entries()
                .iter()
                .map(|entry| entry_info(graph, entry))
                .collect()
        });
        (set, affected, paths, dirs_to_watch(&config, graph))
    })
    .await;

    let (set, affected_entries, paths, dirs) = match joined {
        Ok(result) => result,
        Err(e) => {
            error!("Change evaluation failed: {}", e);
            return None;
        }
    };
    if set.is_empty() {
        return Some((None, dirs));
    }
    let trigger = set
        .file_states
        .iter()
        .find(|(path, _)| paths.contains(path))
        .or_else(|| set.file_states.first())
        .cloned()
        .or_else(|| paths.first().map(|path| (path.clone(), FileState::Modified)));
    let batch = trigger.map(|(affected_file, event)| WatchBatch {
        changes: set.changes,
        affected_file,
        event,
        affected_entries,
    });
    Some((batch, dirs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use modwatch_core::ChangeType;
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use crate::source::{ManualSource, NotificationSender};

    fn write(root: &Path, rel: &str, content: &str) -> PathBuf {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    fn create_test_project() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "to-watch1.js", "import { FILE_1 } from './file1';\n");
        write(root, "to-watch2.js", "console.log('no imports');\n");
        write(root, "file1.js", "export const FILE_1 = 1;\n");
        write(root, "file2.js", "export const FILE_2 = 2;\n");
        dir
    }

    fn options(root: &Path) -> SetupOptions {
        let mut options = SetupOptions::new("test", root);
        options.glob_entries = vec!["**/to-watch*.js".to_string()];
        options.debounce_ms = 50;
        options
    }

    type Batches = mpsc::UnboundedReceiver<Result<WatchBatch, WatchError>>;

    fn start(
        watcher: &mut ModulesWatcher,
        retrieve_entries: bool,
    ) -> (ManualSource, NotificationSender, Batches) {
        let source = ManualSource::new();
        let (tx, rx) = notification_channel();
        let (batch_tx, batch_rx) = mpsc::unbounded_channel();
        watcher
            .watch_with(source.clone(), rx, retrieve_entries, move |batch| {
                let _ = batch_tx.send(batch);
            })
            .unwrap();
        (source, tx, batch_rx)
    }

    async fn next_batch(batches: &mut Batches) -> Result<WatchBatch, WatchError> {
        timeout(Duration::from_secs(10), batches.recv())
            .await
            .expect("no batch delivered")
            .expect("callback dropped")
    }

    #[test]
    fn test_batch_json_shape() {
        let batch = WatchBatch {
            changes: vec![EntryChange::own(ChangeType::Modified, "/p/e.js")],
            affected_file: PathBuf::from("/p/e.js"),
            event: FileState::Modified,
            affected_entries: Some(vec![EntryInfo {
                path: PathBuf::from("/p/e.js"),
                deps: vec![PathBuf::from("/p/a.js")],
            }]),
        };
        assert_eq!(
            serde_json::to_value(&batch).unwrap(),
            serde_json::json!({
                "changes": [{"changeType": "modified", "entry": "/p/e.js"}],
                "affectedFile": "/p/e.js",
                "event": "modified",
                "affectedEntries": [{"path": "/p/e.js", "deps": ["/p/a.js"]}]
            })
        );
    }

    #[test]
    fn test_setup_rejects_relative_root() {
        let result = ModulesWatcher::setup(SetupOptions::new("test", "relative/root"));
        assert!(matches!(result, Err(ConfigError::ProjectRootNotDirectory(_))));
    }

    #[test]
    fn test_make_changes_then_no_op() {
        let dir = create_test_project();
        let watcher = ModulesWatcher::setup(options(dir.path())).unwrap();

        let changes = watcher.make_changes();
        let types: Vec<ChangeType> = changes.iter().map(|c| c.change_type).collect();
        assert_eq!(
            types,
            vec![ChangeType::Added, ChangeType::DepAdded, ChangeType::Added]
        );
        assert!(watcher.make_changes().is_empty());
    }

    #[test]
    fn test_snapshot_carries_state_across_sessions() {
        let dir = create_test_project();
        let root = dir.path();
        let first = ModulesWatcher::setup(options(root)).unwrap();
        assert_eq!(first.make_changes().len(), 3);
        assert!(first.cache_dir().join("test.snapshot").is_file());
        drop(first);

        let second = ModulesWatcher::setup(options(root)).unwrap();
        assert!(second.make_changes().is_empty());

        write(root, "file1.js", "export const FILE_1 = 2;\n");
        let third = ModulesWatcher::setup(options(root)).unwrap();
        let changes = third.make_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::DepModified);
    }

    #[test]
    fn test_get_entries_and_dirs() {
        let dir = create_test_project();
        let root = dir.path();
        write(root, "lib/to-watch3.js", "require('ts-node');\n");
        write(root, "node_modules/ts-node/package.json", r#"{"main": "dist/index.js"}"#);
        let resolved = write(root, "node_modules/ts-node/dist/index.js", "");
        let watcher = ModulesWatcher::setup(options(root)).unwrap();

        let entries = watcher.get_entries();
        assert_eq!(
            entries,
            vec![
                EntryInfo {
                    path: root.join("lib/to-watch3.js"),
                    deps: vec![resolved.clone()],
                },
                EntryInfo {
                    path: root.join("to-watch1.js"),
                    deps: vec![root.join("file1.js")],
                },
                EntryInfo {
                    path: root.join("to-watch2.js"),
                    deps: vec![],
                },
            ]
        );

        let dirs = watcher.get_dirs_to_watch();
        assert!(dirs.contains(root));
        assert!(dirs.contains(&root.join("lib")));
        assert!(dirs.contains(&root.join("node_modules/ts-node/dist")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_watch_coalesces_notifications() {
        let dir = create_test_project();
        let root = dir.path();
        let mut watcher = ModulesWatcher::setup(options(root)).unwrap();
        watcher.make_changes();
        let (source, tx, mut batches) = start(&mut watcher, true);
        assert!(source.watched_dirs().contains(root));

        let file1 = write(root, "file1.js", "export const FILE_1 = 3;\n");
        let entry = write(root, "to-watch2.js", "console.log('changed');\n");
        tx.send(RawNotification::Changed(file1.clone())).unwrap();
        tx.send(RawNotification::Changed(file1.clone())).unwrap();
        tx.send(RawNotification::Changed(root.join("file2.js"))).unwrap();
        tx.send(RawNotification::Changed(entry.clone())).unwrap();

        let batch = next_batch(&mut batches).await.unwrap();
        let types: Vec<ChangeType> = batch.changes.iter().map(|c| c.change_type).collect();
        assert_eq!(types, vec![ChangeType::DepModified, ChangeType::Modified]);
        assert_eq!(batch.affected_file, file1);
        assert_eq!(batch.event, FileState::Modified);
        let affected = batch.affected_entries.unwrap();
        assert_eq!(affected.len(), 2);
        assert_eq!(affected[0].deps, vec![file1]);

        watcher.stop_watching().await;
        assert!(batches.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_watch_new_entry_and_directory_events() {
        let dir = create_test_project();
        let root = dir.path();
        let mut watcher = ModulesWatcher::setup(options(root)).unwrap();
        watcher.make_changes();
        let (_source, tx, mut batches) = start(&mut watcher, false);

        let created = write(root, "to-watch3.js", "import './file2';\n");
        tx.send(RawNotification::Changed(created.clone())).unwrap();
        let batch = next_batch(&mut batches).await.unwrap();
        assert_eq!(batch.event, FileState::Created);
        assert_eq!(batch.changes.len(), 2);
        assert_eq!(batch.changes[0].change_type, ChangeType::Added);
        assert_eq!(batch.changes[1].change_type, ChangeType::DepAdded);
        assert!(batch.affected_entries.is_none());

        // A directory event stands for every tracked file inside it.
        write(root, "file2.js", "export const FILE_2 = 'x';\n");
        tx.send(RawNotification::Changed(root.to_path_buf())).unwrap();
        let batch = next_batch(&mut batches).await.unwrap();
        assert_eq!(batch.changes.len(), 1);
        assert_eq!(batch.changes[0].change_type, ChangeType::DepModified);
        assert_eq!(batch.changes[0].entry, created);

        watcher.stop_watching().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_watch_before_first_check_saves_loadable_snapshot() {
        let dir = create_test_project();
        let root = dir.path();
        let mut watcher = ModulesWatcher::setup(options(root)).unwrap();
        let (_source, tx, mut batches) = start(&mut watcher, false);

        let entry = write(root, "to-watch2.js", "console.log('first');\n");
        tx.send(RawNotification::Changed(entry.clone())).unwrap();
        let batch = next_batch(&mut batches).await.unwrap();
        assert_eq!(batch.changes, vec![EntryChange::own(ChangeType::Added, &entry)]);
        watcher.stop_watching().await;

        let graph = load_snapshot(watcher.cache_dir(), "test", root).unwrap();
        assert!(graph.contains(&root.join("to-watch1.js")));
        drop(watcher);

        // Only what was never reported comes up in the next session.
        let next = ModulesWatcher::setup(options(root)).unwrap();
        let changes = next.make_changes();
        let types: Vec<ChangeType> = changes.iter().map(|c| c.change_type).collect();
        assert_eq!(types, vec![ChangeType::Added, ChangeType::DepAdded]);
        assert_eq!(changes[0].entry, root.join("to-watch1.js"));
        assert!(next.make_changes().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_snapshot_reloads_after_watch_batch() {
        let dir = create_test_project();
        let root = dir.path();
        let mut watcher = ModulesWatcher::setup(options(root)).unwrap();
        watcher.make_changes();
        let (_source, tx, mut batches) = start(&mut watcher, false);

        let file1 = write(root, "file1.js", "export const FILE_1 = 'batch';\n");
        tx.send(RawNotification::Changed(file1)).unwrap();
        let batch = next_batch(&mut batches).await.unwrap();
        assert_eq!(batch.changes.len(), 1);
        watcher.stop_watching().await;
        drop(watcher);

        let next = ModulesWatcher::setup(options(root)).unwrap();
        assert!(next.make_changes().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_watch_entry_in_new_directory() {
        let dir = create_test_project();
        let root = dir.path();
        let mut watcher = ModulesWatcher::setup(options(root)).unwrap();
        watcher.make_changes();
        let (source, tx, mut batches) = start(&mut watcher, false);
        assert!(!source.watched_dirs().contains(&root.join("sub")));

        let created = write(root, "sub/to-watch3.js", "import '../file2';\n");
        tx.send(RawNotification::Changed(root.join("sub"))).unwrap();
        let batch = next_batch(&mut batches).await.unwrap();
        assert_eq!(batch.affected_file, created);
        assert_eq!(batch.event, FileState::Created);
        let types: Vec<ChangeType> = batch.changes.iter().map(|c| c.change_type).collect();
        assert_eq!(types, vec![ChangeType::Added, ChangeType::DepAdded]);
        assert!(source.watched_dirs().contains(&root.join("sub")));

        watcher.stop_watching().await;
    }

    #[test]
    fn test_dirs_include_entry_pattern_dirs() {
        let dir = create_test_project();
        let root = dir.path();
        fs::create_dir_all(root.join("pages/empty")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        let watcher = ModulesWatcher::setup(options(root)).unwrap();

        let dirs = watcher.get_dirs_to_watch();
        assert!(dirs.contains(&root.join("pages/empty")));
        assert!(!dirs.contains(&root.join("node_modules/pkg")));

        let mut explicit = SetupOptions::new("test", root);
        explicit.entries = vec![root.join("to-watch1.js")];
        let watcher = ModulesWatcher::setup(explicit).unwrap();
        assert!(!watcher.get_dirs_to_watch().contains(&root.join("pages")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_watch_failure_reported_once() {
        let dir = create_test_project();
        let mut watcher = ModulesWatcher::setup(options(dir.path())).unwrap();
        let (_source, tx, mut batches) = start(&mut watcher, false);

        tx.send(RawNotification::Failed("boom".to_string())).unwrap();
        let first = next_batch(&mut batches).await;
        assert!(matches!(first, Err(WatchError::Primitive(ref m)) if m == "boom"));

        tx.send(RawNotification::Failed("again".to_string())).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(batches.try_recv().is_err());
        assert!(watcher.is_watching());

        watcher.stop_watching().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stop_discards_pending_window() {
        let dir = create_test_project();
        let root = dir.path();
        let mut options = options(root);
        options.debounce_ms = 500;
        let mut watcher = ModulesWatcher::setup(options).unwrap();
        watcher.make_changes();
        let (source, tx, mut batches) = start(&mut watcher, false);

        let file1 = write(root, "file1.js", "export const FILE_1 = 4;\n");
        tx.send(RawNotification::Changed(file1)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        watcher.stop_watching().await;
        assert!(source.is_closed());
        assert!(!watcher.is_watching());
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(batches.try_recv().is_err());

        // Idempotent
        watcher.stop_watching().await;

        // The change is still reported by the next check.
        let changes = watcher.make_changes();
        assert_eq!(changes.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_watch_twice_is_rejected() {
        let dir = create_test_project();
        let mut watcher = ModulesWatcher::setup(options(dir.path())).unwrap();
        let _running = start(&mut watcher, false);
        let (_tx, rx) = notification_channel();
        let again = watcher.watch_with(ManualSource::new(), rx, false, |_| {});
        assert!(matches!(again, Err(WatchError::AlreadyWatching)));
        watcher.stop_watching().await;
    }

    #[test]
    fn test_watch_requires_runtime() {
        let dir = create_test_project();
        let mut watcher = ModulesWatcher::setup(options(dir.path())).unwrap();
        let (_tx, rx) = notification_channel();
        let result = watcher.watch_with(ManualSource::new(), rx, false, |_| {});
        assert!(matches!(result, Err(WatchError::NoRuntime)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_watch_with_native_notifications() {
        let dir = create_test_project();
        let root = dir.path().canonicalize().unwrap();
        let mut watcher = ModulesWatcher::setup(options(&root)).unwrap();
        watcher.make_changes();
        let (batch_tx, mut batches) = mpsc::unbounded_channel();
        watcher
            .watch(false, move |batch| {
                let _ = batch_tx.send(batch);
            })
            .unwrap();

        write(&root, "file1.js", "export const FILE_1 = 'native';\n");
        let batch = next_batch(&mut batches).await.unwrap();
        assert_eq!(batch.changes[0].change_type, ChangeType::DepModified);
        assert_eq!(batch.affected_file, root.join("file1.js"));

        watcher.stop_watching().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_native_entry_in_new_directory() {
        let dir = create_test_project();
        let root = dir.path().canonicalize().unwrap();
        let mut watcher = ModulesWatcher::setup(options(&root)).unwrap();
        watcher.make_changes();
        let (batch_tx, mut batches) = mpsc::unbounded_channel();
        watcher
            .watch(false, move |batch| {
                let _ = batch_tx.send(batch);
            })
            .unwrap();

        let created = write(&root, "sub/to-watch3.js", "console.log('new');\n");
        let batch = next_batch(&mut batches).await.unwrap();
        assert_eq!(
            batch.changes,
            vec![EntryChange::own(ChangeType::Added, &created)]
        );

        // The new directory is watched from now on.
        write(&root, "sub/to-watch3.js", "console.log('again');\n");
        let batch = next_batch(&mut batches).await.unwrap();
        assert_eq!(
            batch.changes,
            vec![EntryChange::own(ChangeType::Modified, &created)]
        );

        watcher.stop_watching().await;
    }
}
