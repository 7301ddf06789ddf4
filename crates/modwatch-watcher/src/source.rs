//! Filesystem notification sources feeding the watch loop

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::WatchError;

/// A raw event from the notification source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawNotification {
    /// Something happened at this path (file or directory).
    Changed(PathBuf),
    /// The source itself failed.
    Failed(String),
}

pub type NotificationSender = mpsc::UnboundedSender<RawNotification>;
pub type NotificationReceiver = mpsc::UnboundedReceiver<RawNotification>;

pub fn notification_channel() -> (NotificationSender, NotificationReceiver) {
    mpsc::unbounded_channel()
}

/// Something that reports changes inside a set of directories.
pub trait NotificationSource: Send + 'static {
    /// Make the watched set equal to `dirs`.
    fn sync_dirs(&mut self, dirs: &BTreeSet<PathBuf>) -> Result<(), WatchError>;

    /// Detach from every directory. Calling it twice is a no-op.
    fn close(&mut self);
}

/// Native filesystem notifications through `notify`. Each directory is
/// watched non-recursively.
pub struct NotifySource {
    watcher: Option<RecommendedWatcher>,
    watched: BTreeSet<PathBuf>,
}

impl NotifySource {
    pub fn new(tx: NotificationSender) -> Result<Self, WatchError> {
        let watcher = notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
            match res {
                Ok(event) => Self::handle_notify_event(event, &tx),
                Err(e) => {
                    error!("File system watch error: {}", e);
                    let _ = tx.send(RawNotification::Failed(e.to_string()));
                }
            }
        })?;
        Ok(Self {
            watcher: Some(watcher),
            watched: BTreeSet::new(),
        })
    }

    fn handle_notify_event(event: notify::Event, tx: &NotificationSender) {
        match event.kind {
            notify::EventKind::Create(_)
            | notify::EventKind::Modify(_)
            | notify::EventKind::Remove(_) => {
                for path in event.paths {
                    if tx.send(RawNotification::Changed(path)).is_err() {
                        // Receiver gone, the session is stopping.
                        return;
                    }
                }
            }
            _ => {}
        }
    }

    pub fn watched_dirs(&self) -> &BTreeSet<PathBuf> {
        &self.watched
    }
}

impl NotificationSource for NotifySource {
    fn sync_dirs(&mut self, dirs: &BTreeSet<PathBuf>) -> Result<(), WatchError> {
        let Some(watcher) = self.watcher.as_mut() else {
            return Ok(());
        };
        let stale: Vec<PathBuf> = self.watched.difference(dirs).cloned().collect();
        for dir in stale {
            if let Err(e) = watcher.unwatch(&dir) {
                debug!("Cannot unwatch {}: {}", dir.display(), e);
            }
            self.watched.remove(&dir);
        }
        for dir in dirs.difference(&self.watched.clone()) {
            if !dir.is_dir() {
                // Parent of a tombstone; watched again once it reappears.
                debug!("Skipping missing directory {}", dir.display());
                continue;
            }
            watcher.watch(dir, RecursiveMode::NonRecursive)?;
            self.watched.insert(dir.clone());
        }
        debug!("Watching {} directories", self.watched.len());
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            for dir in std::mem::take(&mut self.watched) {
                if let Err(e) = watcher.unwatch(&dir) {
                    warn!("Cannot unwatch {}: {}", dir.display(), e);
                }
            }
        }
    }
}

/// A source driven by hand: notifications are sent on the channel directly
/// and the watched set is only recorded. Clones share their state.
#[derive(Debug, Clone, Default)]
pub struct ManualSource {
    dirs: Arc<Mutex<BTreeSet<PathBuf>>>,
    closed: Arc<AtomicBool>,
}

impl ManualSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watched_dirs(&self) -> BTreeSet<PathBuf> {
        self.dirs.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl NotificationSource for ManualSource {
    fn sync_dirs(&mut self, dirs: &BTreeSet<PathBuf>) -> Result<(), WatchError> {
        *self.dirs.lock().unwrap_or_else(PoisonError::into_inner) = dirs.clone();
        Ok(())
    }

    fn close(&mut self) {
        self.dirs.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.closed.store(true, Ordering::SeqCst);
    }
}
