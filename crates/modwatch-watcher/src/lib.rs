//! Watcher sessions: one-shot change checks and debounced live monitoring

pub mod source;
pub mod watcher;

use modwatch_indexer::ConfigError;

pub use source::{
    ManualSource, NotificationReceiver, NotificationSender, NotificationSource, NotifySource,
    RawNotification, notification_channel,
};
pub use watcher::{ModulesWatcher, WatchBatch};

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("filesystem notification error: {0}")]
    Notify(#[from] notify::Error),

    /// The notification source failed while the session was running.
    #[error("watch primitive failure: {0}")]
    Primitive(String),

    #[error("this session is already watching")]
    AlreadyWatching,

    #[error("watching requires a running tokio runtime")]
    NoRuntime,
}
