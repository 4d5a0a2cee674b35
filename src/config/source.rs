//! Raw configuration sources.
//!
//! A source only supplies bytes and, optionally, a wake-up hint. Change
//! detection itself is content hashing in the watcher, so a source that never
//! signals still works through plain polling.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use tokio::sync::Notify;

use crate::config::loader::ConfigError;

pub trait ConfigSource: Send + Sync {
    /// Read the current raw configuration.
    fn load(&self) -> Result<Vec<u8>, ConfigError>;

    /// Notified when the source believes its content may have changed.
    fn change_hint(&self) -> Option<Arc<Notify>> {
        None
    }
}

/// Configuration file on disk.
pub struct FileSource {
    path: PathBuf,
    hint: Arc<Notify>,
    _watcher: Option<RecommendedWatcher>,
}

impl FileSource {
    /// Create a source for `path`.
    ///
    /// File system events wake the watcher early; if they cannot be set up
    /// the source degrades to interval polling.
    pub fn new(path: &Path) -> Self {
        let hint = Arc::new(Notify::new());
        let watcher = match Self::watch_events(path, hint.clone()) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::warn!(path = ?path, error = %e, "File events unavailable, falling back to polling");
                None
            }
        };

        Self {
            path: path.to_path_buf(),
            hint,
            _watcher: watcher,
        }
    }

    fn watch_events(path: &Path, hint: Arc<Notify>) -> Result<RecommendedWatcher, notify::Error> {
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if event.kind.is_modify() || event.kind.is_create() {
                    tracing::debug!("Config file change detected");
                    hint.notify_one();
                }
            }
            Err(e) => tracing::error!("Watch error: {:?}", e),
        })?;
        watcher.watch(path, RecursiveMode::NonRecursive)?;
        Ok(watcher)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for FileSource {
    fn load(&self) -> Result<Vec<u8>, ConfigError> {
        Ok(std::fs::read(&self.path)?)
    }

    fn change_hint(&self) -> Option<Arc<Notify>> {
        Some(self.hint.clone())
    }
}

/// In-memory configuration, replaceable at runtime.
#[derive(Default)]
pub struct StaticSource {
    bytes: RwLock<Vec<u8>>,
    hint: Arc<Notify>,
}

impl StaticSource {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: RwLock::new(bytes.into()),
            hint: Arc::new(Notify::new()),
        }
    }

    /// Replace the content and wake the watcher.
    pub fn set(&self, bytes: impl Into<Vec<u8>>) {
        *self.bytes.write() = bytes.into();
        self.hint.notify_one();
    }
}

impl ConfigSource for StaticSource {
    fn load(&self) -> Result<Vec<u8>, ConfigError> {
        Ok(self.bytes.read().clone())
    }

    fn change_hint(&self) -> Option<Arc<Notify>> {
        Some(self.hint.clone())
    }
}
