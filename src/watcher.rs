//! Filesystem watcher for the queue file.
//!
//! Watches the queue file's directory (non-recursively) and emits one
//! [`QueueEvent::Changed`] per debounced burst of create/modify events on
//! the queue file itself.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use notify_debouncer_full::{
    new_debouncer,
    notify::{EventKind, RecommendedWatcher, RecursiveMode},
    DebounceEventResult, Debouncer, RecommendedCache,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Events emitted by the queue watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEvent {
    /// The queue file was written
    Changed,
}

/// Keeps a debounced watch on the queue file alive until dropped
pub struct QueueWatcher {
    _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    file: PathBuf,
}

impl QueueWatcher {
    /// Start watching `file`, sending notifications on `tx`
    pub fn start(
        file: &Path,
        debounce: Duration,
        tx: mpsc::UnboundedSender<QueueEvent>,
    ) -> Result<Self> {
        let file = absolute(file)?;
        let dir = file
            .parent()
            .map(Path::to_path_buf)
            .context("queue file has no parent directory")?;
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating queue directory {}", dir.display()))?;

        let file_name = file.file_name().map(|n| n.to_os_string());
        let mut debouncer = new_debouncer(debounce, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    let changed = events.iter().any(|event| {
                        matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
                            && event
                                .paths
                                .iter()
                                .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name)
                    });
                    if changed {
                        debug!("queue file changed");
                        let _ = tx.send(QueueEvent::Changed);
                    }
                }
                Err(errors) => {
                    for e in errors {
                        warn!(error = %e, "queue watcher error");
                    }
                }
            }
        })?;

        debouncer
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("watching {}", dir.display()))?;
        info!(file = %file.display(), "queue watcher started");

        Ok(Self {
            _debouncer: debouncer,
            file,
        })
    }

    pub fn file(&self) -> &Path {
        &self.file
    }
}

impl Drop for QueueWatcher {
    fn drop(&mut self) {
        info!(file = %self.file.display(), "queue watcher stopped");
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
