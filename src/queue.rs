//! Single-slot queue file shared by the intake server and the router.
//!
//! The file holds one JSON array of requests. Writers replace it wholesale;
//! the reader takes everything and truncates it. Both sides hold an exclusive
//! advisory lock for the whole cycle.

use crate::request::MessageRequest;
use anyhow::{anyhow, Context, Result};
use fd_lock::RwLock;
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// File-backed mailbox of pending requests
#[derive(Debug, Clone)]
pub struct QueueStore {
    path: PathBuf,
}

impl QueueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the queue contents with `requests`
    pub async fn write_batch(&self, requests: Vec<MessageRequest>) -> Result<()> {
        let path = self.path.clone();
        let count = requests.len();

        tokio::task::spawn_blocking(move || -> Result<()> {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)
                .with_context(|| format!("opening {}", path.display()))?;
            let mut lock = RwLock::new(file);
            let mut guard = lock
                .write()
                .map_err(|e| anyhow!("lock failed: {e}"))?;

            guard.set_len(0)?;
            guard.seek(SeekFrom::Start(0))?;
            serde_json::to_writer(&mut *guard, &requests)?;
            guard.flush()?;
            guard.sync_all()?;
            Ok(())
        })
        .await??;

        tracing::info!(path = %self.path.display(), count, "queue written");
        Ok(())
    }

    /// Take every pending request and truncate the file.
    ///
    /// Items that do not match the request schema are logged and dropped.
    /// A file that is not a JSON array is left untouched and reported.
    pub async fn take_batch(&self) -> Result<Vec<MessageRequest>> {
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || -> Result<Vec<MessageRequest>> {
            if !path.exists() {
                tracing::warn!(path = %path.display(), "queue file does not exist");
                return Ok(vec![]);
            }

            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(&path)
                .with_context(|| format!("opening {}", path.display()))?;
            let mut lock = RwLock::new(file);
            let mut guard = lock
                .write()
                .map_err(|e| anyhow!("lock failed: {e}"))?;

            let mut raw = String::new();
            guard.read_to_string(&mut raw)?;
            if raw.trim().is_empty() {
                return Ok(vec![]);
            }

            let items: Vec<serde_json::Value> = match serde_json::from_str(&raw)? {
                serde_json::Value::Array(items) => items,
                _ => return Err(anyhow!("{} must contain a JSON array", path.display())),
            };

            let mut requests = Vec::with_capacity(items.len());
            for (index, item) in items.into_iter().enumerate() {
                match serde_json::from_value::<MessageRequest>(item) {
                    Ok(req) => requests.push(req),
                    Err(e) => tracing::warn!(index, error = %e, "skipping malformed queue item"),
                }
            }

            guard.set_len(0)?;
            guard.sync_all()?;
            Ok(requests)
        })
        .await?
    }
}
