//! Relay lifecycle: owns the router, the queue file and the watch state.

use crate::backend::{build_backend, DeliveryBackend};
use crate::config::{ChannelType, RelayConfig};
use crate::error::RelayError;
use crate::media::{Fetcher, HttpFetcher};
use crate::queue::QueueStore;
use crate::request::MessageRequest;
use crate::router::{BatchSummary, DeliveryReport, MessageRouter};
use crate::watcher::{QueueEvent, QueueWatcher};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info};

/// Whether queue-file changes are being relayed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchState {
    Stopped,
    Running,
}

/// Owns routing, the queue file and the file watch.
///
/// Every dispatch, whether a queue drain or a command, runs under one mutex
/// so batches never interleave.
pub struct RelayService {
    channel_type: ChannelType,
    router: MessageRouter,
    queue: QueueStore,
    debounce: Duration,
    /// Live watcher while running
    watcher: Mutex<Option<QueueWatcher>>,
    events_tx: mpsc::UnboundedSender<QueueEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<QueueEvent>>>,
    dispatch: Mutex<()>,
}

impl RelayService {
    pub fn new(
        channel_type: ChannelType,
        router: MessageRouter,
        queue: QueueStore,
        debounce: Duration,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            channel_type,
            router,
            queue,
            debounce,
            watcher: Mutex::new(None),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            dispatch: Mutex::new(()),
        })
    }

    /// Build the service for the configured backend
    pub fn from_config(config: &RelayConfig) -> Result<Arc<Self>> {
        let backend: Arc<dyn DeliveryBackend> = build_backend(config)?;
        let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(
            config.download.resolve_dir(),
            config.download.timeout(),
        )?);

        Ok(Self::new(
            config.channel()?,
            MessageRouter::new(backend, fetcher),
            QueueStore::new(config.queue.resolve_path()),
            config.watch.debounce(),
        ))
    }

    pub fn channel_type(&self) -> ChannelType {
        self.channel_type
    }

    pub fn queue(&self) -> &QueueStore {
        &self.queue
    }

    pub async fn watch_state(&self) -> WatchState {
        if self.watcher.lock().await.is_some() {
            WatchState::Running
        } else {
            WatchState::Stopped
        }
    }

    /// Start watching the queue file. Returns false if already running.
    pub async fn start_watch(&self) -> Result<bool> {
        let mut watcher = self.watcher.lock().await;
        if watcher.is_some() {
            info!("queue watch already running");
            return Ok(false);
        }
        *watcher = Some(QueueWatcher::start(
            self.queue.path(),
            self.debounce,
            self.events_tx.clone(),
        )?);
        Ok(true)
    }

    /// Stop watching the queue file. Returns false if it was not running.
    pub async fn stop_watch(&self) -> bool {
        match self.watcher.lock().await.take() {
            Some(_) => true,
            None => {
                info!("queue watch not running");
                false
            }
        }
    }

    /// Relay everything currently in the queue file
    pub async fn drain_queue(&self) -> Result<BatchSummary> {
        let _guard = self.dispatch.lock().await;

        let batch = self.queue.take_batch().await?;
        if batch.is_empty() {
            return Ok(BatchSummary::default());
        }

        info!(count = batch.len(), backend = self.router.backend_name(), "draining queue");
        let summary = self.router.route_batch(&batch).await;
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            "queue drained"
        );
        Ok(summary)
    }

    /// Route one request outside the queue, e.g. from a chat command
    pub async fn route(&self, request: &MessageRequest) -> Result<DeliveryReport, RelayError> {
        let _guard = self.dispatch.lock().await;
        self.router.route(request).await
    }

    /// Drain the queue on every change notification
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let mut events_rx = self
            .events_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow::anyhow!("relay service already running"))?;

        while let Some(QueueEvent::Changed) = events_rx.recv().await {
            if self.watch_state().await == WatchState::Stopped {
                continue;
            }
            if let Err(e) = self.drain_queue().await {
                error!(error = %e, "failed to drain queue");
            }
        }
        Ok(())
    }
}
