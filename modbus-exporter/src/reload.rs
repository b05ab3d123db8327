//! Serialized reloading of device profiles.
//!
//! SIGHUP and the HTTP reload route both funnel into a single
//! [`ReloadWorker`], so only one reload runs at a time and requests are
//! handled in arrival order.

use std::path::PathBuf;
use std::sync::Arc;

use modbus_exporter_core::SafeConfig;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info};

use crate::loader::{LoadError, load_profiles};
use crate::telemetry::ExporterMetrics;

const QUEUE_SIZE: usize = 16;

/// Reload errors as seen by a requester.
#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("failed to reload config: {0}")]
    Load(#[from] LoadError),
    #[error("reload worker is not running")]
    WorkerGone,
    #[error("reload task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug)]
struct ReloadRequest {
    reply: Option<oneshot::Sender<Result<(), ReloadError>>>,
}

/// Sender side of the reload queue.
#[derive(Clone, Debug)]
pub struct ReloadHandle {
    tx: mpsc::Sender<ReloadRequest>,
}

impl ReloadHandle {
    /// Request a reload and wait for its outcome.
    pub async fn reload(&self) -> Result<(), ReloadError> {
        let (reply, outcome) = oneshot::channel();
        self.tx
            .send(ReloadRequest { reply: Some(reply) })
            .await
            .map_err(|_| ReloadError::WorkerGone)?;

        outcome.await.map_err(|_| ReloadError::WorkerGone)??;
        Ok(())
    }

    /// Request a reload without waiting for it.
    pub fn trigger(&self) {
        if self.tx.try_send(ReloadRequest { reply: None }).is_err() {
            debug!("Reload queue full or closed, dropping request");
        }
    }
}

/// Single consumer of reload requests.
pub struct ReloadWorker {
    source: PathBuf,
    store: Arc<SafeConfig>,
    metrics: Arc<ExporterMetrics>,
    rx: mpsc::Receiver<ReloadRequest>,
}

/// Create a connected handle and worker.
pub fn reload_channel(
    source: impl Into<PathBuf>,
    store: Arc<SafeConfig>,
    metrics: Arc<ExporterMetrics>,
) -> (ReloadHandle, ReloadWorker) {
    let (tx, rx) = mpsc::channel(QUEUE_SIZE);
    let worker = ReloadWorker {
        source: source.into(),
        store,
        metrics,
        rx,
    };
    (ReloadHandle { tx }, worker)
}

impl ReloadWorker {
    /// Process requests until shutdown or until every handle is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                request = self.rx.recv() => {
                    let Some(request) = request else {
                        break;
                    };
                    let result = self.reload_once().await;
                    if let Some(reply) = request.reply {
                        let _ = reply.send(result);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Reload worker stopped");
    }

    /// Load the profile source and swap it in on success.
    ///
    /// The loader does blocking file I/O and runs on the blocking pool.
    pub async fn reload_once(&self) -> Result<(), ReloadError> {
        let source = self.source.clone();
        let loaded = tokio::task::spawn_blocking(move || load_profiles(source)).await;

        let loaded = match loaded {
            Ok(loaded) => loaded,
            Err(e) => {
                self.metrics.record_reload(false);
                error!(path = %self.source.display(), error = %e, "Reload task failed");
                return Err(e.into());
            }
        };

        match loaded {
            Ok(profiles) => {
                let count = profiles.len();
                self.store.replace(profiles);
                self.metrics.record_reload(true);
                info!(profiles = count, "Loaded config file");
                Ok(())
            }
            Err(e) => {
                self.metrics.record_reload(false);
                error!(path = %self.source.display(), error = %e, "Error reloading config");
                Err(e.into())
            }
        }
    }
}
