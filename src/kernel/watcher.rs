//! Declaration watcher: reloads the tree when the declaration file changes.
//!
//! Polls the file's modification time every `reload.watch_interval`. A parse
//! failure is logged and the current tree keeps serving.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{oneshot, watch};
use tokio::time::{interval, MissedTickBehavior};

use crate::kernel::{Kernel, ReloadReport};
use crate::types::{Error, Result};

#[derive(Debug)]
pub struct DeclarationWatcher {
    kernel: Arc<Kernel>,
    path: PathBuf,
    interval: Duration,
    stop_tx: Option<oneshot::Sender<()>>,
    reports: watch::Sender<Option<Arc<ReloadReport>>>,
}

impl DeclarationWatcher {
    pub fn new(kernel: Arc<Kernel>, path: impl Into<PathBuf>) -> Self {
        let interval = kernel.config().reload.watch_interval;
        let (reports, _) = watch::channel(None);
        Self {
            kernel,
            path: path.into(),
            interval,
            stop_tx: None,
            reports,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Latest report produced by a file-triggered reload.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<ReloadReport>>> {
        self.reports.subscribe()
    }

    /// Start polling in the background. The file's current modification time
    /// is taken as already loaded.
    pub fn start(&mut self) -> tokio::task::JoinHandle<()> {
        let kernel = self.kernel.clone();
        let path = self.path.clone();
        let reports = self.reports.clone();
        let period = self.interval.max(Duration::from_millis(10));
        let (stop_tx, mut stop_rx) = oneshot::channel();
        self.stop_tx = Some(stop_tx);
        let mut last_seen = modified_at(&path);

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(path = %path.display(), interval_ms = period.as_millis() as u64, "declaration_watcher_started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let current = match tokio::fs::metadata(&path).await.and_then(|m| m.modified()) {
                            Ok(t) => Some(t),
                            Err(e) => {
                                tracing::warn!(path = %path.display(), error = %e, "declaration_unreadable");
                                continue;
                            }
                        };
                        if current == last_seen {
                            continue;
                        }
                        last_seen = current;
                        match Self::reload(kernel.clone(), path.clone()).await {
                            Ok(report) => {
                                let _ = reports.send(Some(Arc::new(report)));
                            }
                            Err(e) => tracing::error!(path = %path.display(), error = %e, "declaration_reload_failed"),
                        }
                    }
                    _ = &mut stop_rx => {
                        tracing::info!("declaration_watcher_stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Stop the polling loop.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }

    async fn reload(kernel: Arc<Kernel>, path: PathBuf) -> Result<ReloadReport> {
        tokio::task::spawn_blocking(move || kernel.load_path(&path))
            .await
            .map_err(|e| Error::internal(format!("reload task failed: {}", e)))?
    }
}

impl Drop for DeclarationWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
