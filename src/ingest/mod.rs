//! Ingestion loop: the single consumer of the watched directory.
//!
//! One file is processed fully before the next is looked at. The source file
//! is deleted only after its batch has committed, so an interrupted cycle can
//! always be resumed from the file that is still on disk. A file that can be
//! neither read nor deleted is quarantined in memory and skipped until restart,
//! so it never blocks the files behind it. The directory must not be consumed
//! by any other process at the same time.

mod cycle;
mod scan;

pub use cycle::{CycleOutcome, DiscardReason, IngestError, RowScoringFailure};
pub use scan::{scan, ScanResult};

use crate::config::AppConfig;
use crate::features::RecordEncoder;
use crate::model::Scorer;
use crate::storage::SqliteStore;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub watch_dir: PathBuf,
    pub delimiter: char,
    pub min_raw_columns: usize,
    pub poll_interval: Duration,
    pub error_backoff: Duration,
    pub scorer_timeout: Duration,
    pub store_timeout: Duration,
}

impl LoopSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            watch_dir: config.watch_dir.clone(),
            delimiter: config.ingest.delimiter,
            min_raw_columns: config.ingest.min_raw_columns,
            poll_interval: config.ingest.poll_interval(),
            error_backoff: config.ingest.error_backoff(),
            scorer_timeout: config.scorer.timeout(),
            store_timeout: config.store.timeout(),
        }
    }
}

struct Inner {
    settings: LoopSettings,
    encoder: RecordEncoder,
    scorer: Arc<dyn Scorer>,
    store: Arc<SqliteStore>,
    /// Files the loop gave up on but could not remove
    quarantined: Mutex<HashSet<PathBuf>>,
}

#[derive(Clone)]
pub struct IngestLoop {
    inner: Arc<Inner>,
}

impl IngestLoop {
    pub fn new(
        settings: LoopSettings,
        encoder: RecordEncoder,
        scorer: Arc<dyn Scorer>,
        store: Arc<SqliteStore>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                encoder,
                scorer,
                store,
                quarantined: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.inner.settings
    }

    /// Files skipped by every scan until the process restarts.
    pub fn quarantined(&self) -> Vec<PathBuf> {
        let mut out: Vec<PathBuf> = self.quarantine_set().iter().cloned().collect();
        out.sort();
        out
    }

    fn quarantine_set(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.inner
            .quarantined
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Poll until `shutdown` flips to true (or its sender goes away).
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            watch_dir = %self.inner.settings.watch_dir.display(),
            poll_ms = self.inner.settings.poll_interval.as_millis() as u64,
            "ingestion loop started"
        );
        let mut cycle: u64 = 0;
        while !*shutdown.borrow() {
            cycle += 1;
            let outcome = self.run_cycle().await;
            let pause = match &outcome {
                CycleOutcome::Idle => Some(self.inner.settings.poll_interval),
                CycleOutcome::Failed(e) => {
                    warn!(cycle, error = %e, "cycle failed; backing off");
                    Some(self.inner.settings.error_backoff)
                }
                o if o.needs_backoff() => Some(self.inner.settings.error_backoff),
                _ => None,
            };
            if let Some(d) = pause {
                if wait_or_shutdown(&mut shutdown, d).await {
                    break;
                }
            }
        }
        info!(cycles = cycle, "ingestion loop stopped");
    }

    /// Run the loop as a supervised task: a panic restarts it after the error
    /// backoff; a clean return (shutdown) ends supervision.
    pub async fn supervise(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let task = tokio::spawn(self.clone().run(shutdown.clone()));
            match task.await {
                Ok(()) => break,
                Err(e) if e.is_panic() => {
                    error!(error = %e, "ingestion loop panicked; restarting");
                    if wait_or_shutdown(&mut shutdown, self.inner.settings.error_backoff).await {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "ingestion loop cancelled");
                    break;
                }
            }
        }
    }
}

/// Sleep for `pause`, waking early on shutdown. Returns true when the caller
/// should stop: shutdown was requested or its sender is gone.
pub async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, pause: Duration) -> bool {
    let closed = tokio::select! {
        _ = tokio::time::sleep(pause) => false,
        changed = shutdown.changed() => changed.is_err(),
    };
    closed || *shutdown.borrow()
}
