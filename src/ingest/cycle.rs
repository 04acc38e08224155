//! One polling cycle: scan → claim → parse → encode → score → persist → cleanup.

use super::{scan, IngestLoop};
use crate::features::{max_arity, parse_rows, EncodedBatch, EncodedRecord, EncodingError, RecordEncoder};
use crate::model::{Prediction, ScoringError};
use crate::storage::{BatchCommit, BatchSource, ScoredRecord, StorageError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::spawn_blocking;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Why a file was deleted without being stored. None of these heal on retry.
#[derive(Debug, Error)]
pub enum DiscardReason {
    #[error("file is not valid UTF-8")]
    NotUtf8,
    #[error("file has no rows")]
    Empty,
    #[error("widest row has {found} fields, minimum is {min}")]
    TooFewColumns { found: usize, min: usize },
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error("no row survived encoding and scoring")]
    NoSurvivingRows,
    #[error("file cannot be read: {0}")]
    Unreadable(#[source] std::io::Error),
}

impl DiscardReason {
    pub fn kind(&self) -> &'static str {
        match self {
            DiscardReason::NotUtf8 => "not_utf8",
            DiscardReason::Empty => "empty",
            DiscardReason::TooFewColumns { .. } => "too_few_columns",
            DiscardReason::Encoding(EncodingError::SchemaMismatch { .. }) => "schema_mismatch",
            DiscardReason::Encoding(EncodingError::AlignmentFailed { .. }) => "alignment_failed",
            DiscardReason::NoSurvivingRows => "no_surviving_rows",
            DiscardReason::Unreadable(_) => "unreadable",
        }
    }
}

/// A row dropped during scoring. The rest of the batch carries on.
#[derive(Debug, Error)]
pub enum RowScoringFailure {
    #[error(transparent)]
    Model(#[from] ScoringError),
    #[error("scorer timed out after {0:?}")]
    Timeout(Duration),
    #[error("scorer task failed: {0}")]
    Task(String),
}

/// Failures outside the data itself; the cycle backs off and tries again.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("cannot scan {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot delete {path}: {source}")]
    Delete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("worker task failed: {0}")]
    Task(String),
}

#[derive(Debug)]
pub enum CycleOutcome {
    /// Nothing to do
    Idle,
    /// Batch committed (or recognised as already committed) and file deleted
    Committed {
        file: PathBuf,
        batch_id: Uuid,
        inserted: usize,
        rejected: usize,
        unscored: usize,
        replayed: bool,
    },
    /// File deleted without storing anything
    Discarded { file: PathBuf, reason: DiscardReason },
    /// File given up on but left on disk; later scans skip it
    Quarantined { file: PathBuf, reason: DiscardReason },
    /// Storage failed; file kept for the next cycle
    Retained { file: PathBuf, error: StorageError },
    Failed(IngestError),
}

impl CycleOutcome {
    /// Whether the loop should back off before the next scan.
    pub fn needs_backoff(&self) -> bool {
        matches!(self, CycleOutcome::Retained { .. } | CycleOutcome::Failed(_))
    }
}

struct Prepared {
    source: BatchSource,
    batch: EncodedBatch,
}

fn prepare(
    file_name: String,
    bytes: Vec<u8>,
    encoder: &RecordEncoder,
    delimiter: char,
    min_raw_columns: usize,
) -> Result<Prepared, DiscardReason> {
    let source = BatchSource::new(file_name, &bytes);
    let text = std::str::from_utf8(&bytes).map_err(|_| DiscardReason::NotUtf8)?;
    let rows = parse_rows(text, delimiter);
    if rows.is_empty() {
        return Err(DiscardReason::Empty);
    }
    let widest = max_arity(&rows);
    if widest < min_raw_columns {
        return Err(DiscardReason::TooFewColumns {
            found: widest,
            min: min_raw_columns,
        });
    }
    let batch = encoder.encode(&rows)?;
    Ok(Prepared { source, batch })
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

impl IngestLoop {
    /// Run one cycle. Never panics on bad input; every path ends in an outcome.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let inner = &self.inner;

        let dir = inner.settings.watch_dir.clone();
        let skip = self.quarantine_set().clone();
        let scanned = match spawn_blocking(move || scan::scan(&dir, &skip)).await {
            Ok(Ok(s)) => s,
            Ok(Err(source)) => {
                return CycleOutcome::Failed(IngestError::Scan {
                    path: inner.settings.watch_dir.clone(),
                    source,
                })
            }
            Err(e) => return CycleOutcome::Failed(IngestError::Task(e.to_string())),
        };
        let Some(path) = scanned.oldest else {
            return CycleOutcome::Idle;
        };
        let file = display_name(&path);
        debug!(file = %file, pending = scanned.pending, "claimed file");

        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(file = %file, "claimed file disappeared before it was read");
                return CycleOutcome::Idle;
            }
            Err(source) => return self.quarantine(path, DiscardReason::Unreadable(source)),
        };

        let encoder = inner.encoder.clone();
        let delimiter = inner.settings.delimiter;
        let min_raw_columns = inner.settings.min_raw_columns;
        let name = file.clone();
        let prepared = match spawn_blocking(move || {
            prepare(name, bytes, &encoder, delimiter, min_raw_columns)
        })
        .await
        {
            Ok(Ok(p)) => p,
            Ok(Err(reason)) => return self.discard(path, reason).await,
            Err(e) => return CycleOutcome::Failed(IngestError::Task(e.to_string())),
        };
        let Prepared { source, batch } = prepared;
        let span_batch = source.batch_id;

        for rejection in &batch.rejected {
            warn!(
                file = %file,
                batch_id = %span_batch,
                line = rejection.line,
                column = %rejection.column,
                value = %rejection.value,
                reason = "not_numeric",
                "row dropped"
            );
        }
        if !batch.unknown_columns.is_empty() {
            debug!(
                file = %file,
                batch_id = %span_batch,
                columns = ?batch.unknown_columns,
                "indicator columns outside the schema dropped"
            );
        }

        let rejected = batch.rejected.len();
        let mut scored = Vec::with_capacity(batch.records.len());
        let mut unscored = 0usize;
        for record in batch.records {
            match self.score_row(&record).await {
                Ok(prediction) => scored.push(ScoredRecord {
                    encoded: record,
                    prediction,
                }),
                Err(failure) => {
                    unscored += 1;
                    warn!(
                        file = %file,
                        batch_id = %span_batch,
                        line = record.line,
                        reason = "scoring_failed",
                        error = %failure,
                        "row dropped"
                    );
                }
            }
        }
        if scored.is_empty() {
            return self.discard(path, DiscardReason::NoSurvivingRows).await;
        }

        let commit = match self.persist(source, scored).await {
            Ok(c) => c,
            Err(error) => {
                warn!(
                    file = %file,
                    batch_id = %span_batch,
                    reason = "storage_error",
                    error = %error,
                    "batch not committed; file kept for retry"
                );
                return CycleOutcome::Retained { file: path, error };
            }
        };

        if let Err(source) = tokio::fs::remove_file(&path).await {
            if source.kind() != std::io::ErrorKind::NotFound {
                error!(
                    file = %file,
                    batch_id = %span_batch,
                    error = %source,
                    "batch committed but source file could not be deleted"
                );
                return CycleOutcome::Failed(IngestError::Delete { path, source });
            }
        }

        if commit.replayed {
            info!(file = %file, batch_id = %span_batch, "batch already committed; source file removed");
        } else {
            info!(
                file = %file,
                batch_id = %span_batch,
                inserted = commit.inserted,
                rejected,
                unscored,
                timestamp = %commit.timestamp,
                "batch committed"
            );
        }

        CycleOutcome::Committed {
            file: path,
            batch_id: span_batch,
            inserted: commit.inserted,
            rejected,
            unscored,
            replayed: commit.replayed,
        }
    }

    async fn score_row(&self, record: &EncodedRecord) -> Result<Prediction, RowScoringFailure> {
        let scorer = Arc::clone(&self.inner.scorer);
        let features = record.to_f32();
        let limit = self.inner.settings.scorer_timeout;
        match timeout(limit, spawn_blocking(move || scorer.score(&features))).await {
            Err(_) => Err(RowScoringFailure::Timeout(limit)),
            Ok(Err(e)) => Err(RowScoringFailure::Task(e.to_string())),
            Ok(Ok(result)) => Ok(result?),
        }
    }

    async fn persist(
        &self,
        source: BatchSource,
        records: Vec<ScoredRecord>,
    ) -> Result<BatchCommit, StorageError> {
        let store = Arc::clone(&self.inner.store);
        let limit = self.inner.settings.store_timeout;
        match timeout(limit, spawn_blocking(move || store.insert_batch(&source, &records))).await {
            Err(_) => Err(StorageError::Timeout(limit)),
            Ok(Err(e)) => Err(StorageError::Task(e.to_string())),
            Ok(Ok(result)) => result,
        }
    }

    async fn discard(&self, path: PathBuf, reason: DiscardReason) -> CycleOutcome {
        let file = display_name(&path);
        match reason {
            DiscardReason::Encoding(EncodingError::AlignmentFailed { .. }) => error!(
                file = %file,
                reason = reason.kind(),
                error = %reason,
                "file discarded: schema alignment invariant violated, check schema and layout configuration"
            ),
            _ => warn!(file = %file, reason = reason.kind(), error = %reason, "file discarded"),
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => CycleOutcome::Discarded { file: path, reason },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                CycleOutcome::Discarded { file: path, reason }
            }
            Err(e) => {
                warn!(file = %file, error = %e, "discarded file could not be deleted");
                self.quarantine(path, reason)
            }
        }
    }

    fn quarantine(&self, path: PathBuf, reason: DiscardReason) -> CycleOutcome {
        error!(
            file = %display_name(&path),
            reason = reason.kind(),
            error = %reason,
            "file quarantined; skipped until restart"
        );
        self.quarantine_set().insert(path.clone());
        CycleOutcome::Quarantined { file: path, reason }
    }
}
