//! Append-only store of scored connections.

mod sqlite;

pub use sqlite::{SqliteStore, RESERVED_COLUMNS, TABLE};

use crate::features::EncodedRecord;
use crate::model::Prediction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("table {table} does not match the active schema: {detail}")]
    SchemaConflict { table: String, detail: String },
    #[error("schema feature {0:?} collides with a store column")]
    ReservedColumn(String),
    #[error("schema features collide case-insensitively: {0:?}")]
    DuplicateColumn(String),
    #[error("unknown column {0:?}")]
    UnknownColumn(String),
    #[error("store lock poisoned")]
    LockPoisoned,
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("store task failed: {0}")]
    Task(String),
}

/// An aligned record with its classification, ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub encoded: EncodedRecord,
    pub prediction: Prediction,
}

/// Identity of the file a batch was derived from. The fingerprint lets the
/// store recognise a batch it has already committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSource {
    pub batch_id: Uuid,
    pub file_name: String,
    pub fingerprint: String,
}

impl BatchSource {
    pub fn new(file_name: impl Into<String>, contents: &[u8]) -> Self {
        let file_name = file_name.into();
        let mut h = Sha256::new();
        h.update(file_name.as_bytes());
        h.update([0u8]);
        h.update(contents);
        Self {
            batch_id: Uuid::new_v4(),
            file_name,
            fingerprint: format!("{:x}", h.finalize()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchCommit {
    pub inserted: usize,
    /// Ingestion timestamp shared by every row of the batch
    pub timestamp: DateTime<Utc>,
    /// The fingerprint was already committed; nothing was written
    pub replayed: bool,
}

/// Durable row as read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredConnection {
    pub id: i64,
    pub timestamp: String,
    /// Values in schema order
    pub features: Vec<f64>,
    pub predicted_class: String,
    pub prediction_probability: f64,
}
