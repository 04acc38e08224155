//! Netwatch ingestion: raw network-connection files in, scored rows out.
//!
//! Modular structure:
//! - [`schema`]: Reference feature schema and versioned raw layouts
//! - [`features`]: Raw row parsing and schema alignment
//! - [`model`]: Classifier boundary and ONNX Runtime scorer
//! - [`storage`]: Append-only SQLite store with batched transactional inserts
//! - [`ingest`]: Folder-polling ingestion loop
//! - [`api`]: Read-only HTTP query surface
//! - [`logging`]: Structured JSON logging
//! - [`synth`]: Synthetic KDD-style traffic

pub mod api;
pub mod config;
pub mod error;
pub mod features;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod schema;
pub mod storage;
pub mod synth;

pub use config::AppConfig;
pub use error::StartupError;
pub use features::{EncodedRecord, RawRecord, RecordEncoder};
pub use ingest::{CycleOutcome, IngestLoop};
pub use logging::StructuredLogger;
pub use model::{OnnxScorer, Prediction, Scorer};
pub use schema::{RawLayout, ReferenceSchema};
pub use storage::SqliteStore;
