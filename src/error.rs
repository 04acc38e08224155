//! Conditions under which the process refuses to start.

use crate::config::ConfigError;
use crate::schema::{LayoutError, SchemaError};
use crate::storage::StorageError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("reference schema: {0}")]
    Schema(#[from] SchemaError),
    #[error("raw layout: {0}")]
    Layout(#[from] LayoutError),
    #[error("store: {0}")]
    Storage(#[from] StorageError),
    #[error("model: {0}")]
    Model(#[from] ort::Error),
    #[error("cannot prepare directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot bind query API on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}
