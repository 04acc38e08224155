//! Process configuration. Built once at startup and handed out by reference;
//! nothing here is mutated after `load` returns.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Data directory (SQLite store)
    pub data_dir: PathBuf,
    /// Directory polled for raw connection files
    pub watch_dir: PathBuf,
    /// Reference schema artifact (JSON list of feature names)
    pub schema_path: PathBuf,
    /// Path to ONNX classifier
    pub model_path: PathBuf,
    pub schema: SchemaConfig,
    pub ingest: IngestConfig,
    pub scorer: ScorerConfig,
    pub store: StoreConfig,
    pub api: ApiConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Built-in raw layout version the input files follow
    pub raw_layout: String,
    /// Override the layout's positional raw column names
    pub raw_columns: Option<Vec<String>>,
    /// Override which raw columns are one-hot expanded
    pub categorical_columns: Option<Vec<String>>,
    /// Name raw columns positionally from the reference schema instead of the layout
    pub positional_names: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Sleep between scans when the watch directory is empty
    pub poll_interval_ms: u64,
    /// Sleep after a failed cycle (storage failure, I/O error)
    pub error_backoff_ms: u64,
    /// Field delimiter of raw files
    pub delimiter: char,
    /// Files whose widest row has fewer fields are discarded before encoding
    pub min_raw_columns: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    /// Per-row scoring timeout
    pub timeout_ms: u64,
    /// Single-output models: score at or above this is classed as anomaly
    pub anomaly_threshold: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file name inside `data_dir`
    pub file_name: String,
    /// SQLite busy handler timeout
    pub busy_timeout_ms: u64,
    /// Bound on one batch insert, including lock waits
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind: String,
    pub default_limit: usize,
    pub max_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".netwatch"),
            watch_dir: PathBuf::from("incoming"),
            schema_path: PathBuf::from("reference_columns.json"),
            model_path: PathBuf::from("model.onnx"),
            schema: SchemaConfig::default(),
            ingest: IngestConfig::default(),
            scorer: ScorerConfig::default(),
            store: StoreConfig::default(),
            api: ApiConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            raw_layout: "kdd99".to_string(),
            raw_columns: None,
            categorical_columns: None,
            positional_names: false,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            error_backoff_ms: 5_000,
            delimiter: ',',
            min_raw_columns: 10,
        }
    }
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2_000,
            anomaly_threshold: 0.5,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            file_name: "network_traffic.db".to_string(),
            busy_timeout_ms: 5_000,
            timeout_ms: 15_000,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "127.0.0.1:8000".to_string(),
            default_limit: 100,
            max_limit: 1_000,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}

impl IngestConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

impl ScorerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl StoreConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl AppConfig {
    /// Load from JSON file if present; otherwise return default.
    /// A file that exists but does not parse is an error, not a silent default.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(&self.store.file_name)
    }
}
