//! Reference schema: the ordered feature names the classifier was trained on.

use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema artifact not found: {0}")]
    Missing(PathBuf),
    #[error("cannot read schema artifact {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed schema artifact {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("schema artifact lists no features")]
    Empty,
    #[error("schema feature #{0} has a blank name")]
    BlankName(usize),
    #[error("schema feature {0:?} listed more than once")]
    Duplicate(String),
}

/// Accepted artifact shapes: a bare list, or a list tagged with its version.
#[derive(Deserialize)]
#[serde(untagged)]
enum Artifact {
    Bare(Vec<String>),
    Versioned { version: String, features: Vec<String> },
}

pub const UNVERSIONED: &str = "unversioned";

/// Immutable after construction. Shared process-wide as `Arc<ReferenceSchema>`.
#[derive(Debug, Clone)]
pub struct ReferenceSchema {
    version: String,
    names: Vec<String>,
    index: HashMap<String, usize>,
    fingerprint: String,
}

impl ReferenceSchema {
    /// Load the schema artifact. Called once at startup; any error is fatal.
    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        if !path.exists() {
            return Err(SchemaError::Missing(path.to_path_buf()));
        }
        let data = std::fs::read_to_string(path).map_err(|source| SchemaError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let artifact: Artifact =
            serde_json::from_str(&data).map_err(|source| SchemaError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;
        let (version, names) = match artifact {
            Artifact::Bare(names) => (UNVERSIONED.to_string(), names),
            Artifact::Versioned { version, features } => (version, features),
        };
        Self::new(version, names)
    }

    pub fn new(version: impl Into<String>, names: Vec<String>) -> Result<Self, SchemaError> {
        if names.is_empty() {
            return Err(SchemaError::Empty);
        }
        let mut index = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(SchemaError::BlankName(i));
            }
            if index.insert(name.clone(), i).is_some() {
                return Err(SchemaError::Duplicate(name.clone()));
            }
        }
        let fingerprint = fingerprint(&names);
        Ok(Self {
            version: version.into(),
            names,
            index,
            fingerprint,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Hex SHA-256 over the ordered names; changes whenever a name or the order does.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Indicator features produced by one-hot expansion of `column`,
    /// as `(level, position)` pairs in schema order.
    pub fn indicator_levels(&self, column: &str) -> Vec<(&str, usize)> {
        let prefix = format!("{column}_");
        self.names
            .iter()
            .enumerate()
            .filter_map(|(i, name)| name.strip_prefix(&prefix).map(|level| (level, i)))
            .filter(|(level, _)| !level.is_empty())
            .collect()
    }
}

fn fingerprint(names: &[String]) -> String {
    let mut h = Sha256::new();
    for name in names {
        h.update(name.as_bytes());
        h.update([0u8]);
    }
    format!("{:x}", h.finalize())
}
