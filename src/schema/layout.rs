//! Raw input layouts. A layout names the positional columns of a headerless raw
//! file and says which of them are categorical. The encoder is parameterized by
//! one of these; bump the version name whenever columns are added, removed or
//! reordered.

use super::ReferenceSchema;
use crate::config::SchemaConfig;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

pub const KDD99: &str = "kdd99";

/// KDD Cup 99 connection record: 41 features followed by the ground-truth label.
pub const KDD99_COLUMNS: &[&str] = &[
    "duration",
    "protocol_type",
    "service",
    "flag",
    "src_bytes",
    "dst_bytes",
    "land",
    "wrong_fragment",
    "urgent",
    "hot",
    "num_failed_logins",
    "logged_in",
    "num_compromised",
    "root_shell",
    "su_attempted",
    "num_root",
    "num_file_creations",
    "num_shells",
    "num_access_files",
    "num_outbound_cmds",
    "is_host_login",
    "is_guest_login",
    "count",
    "srv_count",
    "serror_rate",
    "srv_serror_rate",
    "rerror_rate",
    "srv_rerror_rate",
    "same_srv_rate",
    "diff_srv_rate",
    "srv_diff_host_rate",
    "dst_host_count",
    "dst_host_srv_count",
    "dst_host_same_srv_rate",
    "dst_host_diff_srv_rate",
    "dst_host_same_src_port_rate",
    "dst_host_srv_diff_host_rate",
    "dst_host_serror_rate",
    "dst_host_srv_serror_rate",
    "dst_host_rerror_rate",
    "dst_host_srv_rerror_rate",
    "label",
];

/// Textual columns of the KDD layout. `label` is expanded too so that its
/// indicators fall away during reconciliation unless the schema asks for them.
pub const KDD99_CATEGORICAL: &[&str] = &["protocol_type", "service", "flag", "label"];

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("unknown raw layout {0:?}")]
    Unknown(String),
    #[error("raw layout has no columns")]
    Empty,
    #[error("raw column {0:?} appears more than once")]
    DuplicateColumn(String),
    #[error("categorical column {0:?} is not a raw column")]
    UnknownCategorical(String),
    #[error("positional naming needs {needed} schema features, schema has {have}")]
    SchemaTooShort { needed: usize, have: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawColumn {
    pub name: String,
    pub categorical: bool,
}

/// Positional description of raw rows. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLayout {
    version: Arc<str>,
    columns: Arc<[RawColumn]>,
}

impl RawLayout {
    pub fn new<C, K>(version: &str, columns: C, categorical: K) -> Result<Self, LayoutError>
    where
        C: IntoIterator,
        C::Item: Into<String>,
        K: IntoIterator,
        K::Item: Into<String>,
    {
        let names: Vec<String> = columns.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(LayoutError::Empty);
        }
        let mut seen = HashSet::new();
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(LayoutError::DuplicateColumn(name.clone()));
            }
        }
        let categorical: HashSet<String> = categorical.into_iter().map(Into::into).collect();
        if let Some(unknown) = categorical.iter().find(|c| !seen.contains(c.as_str())) {
            return Err(LayoutError::UnknownCategorical(unknown.clone()));
        }
        let columns = names
            .iter()
            .map(|name| RawColumn {
                name: name.clone(),
                categorical: categorical.contains(name),
            })
            .collect();
        Ok(Self {
            version: Arc::from(version),
            columns,
        })
    }

    pub fn kdd99() -> Self {
        Self {
            version: Arc::from(KDD99),
            columns: KDD99_COLUMNS
                .iter()
                .map(|name| RawColumn {
                    name: name.to_string(),
                    categorical: KDD99_CATEGORICAL.contains(name),
                })
                .collect(),
        }
    }

    /// Build the layout the config asks for and check it against the schema.
    pub fn resolve(config: &SchemaConfig, schema: &ReferenceSchema) -> Result<Self, LayoutError> {
        let base = match config.raw_layout.as_str() {
            KDD99 => Self::kdd99(),
            other => return Err(LayoutError::Unknown(other.to_string())),
        };

        let names: Vec<String> = if config.positional_names {
            let needed = base.arity();
            if schema.len() < needed {
                return Err(LayoutError::SchemaTooShort {
                    needed,
                    have: schema.len(),
                });
            }
            schema.names()[..needed].to_vec()
        } else if let Some(ref cols) = config.raw_columns {
            cols.clone()
        } else {
            base.names().map(str::to_string).collect()
        };

        let categorical: Vec<String> = match config.categorical_columns {
            Some(ref cols) => cols.clone(),
            None => base
                .columns
                .iter()
                .zip(&names)
                .filter(|(c, _)| c.categorical)
                .map(|(_, renamed)| renamed.clone())
                .collect(),
        };

        Self::new(&base.version, names, categorical)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Expected number of fields per raw row.
    pub fn arity(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[RawColumn] {
        &self.columns
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}
