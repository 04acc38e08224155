//! Raw row parsing and schema alignment.

mod encoder;
mod raw;

pub use encoder::{
    boolean_token, encode, normalize_token, EncodedBatch, EncodingError, RecordEncoder,
    RowRejection,
};
pub use raw::{max_arity, parse_rows, RawRecord};

use crate::schema::ReferenceSchema;
use serde::{Deserialize, Serialize};

/// One raw row aligned to the reference schema: `values[i]` is the feature
/// `schema.names()[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedRecord {
    /// Source line the row came from
    pub line: usize,
    pub values: Vec<f64>,
}

impl EncodedRecord {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, schema: &ReferenceSchema, name: &str) -> Option<f64> {
        schema.index_of(name).and_then(|i| self.values.get(i).copied())
    }

    /// `(feature, value)` pairs in schema order.
    pub fn named<'a>(
        &'a self,
        schema: &'a ReferenceSchema,
    ) -> impl Iterator<Item = (&'a str, f64)> + 'a {
        schema
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }

    /// Model input precision.
    pub fn to_f32(&self) -> Vec<f32> {
        self.values.iter().map(|v| *v as f32).collect()
    }
}
