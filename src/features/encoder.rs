//! Record encoder: raw rows → schema-aligned vectors.
//!
//! Rows are checked for arity, named positionally from the raw layout,
//! boolean tokens are normalized, categorical columns one-hot expanded into
//! `<column>_<value>` indicators, and the result is reconciled against the
//! reference schema: indicators the schema does not know are dropped, schema
//! features nobody produced stay 0. No I/O; the same input always encodes to
//! the same output.

use super::{EncodedRecord, RawRecord};
use crate::schema::{RawLayout, ReferenceSchema};
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Batch-fatal encoding failures. The offending file is discarded, never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodingError {
    #[error("line {line}: {found} raw columns, layout {layout} expects {expected}")]
    SchemaMismatch {
        layout: String,
        expected: usize,
        found: usize,
        line: usize,
    },
    #[error("aligned vector does not match schema of {expected} features: {detail}")]
    AlignmentFailed { expected: usize, detail: String },
}

/// A row dropped from its batch because a continuous field is not numeric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowRejection {
    pub line: usize,
    pub column: String,
    pub value: String,
}

impl fmt::Display for RowRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "line {}: column {} value {:?} is not numeric",
            self.line, self.column, self.value
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodedBatch {
    pub records: Vec<EncodedRecord>,
    pub rejected: Vec<RowRejection>,
    /// Indicator columns produced by this batch that the schema does not know
    pub unknown_columns: BTreeSet<String>,
}

const TRUE_TOKENS: &[&str] = &["true", "vrai", "yes", "oui"];
const FALSE_TOKENS: &[&str] = &["false", "faux", "no", "non"];

/// Case-insensitive boolean token lookup.
pub fn boolean_token(raw: &str) -> Option<bool> {
    if TRUE_TOKENS.iter().any(|t| raw.eq_ignore_ascii_case(t)) {
        Some(true)
    } else if FALSE_TOKENS.iter().any(|t| raw.eq_ignore_ascii_case(t)) {
        Some(false)
    } else {
        None
    }
}

/// Boolean tokens become "1"/"0"; anything else passes through.
pub fn normalize_token(raw: &str) -> &str {
    match boolean_token(raw) {
        Some(true) => "1",
        Some(false) => "0",
        None => raw,
    }
}

fn parse_numeric(token: &str) -> Option<f64> {
    token.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Encoder bound to one schema and one raw layout version. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RecordEncoder {
    schema: Arc<ReferenceSchema>,
    layout: RawLayout,
}

impl RecordEncoder {
    pub fn new(schema: Arc<ReferenceSchema>, layout: RawLayout) -> Self {
        Self { schema, layout }
    }

    pub fn schema(&self) -> &Arc<ReferenceSchema> {
        &self.schema
    }

    pub fn layout(&self) -> &RawLayout {
        &self.layout
    }

    pub fn encode(&self, rows: &[RawRecord]) -> Result<EncodedBatch, EncodingError> {
        encode(rows, &self.schema, &self.layout)
    }
}

/// Encode a whole batch. Structural problems fail the batch; non-numeric
/// values only drop their row.
pub fn encode(
    rows: &[RawRecord],
    schema: &ReferenceSchema,
    layout: &RawLayout,
) -> Result<EncodedBatch, EncodingError> {
    let expected = layout.arity();
    if let Some(bad) = rows.iter().find(|r| r.arity() != expected) {
        return Err(EncodingError::SchemaMismatch {
            layout: layout.version().to_string(),
            expected,
            found: bad.arity(),
            line: bad.line,
        });
    }

    let mut batch = EncodedBatch::default();
    for row in rows {
        match encode_row(row, schema, layout)? {
            RowOutcome::Encoded(record, unknown) => {
                batch.unknown_columns.extend(unknown);
                batch.records.push(record);
            }
            RowOutcome::Rejected(rejection) => batch.rejected.push(rejection),
        }
    }
    Ok(batch)
}

enum RowOutcome {
    Encoded(EncodedRecord, Vec<String>),
    Rejected(RowRejection),
}

fn encode_row(
    row: &RawRecord,
    schema: &ReferenceSchema,
    layout: &RawLayout,
) -> Result<RowOutcome, EncodingError> {
    // Width is fixed by construction; the alignment check is that no schema
    // slot is written twice.
    let mut values = vec![0.0f64; schema.len()];
    let mut written = vec![false; schema.len()];
    let mut unknown = Vec::new();

    for (column, raw) in layout.columns().iter().zip(&row.fields) {
        let token = normalize_token(raw);
        let (name, value): (Cow<'_, str>, f64) = if column.categorical {
            (Cow::Owned(format!("{}_{}", column.name, token)), 1.0)
        } else {
            match parse_numeric(token) {
                Some(v) => (Cow::Borrowed(column.name.as_str()), v),
                None => {
                    return Ok(RowOutcome::Rejected(RowRejection {
                        line: row.line,
                        column: column.name.clone(),
                        value: raw.clone(),
                    }))
                }
            }
        };

        match schema.index_of(&name) {
            Some(i) if written[i] => {
                return Err(EncodingError::AlignmentFailed {
                    expected: schema.len(),
                    detail: format!("feature {name:?} produced twice on line {}", row.line),
                });
            }
            Some(i) => {
                written[i] = true;
                values[i] = value;
            }
            None => unknown.push(name.into_owned()),
        }
    }

    Ok(RowOutcome::Encoded(
        EncodedRecord {
            line: row.line,
            values,
        },
        unknown,
    ))
}
