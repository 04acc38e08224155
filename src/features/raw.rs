//! Raw rows as they come off disk: headerless, delimiter-separated, untyped.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    /// 1-based line number in the source file
    pub line: usize,
    pub fields: Vec<String>,
}

impl RawRecord {
    pub fn new(line: usize, fields: Vec<String>) -> Self {
        Self { line, fields }
    }

    pub fn arity(&self) -> usize {
        self.fields.len()
    }
}

/// Split file contents into raw records. Blank lines are skipped; fields are
/// trimmed and stripped of one pair of surrounding double quotes.
pub fn parse_rows(text: &str, delimiter: char) -> Vec<RawRecord> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            let fields = line.split(delimiter).map(clean_field).collect();
            RawRecord::new(i + 1, fields)
        })
        .collect()
}

fn clean_field(field: &str) -> String {
    let f = field.trim();
    let f = f
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(f);
    f.to_string()
}

/// Widest row in the batch; 0 when empty.
pub fn max_arity(rows: &[RawRecord]) -> usize {
    rows.iter().map(RawRecord::arity).max().unwrap_or(0)
}
