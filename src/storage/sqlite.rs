//! SQLite-backed connection store. One writer connection (ingestion) and one
//! read-only connection (queries); WAL keeps readers off the writer's lock and
//! a reader never sees a batch that has not committed.

use super::{BatchCommit, BatchSource, ScoredRecord, StorageError, StoredConnection};
use crate::schema::ReferenceSchema;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension, TransactionBehavior};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TABLE: &str = "connections";
pub const RESERVED_COLUMNS: &[&str] = &["id", "timestamp", "predicted_class", "prediction_probability"];

/// Default SQLITE_MAX_VARIABLE_NUMBER of the bundled library.
const MAX_BOUND_PARAMS: usize = 32_766;

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

struct Writer {
    conn: Connection,
    last_timestamp: Option<DateTime<Utc>>,
}

pub struct SqliteStore {
    writer: Mutex<Writer>,
    reader: Mutex<Connection>,
    schema: Arc<ReferenceSchema>,
    insert_columns: String,
    select_columns: String,
}

impl SqliteStore {
    /// Open or create the store at `path`. The table is created if absent; an
    /// existing table must have exactly the columns the schema implies.
    pub fn open(
        path: &Path,
        schema: Arc<ReferenceSchema>,
        busy_timeout: Duration,
    ) -> Result<Self, StorageError> {
        check_feature_names(&schema)?;

        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |r| r.get(0))?;
        conn.execute_batch("PRAGMA synchronous=NORMAL;")?;

        let feature_columns: Vec<String> = schema
            .names()
            .iter()
            .map(|n| format!("{} REAL NOT NULL DEFAULT 0", quote(n)))
            .collect();
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                {features},
                predicted_class TEXT NOT NULL,
                prediction_probability REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_{table}_timestamp ON {table}(timestamp);
            CREATE TABLE IF NOT EXISTS ingested_files (
                fingerprint TEXT PRIMARY KEY,
                file_name TEXT NOT NULL,
                batch_id TEXT NOT NULL,
                rows INTEGER NOT NULL,
                committed_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS meta (k TEXT PRIMARY KEY, v TEXT);
            "#,
            table = TABLE,
            features = feature_columns.join(",\n                "),
        ))?;

        verify_table(&conn, &schema)?;
        verify_meta(&conn, &schema)?;

        let reader = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        reader.busy_timeout(busy_timeout)?;

        let quoted: Vec<String> = schema.names().iter().map(|n| quote(n)).collect();
        let insert_columns = format!(
            "timestamp, {}, predicted_class, prediction_probability",
            quoted.join(", ")
        );
        let select_columns = format!(
            "id, timestamp, {}, predicted_class, prediction_probability",
            quoted.join(", ")
        );

        Ok(Self {
            writer: Mutex::new(Writer {
                conn,
                last_timestamp: None,
            }),
            reader: Mutex::new(reader),
            schema,
            insert_columns,
            select_columns,
        })
    }

    pub fn schema(&self) -> &Arc<ReferenceSchema> {
        &self.schema
    }

    /// Append every record in one transaction. All rows share one ingestion
    /// timestamp. A source whose fingerprint was already committed writes nothing.
    pub fn insert_batch(
        &self,
        source: &BatchSource,
        records: &[ScoredRecord],
    ) -> Result<BatchCommit, StorageError> {
        let width = self.schema.len();
        if let Some(bad) = records.iter().find(|r| r.encoded.len() != width) {
            return Err(StorageError::SchemaConflict {
                table: TABLE.to_string(),
                detail: format!(
                    "record from line {} has {} features, table has {}",
                    bad.encoded.line,
                    bad.encoded.len(),
                    width
                ),
            });
        }

        let mut writer = self.writer.lock().map_err(|_| StorageError::LockPoisoned)?;
        let now = Utc::now();
        let timestamp = match writer.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };

        let tx = writer
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let already: Option<i64> = tx
            .query_row(
                "SELECT rows FROM ingested_files WHERE fingerprint = ?1",
                params![source.fingerprint],
                |r| r.get(0),
            )
            .optional()?;
        if already.is_some() {
            return Ok(BatchCommit {
                inserted: 0,
                timestamp,
                replayed: true,
            });
        }

        let ts = timestamp.to_rfc3339_opts(SecondsFormat::Millis, true);
        let per_row = width + 3;
        let rows_per_statement = (MAX_BOUND_PARAMS / per_row).max(1);
        let row_placeholders = format!("({})", vec!["?"; per_row].join(", "));

        for chunk in records.chunks(rows_per_statement) {
            let sql = format!(
                "INSERT INTO {} ({}) VALUES {}",
                TABLE,
                self.insert_columns,
                vec![row_placeholders.as_str(); chunk.len()].join(", ")
            );
            let mut values: Vec<Value> = Vec::with_capacity(chunk.len() * per_row);
            for record in chunk {
                values.push(Value::Text(ts.clone()));
                values.extend(record.encoded.values.iter().map(|v| Value::Real(*v)));
                values.push(Value::Text(record.prediction.predicted_class.clone()));
                values.push(Value::Real(record.prediction.probability));
            }
            tx.execute(&sql, params_from_iter(values))?;
        }

        tx.execute(
            "INSERT INTO ingested_files (fingerprint, file_name, batch_id, rows, committed_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                source.fingerprint,
                source.file_name,
                source.batch_id.to_string(),
                records.len() as i64,
                ts
            ],
        )?;
        tx.commit()?;
        writer.last_timestamp = Some(timestamp);

        Ok(BatchCommit {
            inserted: records.len(),
            timestamp,
            replayed: false,
        })
    }

    /// Most recent connections, newest first. `indicator`, when given, keeps
    /// only rows where that schema feature is set.
    pub fn recent(
        &self,
        limit: usize,
        indicator: Option<&str>,
    ) -> Result<Vec<StoredConnection>, StorageError> {
        let filter = match indicator {
            Some(name) if self.schema.contains(name) => format!("WHERE {} = 1", quote(name)),
            Some(name) => return Err(StorageError::UnknownColumn(name.to_string())),
            None => String::new(),
        };
        let sql = format!(
            "SELECT {} FROM {} {} ORDER BY id DESC LIMIT ?1",
            self.select_columns, TABLE, filter
        );

        let width = self.schema.len();
        let conn = self.reader.lock().map_err(|_| StorageError::LockPoisoned)?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let mut features = Vec::with_capacity(width);
            for i in 0..width {
                features.push(row.get::<_, f64>(2 + i)?);
            }
            Ok(StoredConnection {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                features,
                predicted_class: row.get(2 + width)?,
                prediction_probability: row.get(3 + width)?,
            })
        })?;
        let out = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(out)
    }

    pub fn count(&self) -> Result<u64, StorageError> {
        let conn = self.reader.lock().map_err(|_| StorageError::LockPoisoned)?;
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {TABLE}"), [], |r| r.get(0))?;
        Ok(n as u64)
    }

    /// Whether a batch with this fingerprint has been committed.
    pub fn is_committed(&self, fingerprint: &str) -> Result<bool, StorageError> {
        let conn = self.reader.lock().map_err(|_| StorageError::LockPoisoned)?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM ingested_files WHERE fingerprint = ?1",
                params![fingerprint],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

fn check_feature_names(schema: &ReferenceSchema) -> Result<(), StorageError> {
    let mut seen = HashSet::new();
    for name in schema.names() {
        let lower = name.to_ascii_lowercase();
        if RESERVED_COLUMNS.contains(&lower.as_str()) {
            return Err(StorageError::ReservedColumn(name.clone()));
        }
        if !seen.insert(lower) {
            return Err(StorageError::DuplicateColumn(name.clone()));
        }
    }
    Ok(())
}

fn verify_table(conn: &Connection, schema: &ReferenceSchema) -> Result<(), StorageError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({TABLE})"))?;
    let found: Vec<String> = stmt
        .query_map([], |r| r.get::<_, String>(1))?
        .collect::<Result<_, _>>()?;

    let expected: Vec<&str> = std::iter::once("id")
        .chain(std::iter::once("timestamp"))
        .chain(schema.names().iter().map(String::as_str))
        .chain(["predicted_class", "prediction_probability"])
        .collect();

    if found.len() != expected.len() {
        return Err(StorageError::SchemaConflict {
            table: TABLE.to_string(),
            detail: format!(
                "table has {} columns, schema {} implies {}",
                found.len(),
                schema.version(),
                expected.len()
            ),
        });
    }
    if let Some((i, (f, e))) = found
        .iter()
        .zip(&expected)
        .enumerate()
        .find(|(_, (f, e))| f.as_str() != **e)
    {
        return Err(StorageError::SchemaConflict {
            table: TABLE.to_string(),
            detail: format!("column {i} is {f:?}, schema expects {e:?}"),
        });
    }
    Ok(())
}

fn verify_meta(conn: &Connection, schema: &ReferenceSchema) -> Result<(), StorageError> {
    let recorded: Option<String> = conn
        .query_row("SELECT v FROM meta WHERE k = 'schema_fingerprint'", [], |r| r.get(0))
        .optional()?;
    match recorded {
        Some(fp) if fp != schema.fingerprint() => Err(StorageError::SchemaConflict {
            table: TABLE.to_string(),
            detail: format!("recorded schema fingerprint {fp} differs from {}", schema.fingerprint()),
        }),
        Some(_) => Ok(()),
        None => {
            conn.execute(
                "INSERT INTO meta (k, v) VALUES ('schema_fingerprint', ?1), ('schema_version', ?2)",
                params![schema.fingerprint(), schema.version()],
            )?;
            Ok(())
        }
    }
}
