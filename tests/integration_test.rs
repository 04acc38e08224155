//! Integration test: watch directory → encode → score → store, end to end.

use netwatch_ingest::{
    config::AppConfig,
    features::{EncodedRecord, RecordEncoder},
    ingest::{scan, wait_or_shutdown, CycleOutcome, DiscardReason, IngestLoop, LoopSettings},
    model::{OnnxScorer, Prediction, Scorer, ScoringError, UNSCORED_CLASS},
    schema::{RawLayout, ReferenceSchema},
    storage::{BatchSource, ScoredRecord, SqliteStore, StorageError},
    synth,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Labels every row `normal` with probability 0.9.
struct FixedScorer;

impl Scorer for FixedScorer {
    fn score(&self, _features: &[f32]) -> Result<Prediction, ScoringError> {
        Prediction::checked("normal".into(), 0.9)
    }
}

/// Fails rows whose first feature (duration) exceeds the limit.
struct PickyScorer {
    max_duration: f32,
}

impl Scorer for PickyScorer {
    fn score(&self, features: &[f32]) -> Result<Prediction, ScoringError> {
        if features[0] > self.max_duration {
            return Err(ScoringError::Inference("duration out of range".into()));
        }
        Prediction::checked("normal".into(), 0.75)
    }
}

/// Takes longer than any scorer timeout used here on rows whose duration exceeds the limit.
struct SlowScorer {
    max_duration: f32,
}

impl Scorer for SlowScorer {
    fn score(&self, features: &[f32]) -> Result<Prediction, ScoringError> {
        if features[0] > self.max_duration {
            std::thread::sleep(Duration::from_millis(500));
        }
        Prediction::checked("normal".into(), 0.6)
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    watch_dir: PathBuf,
    db_path: PathBuf,
    schema: Arc<ReferenceSchema>,
    store: Arc<SqliteStore>,
    ingest: IngestLoop,
}

fn kdd_schema() -> Arc<ReferenceSchema> {
    Arc::new(ReferenceSchema::new("kdd99-onehot", synth::reference_features()).unwrap())
}

fn settings(watch_dir: &Path) -> LoopSettings {
    LoopSettings {
        watch_dir: watch_dir.to_path_buf(),
        delimiter: ',',
        min_raw_columns: 10,
        poll_interval: Duration::from_millis(10),
        error_backoff: Duration::from_millis(10),
        scorer_timeout: Duration::from_secs(1),
        store_timeout: Duration::from_secs(5),
    }
}

fn harness_with(scorer: Arc<dyn Scorer>, busy_timeout: Duration) -> Harness {
    harness_tuned(scorer, busy_timeout, |_| {})
}

fn harness_tuned(
    scorer: Arc<dyn Scorer>,
    busy_timeout: Duration,
    tune: impl FnOnce(&mut LoopSettings),
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let watch_dir = dir.path().join("incoming");
    std::fs::create_dir_all(&watch_dir).unwrap();
    let db_path = dir.path().join("store.db");
    let schema = kdd_schema();
    let store = Arc::new(SqliteStore::open(&db_path, Arc::clone(&schema), busy_timeout).unwrap());
    let encoder = RecordEncoder::new(Arc::clone(&schema), RawLayout::kdd99());
    let mut loop_settings = settings(&watch_dir);
    tune(&mut loop_settings);
    let ingest = IngestLoop::new(loop_settings, encoder, scorer, Arc::clone(&store));
    Harness {
        _dir: dir,
        watch_dir,
        db_path,
        schema,
        store,
        ingest,
    }
}

fn harness() -> Harness {
    harness_with(Arc::new(FixedScorer), Duration::from_millis(500))
}

fn rows(n: usize, seed: u64) -> Vec<Vec<String>> {
    let mut rng = StdRng::seed_from_u64(seed);
    synth::generate_rows(&mut rng, n)
}

fn write_file(dir: &Path, name: &str, rows: &[Vec<String>]) -> PathBuf {
    let body: String = rows.iter().map(|r| r.join(",") + "\n").collect();
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn config_load_default() {
    let c = AppConfig::load(Path::new("nonexistent.json")).unwrap();
    assert_eq!(c.ingest.min_raw_columns, 10);
    assert_eq!(c.store_path(), PathBuf::from(".netwatch/network_traffic.db"));
    assert!(c.api.enabled);
}

#[test]
fn config_partial_and_malformed() {
    let dir = tempfile::tempdir().unwrap();
    let partial = dir.path().join("config.json");
    std::fs::write(&partial, r#"{"watch_dir": "/tmp/in", "ingest": {"poll_interval_ms": 250}}"#).unwrap();
    let c = AppConfig::load(&partial).unwrap();
    assert_eq!(c.watch_dir, PathBuf::from("/tmp/in"));
    assert_eq!(c.ingest.poll_interval(), Duration::from_millis(250));
    assert_eq!(c.ingest.delimiter, ',');

    let broken = dir.path().join("broken.json");
    std::fs::write(&broken, "{").unwrap();
    assert!(AppConfig::load(&broken).is_err());
}

#[test]
fn onnx_no_model_reports_unscored() {
    let scorer = OnnxScorer::load(Path::new("nonexistent.onnx"), 4, 0.5).unwrap();
    assert!(!scorer.is_loaded());
    let p = scorer.score(&[0.0; 4]).unwrap();
    assert_eq!(p.predicted_class, UNSCORED_CLASS);
    assert_eq!(p.probability, 0.0);
}

#[test]
fn prediction_rejects_out_of_range_probability() {
    assert!(Prediction::checked("x".into(), 1.5).is_err());
    assert!(Prediction::checked("x".into(), f64::NAN).is_err());
    assert!(Prediction::checked("x".into(), 1.0).is_ok());
}

#[tokio::test]
async fn empty_directory_is_idle() {
    let h = harness();
    std::fs::write(h.watch_dir.join(".partial.tmp"), "1,2,3").unwrap();
    assert!(matches!(h.ingest.run_cycle().await, CycleOutcome::Idle));
    assert_eq!(h.store.count().unwrap(), 0);
}

#[tokio::test]
async fn single_row_file_is_stored_and_removed() {
    let h = harness();
    let path = write_file(&h.watch_dir, "one.csv", &rows(1, 0));

    assert!(matches!(
        h.ingest.run_cycle().await,
        CycleOutcome::Committed { inserted: 1, .. }
    ));
    assert!(!path.exists());
    let stored = h.store.recent(10, None).unwrap();
    assert_eq!(stored.len(), 1);
    assert!((0.0..=1.0).contains(&stored[0].prediction_probability));
}

#[tokio::test]
async fn bad_row_is_dropped_rest_committed() {
    let h = harness();
    let mut batch = rows(10, 1);
    batch[4][0] = "abc".into();
    let path = write_file(&h.watch_dir, "batch_a.csv", &batch);

    match h.ingest.run_cycle().await {
        CycleOutcome::Committed {
            inserted,
            rejected,
            unscored,
            replayed,
            ..
        } => {
            assert_eq!(inserted, 9);
            assert_eq!(rejected, 1);
            assert_eq!(unscored, 0);
            assert!(!replayed);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(!path.exists());
    assert_eq!(h.store.count().unwrap(), 9);

    let stored = h.store.recent(100, None).unwrap();
    assert_eq!(stored.len(), 9);
    assert!(stored.iter().all(|r| r.features.len() == h.schema.len()));
    assert!(stored.iter().all(|r| r.predicted_class == "normal"));
    let ts = &stored[0].timestamp;
    assert!(stored.iter().all(|r| &r.timestamp == ts));
}

#[tokio::test]
async fn replayed_file_inserts_nothing() {
    let h = harness();
    let batch = rows(5, 2);

    write_file(&h.watch_dir, "batch_b.csv", &batch);
    assert!(matches!(
        h.ingest.run_cycle().await,
        CycleOutcome::Committed { inserted: 5, .. }
    ));

    // same name, same bytes: crash between commit and delete
    let path = write_file(&h.watch_dir, "batch_b.csv", &batch);
    assert!(matches!(
        h.ingest.run_cycle().await,
        CycleOutcome::Committed {
            inserted: 0,
            replayed: true,
            ..
        }
    ));
    assert!(!path.exists());
    assert_eq!(h.store.count().unwrap(), 5);
}

#[tokio::test]
async fn locked_store_keeps_file_for_retry() {
    let h = harness_with(Arc::new(FixedScorer), Duration::from_millis(50));
    let path = write_file(&h.watch_dir, "batch_c.csv", &rows(3, 3));

    let blocker = rusqlite::Connection::open(&h.db_path).unwrap();
    blocker.execute_batch("BEGIN EXCLUSIVE;").unwrap();

    let outcome = h.ingest.run_cycle().await;
    assert!(matches!(outcome, CycleOutcome::Retained { .. }), "{outcome:?}");
    assert!(outcome.needs_backoff());
    assert!(path.exists());
    assert_eq!(h.store.count().unwrap(), 0);

    blocker.execute_batch("ROLLBACK;").unwrap();
    assert!(matches!(
        h.ingest.run_cycle().await,
        CycleOutcome::Committed { inserted: 3, .. }
    ));
    assert!(!path.exists());
    assert_eq!(h.store.count().unwrap(), 3);
}

#[tokio::test]
async fn structural_failures_discard_file() {
    let h = harness();

    let ragged = h.watch_dir.join("ragged.csv");
    let mut batch = rows(3, 4);
    batch[1].pop();
    write_file(&h.watch_dir, "ragged.csv", &batch);
    match h.ingest.run_cycle().await {
        CycleOutcome::Discarded { reason, .. } => assert_eq!(reason.kind(), "schema_mismatch"),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(!ragged.exists());

    std::fs::write(h.watch_dir.join("narrow.csv"), "1,2,3\n4,5,6\n").unwrap();
    assert!(matches!(
        h.ingest.run_cycle().await,
        CycleOutcome::Discarded {
            reason: DiscardReason::TooFewColumns { found: 3, min: 10 },
            ..
        }
    ));

    std::fs::write(h.watch_dir.join("blank.csv"), "\n\n").unwrap();
    assert!(matches!(
        h.ingest.run_cycle().await,
        CycleOutcome::Discarded {
            reason: DiscardReason::Empty,
            ..
        }
    ));

    std::fs::write(h.watch_dir.join("binary.csv"), b"\xff\xfe\x00\x01").unwrap();
    assert!(matches!(
        h.ingest.run_cycle().await,
        CycleOutcome::Discarded {
            reason: DiscardReason::NotUtf8,
            ..
        }
    ));

    assert_eq!(std::fs::read_dir(&h.watch_dir).unwrap().count(), 0);
    assert_eq!(h.store.count().unwrap(), 0);
}

#[tokio::test]
async fn scoring_failures_drop_rows() {
    let h = harness_with(Arc::new(PickyScorer { max_duration: 100.0 }), Duration::from_millis(500));
    let mut batch = rows(4, 5);
    for (i, row) in batch.iter_mut().enumerate() {
        row[0] = if i % 2 == 0 { "5" } else { "5000" }.to_string();
    }
    write_file(&h.watch_dir, "mixed.csv", &batch);
    assert!(matches!(
        h.ingest.run_cycle().await,
        CycleOutcome::Committed {
            inserted: 2,
            unscored: 2,
            ..
        }
    ));

    for row in batch.iter_mut() {
        row[0] = "5000".to_string();
    }
    let path = write_file(&h.watch_dir, "hopeless.csv", &batch);
    assert!(matches!(
        h.ingest.run_cycle().await,
        CycleOutcome::Discarded {
            reason: DiscardReason::NoSurvivingRows,
            ..
        }
    ));
    assert!(!path.exists());
    assert_eq!(h.store.count().unwrap(), 2);
}

#[tokio::test]
async fn oldest_file_first() {
    let h = harness();
    let first = write_file(&h.watch_dir, "zz_first.csv", &rows(1, 6));
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = write_file(&h.watch_dir, "aa_second.csv", &rows(1, 7));

    match h.ingest.run_cycle().await {
        CycleOutcome::Committed { file, .. } => assert_eq!(file, first),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(second.exists());
}

#[tokio::test]
async fn missing_model_stores_unscored_rows() {
    let schema = kdd_schema();
    let scorer = OnnxScorer::load(Path::new("nonexistent.onnx"), schema.len(), 0.5).unwrap();
    let h = harness_with(Arc::new(scorer), Duration::from_millis(500));
    write_file(&h.watch_dir, "plain.csv", &rows(2, 8));

    assert!(matches!(
        h.ingest.run_cycle().await,
        CycleOutcome::Committed { inserted: 2, .. }
    ));
    let stored = h.store.recent(10, None).unwrap();
    assert!(stored
        .iter()
        .all(|r| r.predicted_class == UNSCORED_CLASS && r.prediction_probability == 0.0));
}

#[tokio::test]
async fn loop_drains_directory_until_shutdown() {
    let h = harness();
    for i in 0..3 {
        write_file(&h.watch_dir, &format!("batch_{i}.csv"), &rows(4, 10 + i));
    }

    let (tx, rx) = watch::channel(false);
    let task = tokio::spawn(h.ingest.clone().supervise(rx));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while h.store.count().unwrap() < 12 {
        assert!(tokio::time::Instant::now() < deadline, "loop did not drain directory");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(std::fs::read_dir(&h.watch_dir).unwrap().count(), 0);
}

fn scored(schema: &ReferenceSchema, n: usize) -> Vec<ScoredRecord> {
    (0..n)
        .map(|i| ScoredRecord {
            encoded: EncodedRecord {
                line: i + 1,
                values: vec![i as f64; schema.len()],
            },
            prediction: Prediction::checked("normal".into(), 0.5).unwrap(),
        })
        .collect()
}

#[test]
fn large_batch_spans_statements() {
    let dir = tempfile::tempdir().unwrap();
    let schema = kdd_schema();
    let store = SqliteStore::open(&dir.path().join("s.db"), Arc::clone(&schema), Duration::from_millis(500)).unwrap();

    let source = BatchSource::new("big.csv", b"big");
    let commit = store.insert_batch(&source, &scored(&schema, 600)).unwrap();
    assert_eq!(commit.inserted, 600);
    assert!(store.is_committed(&source.fingerprint).unwrap());
    assert_eq!(store.count().unwrap(), 600);

    let newest = store.recent(1, None).unwrap();
    assert_eq!(newest[0].features[0], 599.0);

    let later = store
        .insert_batch(&BatchSource::new("next.csv", b"next"), &scored(&schema, 1))
        .unwrap();
    assert!(later.timestamp >= commit.timestamp);
}

#[test]
fn reopen_with_other_schema_conflicts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s.db");
    let schema = kdd_schema();
    drop(SqliteStore::open(&path, Arc::clone(&schema), Duration::from_millis(500)).unwrap());

    // same schema reopens cleanly
    drop(SqliteStore::open(&path, Arc::clone(&schema), Duration::from_millis(500)).unwrap());

    let mut names = synth::reference_features();
    names.swap(0, 1);
    let reordered = Arc::new(ReferenceSchema::new("reordered", names).unwrap());
    let err = SqliteStore::open(&path, reordered, Duration::from_millis(500))
        .err()
        .unwrap();
    assert!(matches!(err, StorageError::SchemaConflict { .. }), "{err}");
}

#[test]
fn store_rejects_colliding_feature_names() {
    let dir = tempfile::tempdir().unwrap();
    let reserved = Arc::new(ReferenceSchema::new("r", vec!["duration".into(), "Timestamp".into()]).unwrap());
    assert!(matches!(
        SqliteStore::open(&dir.path().join("a.db"), reserved, Duration::from_millis(100)).err(),
        Some(StorageError::ReservedColumn(_))
    ));

    let cased = Arc::new(ReferenceSchema::new("c", vec!["Bytes".into(), "bytes".into()]).unwrap());
    assert!(matches!(
        SqliteStore::open(&dir.path().join("b.db"), cased, Duration::from_millis(100)).err(),
        Some(StorageError::DuplicateColumn(_))
    ));

    let schema = kdd_schema();
    let store = SqliteStore::open(&dir.path().join("c.db"), schema, Duration::from_millis(100)).unwrap();
    assert!(matches!(
        store.recent(10, Some("protocol_type_sctp")),
        Err(StorageError::UnknownColumn(_))
    ));
}

#[tokio::test]
async fn store_timeout_keeps_file_and_never_duplicates() {
    let h = harness_tuned(Arc::new(FixedScorer), Duration::from_secs(3), |s| {
        s.store_timeout = Duration::from_millis(100);
    });
    let path = write_file(&h.watch_dir, "slow_store.csv", &rows(3, 20));

    let blocker = rusqlite::Connection::open(&h.db_path).unwrap();
    blocker.execute_batch("BEGIN EXCLUSIVE;").unwrap();

    let outcome = h.ingest.run_cycle().await;
    assert!(
        matches!(
            outcome,
            CycleOutcome::Retained {
                error: StorageError::Timeout(_),
                ..
            }
        ),
        "{outcome:?}"
    );
    assert!(path.exists());

    // the abandoned insert may still commit once the lock is gone
    blocker.execute_batch("ROLLBACK;").unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        match h.ingest.run_cycle().await {
            CycleOutcome::Committed { .. } => break,
            CycleOutcome::Retained { .. } => {
                assert!(tokio::time::Instant::now() < deadline, "file never committed");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert!(!path.exists());
    assert_eq!(h.store.count().unwrap(), 3);
}

#[tokio::test]
async fn slow_rows_are_dropped_on_scorer_timeout() {
    let h = harness_tuned(Arc::new(SlowScorer { max_duration: 100.0 }), Duration::from_millis(500), |s| {
        s.scorer_timeout = Duration::from_millis(50);
    });
    let mut batch = rows(3, 21);
    batch[0][0] = "1".into();
    batch[1][0] = "9000".into();
    batch[2][0] = "2".into();
    write_file(&h.watch_dir, "slow_rows.csv", &batch);

    assert!(matches!(
        h.ingest.run_cycle().await,
        CycleOutcome::Committed {
            inserted: 2,
            unscored: 1,
            ..
        }
    ));
    assert_eq!(h.store.count().unwrap(), 2);
}

#[cfg(unix)]
#[tokio::test]
async fn unreadable_file_does_not_block_newer_files() {
    use std::os::unix::fs::PermissionsExt;

    let h = harness();
    let stuck = h.watch_dir.join("old_unreadable.csv");
    std::fs::write(&stuck, "x\n").unwrap();
    std::fs::set_permissions(&stuck, std::fs::Permissions::from_mode(0o000)).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let good = write_file(&h.watch_dir, "new_good.csv", &rows(2, 22));

    // privileged runs can still read the file and discard it as too narrow
    match h.ingest.run_cycle().await {
        CycleOutcome::Quarantined { file, reason } => {
            assert_eq!(file, stuck);
            assert_eq!(reason.kind(), "unreadable");
            assert_eq!(h.ingest.quarantined(), vec![stuck.clone()]);
        }
        CycleOutcome::Discarded { file, .. } => assert_eq!(file, stuck),
        other => panic!("unexpected outcome {other:?}"),
    }

    assert!(matches!(
        h.ingest.run_cycle().await,
        CycleOutcome::Committed { inserted: 2, .. }
    ));
    assert!(!good.exists());
    assert!(matches!(h.ingest.run_cycle().await, CycleOutcome::Idle));
    assert_eq!(h.store.count().unwrap(), 2);

    let _ = std::fs::set_permissions(&stuck, std::fs::Permissions::from_mode(0o644));
}

#[test]
fn scan_skips_listed_paths() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("a.csv");
    std::fs::write(&first, "1").unwrap();
    std::thread::sleep(Duration::from_millis(50));
    let second = dir.path().join("b.csv");
    std::fs::write(&second, "2").unwrap();

    let all = scan(dir.path(), &HashSet::new()).unwrap();
    assert_eq!(all.oldest.as_deref(), Some(first.as_path()));
    assert_eq!(all.pending, 2);

    let skip: HashSet<PathBuf> = [first].into_iter().collect();
    let rest = scan(dir.path(), &skip).unwrap();
    assert_eq!(rest.oldest, Some(second));
    assert_eq!(rest.pending, 1);
}

#[tokio::test]
async fn backoff_wakes_on_shutdown() {
    let (tx, mut rx) = watch::channel(false);
    let started = tokio::time::Instant::now();
    let waiter = tokio::spawn(async move { wait_or_shutdown(&mut rx, Duration::from_secs(60)).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    tx.send(true).unwrap();

    let stop = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap();
    assert!(stop);
    assert!(started.elapsed() < Duration::from_secs(5));

    let (tx, mut rx) = watch::channel(false);
    drop(tx);
    assert!(wait_or_shutdown(&mut rx, Duration::from_secs(60)).await);

    let (_tx, mut rx) = watch::channel(false);
    assert!(!wait_or_shutdown(&mut rx, Duration::from_millis(10)).await);
}

