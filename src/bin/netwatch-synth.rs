//! Synthetic traffic generator for demos and load tests.

use clap::Parser;
use netwatch_ingest::config::LogConfig;
use netwatch_ingest::logging::StructuredLogger;
use netwatch_ingest::synth;
use std::path::PathBuf;
use tracing::info;

/// Drop synthetic KDD-style connection files into a watch directory.
#[derive(Parser)]
#[command(name = "netwatch-synth", version, about)]
struct Args {
    /// Directory the ingestion loop polls
    #[arg(value_name = "DIR")]
    watch_dir: PathBuf,
    /// Number of files to write
    #[arg(long, default_value_t = 1)]
    files: usize,
    /// Rows per file
    #[arg(long, default_value_t = 10)]
    rows: usize,
    /// Also write a matching reference schema artifact here
    #[arg(long, value_name = "PATH")]
    schema: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    StructuredLogger::init(&LogConfig {
        json: false,
        ..LogConfig::default()
    })?;
    let args = Args::parse();

    if let Some(ref path) = args.schema {
        let artifact = serde_json::json!({
            "version": "kdd99-onehot",
            "features": synth::reference_features(),
        });
        std::fs::write(path, serde_json::to_string_pretty(&artifact)?)?;
        info!(path = %path.display(), "reference schema written");
    }

    std::fs::create_dir_all(&args.watch_dir)?;
    let mut rng = rand::thread_rng();
    for _ in 0..args.files {
        let rows = synth::generate_rows(&mut rng, args.rows);
        let path = synth::write_batch(&args.watch_dir, &rows, ',')?;
        info!(path = %path.display(), rows = rows.len(), "batch written");
    }
    Ok(())
}
