//! Netwatch entrypoint: loads the reference schema, opens the store, then runs
//! the ingestion loop in the background and the query API in the foreground
//! until Ctrl+C.

use netwatch_ingest::{
    api::{self, ApiState},
    config::AppConfig,
    features::RecordEncoder,
    ingest::{IngestLoop, LoopSettings},
    logging::StructuredLogger,
    model::{OnnxScorer, Scorer},
    schema::{RawLayout, ReferenceSchema},
    storage::SqliteStore,
    StartupError,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

fn ensure_dir(path: &Path) -> Result<(), StartupError> {
    std::fs::create_dir_all(path).map_err(|source| StartupError::Directory {
        path: path.to_path_buf(),
        source,
    })
}

async fn run(config: AppConfig) -> Result<(), StartupError> {
    let schema = Arc::new(ReferenceSchema::load(&config.schema_path)?);
    info!(
        path = %config.schema_path.display(),
        version = schema.version(),
        features = schema.len(),
        fingerprint = schema.fingerprint(),
        "reference schema loaded"
    );
    let layout = RawLayout::resolve(&config.schema, &schema)?;
    info!(layout = layout.version(), arity = layout.arity(), "raw layout resolved");

    ensure_dir(&config.data_dir)?;
    ensure_dir(&config.watch_dir)?;

    let store_path = config.store_path();
    let store = Arc::new(SqliteStore::open(
        &store_path,
        Arc::clone(&schema),
        config.store.busy_timeout(),
    )?);
    info!(path = %store_path.display(), rows = store.count()?, "store opened");

    let scorer: Arc<dyn Scorer> = Arc::new(OnnxScorer::load(
        &config.model_path,
        schema.len(),
        config.scorer.anomaly_threshold,
    )?);
    let encoder = RecordEncoder::new(Arc::clone(&schema), layout);
    let ingest = IngestLoop::new(
        LoopSettings::from_config(&config),
        encoder,
        scorer,
        Arc::clone(&store),
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    let stop_tx = Arc::new(stop_tx);
    let handler_tx = Arc::clone(&stop_tx);
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = handler_tx.send(true);
    }) {
        warn!(error = %e, "cannot install Ctrl+C handler");
    }

    let ingest_task = tokio::spawn(ingest.supervise(stop_rx.clone()));

    if config.api.enabled {
        let listener = tokio::net::TcpListener::bind(&config.api.bind)
            .await
            .map_err(|source| StartupError::Bind {
                addr: config.api.bind.clone(),
                source,
            })?;
        info!(addr = %config.api.bind, "query API listening");
        let app = api::router(ApiState::new(Arc::clone(&store), &config.api));
        let mut rx = stop_rx.clone();
        let shutdown = async move {
            let _ = rx.wait_for(|stop| *stop).await;
        };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!(error = %e, "query API stopped");
            let _ = stop_tx.send(true);
        }
    }

    if let Err(e) = ingest_task.await {
        error!(error = %e, "ingestion supervisor failed");
    }
    info!("netwatch stopping");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config_path = std::env::var("NETWATCH_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.json"));
    let config = AppConfig::load(&config_path)?;

    StructuredLogger::init(&config.log)?;
    info!(config = %config_path.display(), watch_dir = %config.watch_dir.display(), "netwatch starting");

    if let Err(e) = run(config).await {
        error!(error = %e, "startup failed");
        return Err(e.into());
    }
    Ok(())
}
