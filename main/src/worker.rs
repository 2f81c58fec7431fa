use std::{sync::Arc, time::Duration};

use anyhow::Context;
use common::{
    storage::{db::SurrealDbClient, raw_data::StoredRawDataClient, store::PayloadStore},
    utils::config::get_config,
};
use deduplicator::{DeduplicatorConfig, DelegateFactory};
use ingestion_pipeline::{run_worker_pool, IngestionPipeline};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config().context("loading configuration")?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await
        .context("connecting to SurrealDB")?,
    );
    db.ensure_initialized()
        .await
        .context("defining indexes")?;

    let store = PayloadStore::new(&config)
        .await
        .context("opening payload store")?;
    let raw_data = Arc::new(StoredRawDataClient::new(Arc::clone(&db), store));
    let factory = Arc::new(DelegateFactory::with_default_strategies(
        DeduplicatorConfig::from_app_config(&config),
    ));

    let ingestion_pipeline = Arc::new(IngestionPipeline::new(
        Arc::clone(&db),
        raw_data,
        factory,
        &config,
    ));

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown requested; releasing in-flight work items"),
            Err(err) => warn!(error = %err, "failed to listen for ctrl-c; shutting down"),
        }
        shutdown.cancel();
    });

    info!(
        concurrency = config.worker_concurrency,
        storage = ?config.storage,
        "starting ingestion workers"
    );
    run_worker_pool(
        db,
        ingestion_pipeline,
        config.worker_concurrency,
        Duration::from_millis(config.worker_idle_backoff_ms),
        cancel,
    )
    .await?;

    Ok(())
}
